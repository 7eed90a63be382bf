pub mod orchestrator;

pub use orchestrator::{
    FailedClips, Submission, SubmissionClip, SubmitError, SubmitReceipt, UploadOrchestrator,
    AGE_RANGE,
};
