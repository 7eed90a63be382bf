pub mod capture;
pub mod config;
pub mod http;
pub mod session;
pub mod store;
pub mod upload;

pub use capture::{
    start_clip_capture, AudioFrame, CaptureConfig, CaptureDevice, CaptureDeviceFactory,
    CaptureError, CaptureHandle, CapturedClip, DeviceSource, MicCapture, SyntheticCapture,
    CLIP_CEILING,
};
pub use config::Config;
pub use http::{create_router, AppState};
pub use session::{
    ControlError, Digit, RecordingSession, SessionController, SessionError, SessionStatus,
    SlotKey, SlotStatus, UploadPhase, Variant,
};
pub use store::{ParticipantId, PersistenceClient, RestStore, StoreError};
pub use upload::{SubmitError, SubmitReceipt, Submission, UploadOrchestrator};
