//! Collection session management
//!
//! One session tracks a participant's 27 clip slots (digits 1-9, three
//! prompted styles each) from first capture through submission:
//! - Slot state machine and re-record semantics
//! - Capture attempt orchestration against the audio device
//! - Submission hand-off to the upload orchestrator
//! - Status reporting for the collection UI

mod controller;
mod session;
mod slot;

pub use controller::{
    ClipStatus, ControlError, SessionController, SessionStatus, SlotRef, UploadPhase,
};
pub use session::{RecordingSession, SessionError};
pub use slot::{ClipSlot, Digit, ParseSlotError, SlotKey, SlotStatus, Variant};
