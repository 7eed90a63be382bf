pub mod clip;
pub mod device;
pub mod mic;
pub mod synthetic;

pub use clip::{
    start_clip_capture, CaptureHandle, CaptureStopper, CapturedClip, CLIP_CEILING,
    WAV_CONTENT_TYPE,
};
pub use device::{
    AudioFrame, CaptureConfig, CaptureDevice, CaptureDeviceFactory, CaptureError, DeviceSource,
};
pub use mic::MicCapture;
pub use synthetic::SyntheticCapture;
