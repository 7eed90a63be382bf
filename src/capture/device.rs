use thiserror::Error;
use tokio::sync::mpsc;

use super::mic::MicCapture;
use super::synthetic::SyntheticCapture;

/// Audio sample data (16-bit PCM, interleaved)
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Raw audio samples (i16 PCM, interleaved)
    pub samples: Vec<i16>,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Number of channels
    pub channels: u16,
    /// Timestamp in milliseconds since the capture started
    pub timestamp_ms: u64,
}

/// Target format for assembled clips
#[derive(Debug, Clone, Copy)]
pub struct CaptureConfig {
    /// Sample rate clips are normalized to before encoding
    pub sample_rate: u32,
    /// Channel count clips are normalized to (1 = mono)
    pub channels: u16,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000, // Plenty for short spoken digits
            channels: 1,        // Mono
        }
    }
}

/// Errors raised while acquiring or driving a capture device
#[derive(Debug, Error)]
pub enum CaptureError {
    /// The device could not be acquired: permission denied or no device.
    #[error("capture device unavailable: {0}")]
    DeviceUnavailable(String),

    /// The device was acquired but its stream failed.
    #[error("audio stream failed: {0}")]
    Stream(String),

    /// The ceiling elapsed without a single frame arriving.
    #[error("no audio captured; check microphone permissions and availability")]
    NoAudio,

    #[error("failed to encode clip: {0}")]
    Encode(String),

    #[error("capture task failed: {0}")]
    TaskFailed(String),
}

/// Audio capture device trait
///
/// Implementations:
/// - `MicCapture`: cpal input stream on a dedicated thread (all platforms)
/// - `SyntheticCapture`: paced sine tone (tests, machines without a mic)
#[async_trait::async_trait]
pub trait CaptureDevice: Send + Sync {
    /// Start capturing audio
    ///
    /// Returns a channel receiver that will receive audio frames
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>, CaptureError>;

    /// Stop capturing and release the underlying device
    async fn stop(&mut self) -> Result<(), CaptureError>;

    /// Check if the device is currently capturing
    fn is_capturing(&self) -> bool;

    /// Get device name for logging
    fn name(&self) -> &str;
}

/// Capture source selector
#[derive(Debug, Clone)]
pub enum DeviceSource {
    /// Microphone input, optionally pinned to a named device
    Microphone { preferred: Option<String> },
    /// Generated sine tone (no hardware involved)
    Synthetic { tone_hz: f32 },
}

/// Capture device factory
pub struct CaptureDeviceFactory;

impl CaptureDeviceFactory {
    /// Create a capture device for the given source
    pub fn create(
        source: &DeviceSource,
        config: CaptureConfig,
    ) -> Result<Box<dyn CaptureDevice>, CaptureError> {
        match source {
            DeviceSource::Microphone { preferred } => {
                let mic = MicCapture::new(preferred.as_deref())?;
                Ok(Box::new(mic))
            }
            DeviceSource::Synthetic { tone_hz } => {
                Ok(Box::new(SyntheticCapture::new(config, *tone_hz)))
            }
        }
    }
}
