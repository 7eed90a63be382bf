use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use super::device::{AudioFrame, CaptureConfig, CaptureDevice, CaptureError};

/// Milliseconds of audio per generated frame
const FRAME_MS: u64 = 100;

/// Generated sine-tone capture device.
///
/// Produces one frame per 100ms of wall-clock (or paused-test) time at the
/// configured format, so ceiling and early-stop behavior can be exercised
/// without any audio hardware.
pub struct SyntheticCapture {
    config: CaptureConfig,
    tone_hz: f32,
    stop_flag: Arc<AtomicBool>,
    released: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
    capturing: bool,
}

impl SyntheticCapture {
    pub fn new(config: CaptureConfig, tone_hz: f32) -> Self {
        Self {
            config,
            tone_hz,
            stop_flag: Arc::new(AtomicBool::new(false)),
            released: Arc::new(AtomicBool::new(false)),
            task: None,
            capturing: false,
        }
    }

    /// Flag that flips once `stop` has run; lets tests assert the device was
    /// released after a capture ended.
    pub fn released_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.released)
    }
}

#[async_trait::async_trait]
impl CaptureDevice for SyntheticCapture {
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>, CaptureError> {
        if self.capturing {
            return Err(CaptureError::Stream(
                "capture already running on this device".to_string(),
            ));
        }
        self.stop_flag.store(false, Ordering::Relaxed);
        self.released.store(false, Ordering::Relaxed);

        let (tx, rx) = mpsc::channel(64);
        let stop = Arc::clone(&self.stop_flag);
        let config = self.config;
        let tone_hz = self.tone_hz;

        let task = tokio::spawn(async move {
            let samples_per_frame =
                (config.sample_rate as u64 * FRAME_MS / 1000) as usize * config.channels as usize;
            // First tick lands after one full frame period, not immediately.
            let period = Duration::from_millis(FRAME_MS);
            let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);

            let mut sample_index: u64 = 0;
            let mut timestamp_ms: u64 = 0;
            loop {
                interval.tick().await;
                if stop.load(Ordering::Relaxed) {
                    break;
                }
                let samples: Vec<i16> = (0..samples_per_frame)
                    .map(|i| {
                        let t = (sample_index + i as u64) as f32
                            / (config.sample_rate * config.channels as u32) as f32;
                        ((t * tone_hz * std::f32::consts::TAU).sin() * 0.3 * i16::MAX as f32)
                            as i16
                    })
                    .collect();
                sample_index += samples_per_frame as u64;

                let frame = AudioFrame {
                    samples,
                    sample_rate: config.sample_rate,
                    channels: config.channels,
                    timestamp_ms,
                };
                timestamp_ms += FRAME_MS;

                if tx.send(frame).await.is_err() {
                    break;
                }
            }
        });

        self.task = Some(task);
        self.capturing = true;
        debug!("Synthetic capture started ({}Hz tone)", self.tone_hz);
        Ok(rx)
    }

    async fn stop(&mut self) -> Result<(), CaptureError> {
        if !self.capturing {
            return Ok(());
        }
        self.stop_flag.store(true, Ordering::Relaxed);
        if let Some(task) = self.task.take() {
            task.abort();
            let _ = task.await;
        }
        self.capturing = false;
        self.released.store(true, Ordering::Relaxed);
        debug!("Synthetic capture stopped");
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.capturing
    }

    fn name(&self) -> &str {
        "synthetic tone"
    }
}
