use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::SampleFormat;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::device::{AudioFrame, CaptureDevice, CaptureError};

/// How often the stream thread polls for shutdown
const STOP_POLL: Duration = Duration::from_millis(20);

/// Frame channel depth; callbacks drop frames rather than block when full
const FRAME_CHANNEL_CAPACITY: usize = 256;

/// Microphone capture through cpal.
///
/// cpal streams are not `Send`, so each capture runs on a dedicated thread
/// that opens the device, owns the stream for its whole life, forwards
/// callback buffers into an async channel, and tears the stream down when the
/// stop flag flips or every receiver is gone. The struct itself holds only
/// the device name, which keeps it `Send + Sync`.
pub struct MicCapture {
    preferred: Option<String>,
    device_name: String,
    stop_flag: Arc<AtomicBool>,
    dropped: Arc<AtomicUsize>,
    thread: Option<std::thread::JoinHandle<()>>,
    capturing: bool,
}

impl MicCapture {
    /// Resolve the preferred input device, or the host default when none is
    /// named. Fails early so callers see a device problem before recording.
    pub fn new(preferred: Option<&str>) -> Result<Self, CaptureError> {
        let device = open_device(preferred)?;
        let device_name = device
            .name()
            .unwrap_or_else(|_| "unknown input device".to_string());

        Ok(Self {
            preferred: preferred.map(str::to_string),
            device_name,
            stop_flag: Arc::new(AtomicBool::new(false)),
            dropped: Arc::new(AtomicUsize::new(0)),
            thread: None,
            capturing: false,
        })
    }

    /// Names of every input device the host exposes.
    pub fn list_devices() -> Result<Vec<String>, CaptureError> {
        let host = cpal::default_host();
        let devices = host.input_devices().map_err(|e| {
            CaptureError::DeviceUnavailable(format!("cannot enumerate input devices: {e}"))
        })?;
        Ok(devices.filter_map(|d| d.name().ok()).collect())
    }
}

#[async_trait::async_trait]
impl CaptureDevice for MicCapture {
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>, CaptureError> {
        if self.capturing {
            return Err(CaptureError::Stream(
                "capture already running on this device".to_string(),
            ));
        }

        self.stop_flag.store(false, Ordering::Relaxed);
        self.dropped.store(0, Ordering::Relaxed);

        let (tx, rx) = mpsc::channel(FRAME_CHANNEL_CAPACITY);
        // The thread reports stream startup through this channel so start()
        // can fail with the real cause instead of an empty frame stream.
        let (ready_tx, ready_rx) = std::sync::mpsc::channel::<Result<(), CaptureError>>();

        let stop = Arc::clone(&self.stop_flag);
        let dropped = Arc::clone(&self.dropped);
        let preferred = self.preferred.clone();

        let thread = std::thread::Builder::new()
            .name("mic-capture".to_string())
            .spawn(move || run_stream_thread(preferred, tx, stop, dropped, ready_tx))
            .map_err(|e| CaptureError::Stream(format!("failed to spawn capture thread: {e}")))?;

        let ready = tokio::task::spawn_blocking(move || ready_rx.recv())
            .await
            .map_err(|e| CaptureError::TaskFailed(e.to_string()))?;
        match ready {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = thread.join();
                return Err(e);
            }
            Err(_) => {
                // Thread died before reporting; nothing more specific to say.
                let _ = thread.join();
                return Err(CaptureError::Stream(
                    "capture thread exited before the stream started".to_string(),
                ));
            }
        }

        self.thread = Some(thread);
        self.capturing = true;
        info!("Microphone capture started on '{}'", self.device_name);
        Ok(rx)
    }

    async fn stop(&mut self) -> Result<(), CaptureError> {
        if !self.capturing {
            return Ok(());
        }
        self.stop_flag.store(true, Ordering::Relaxed);

        if let Some(thread) = self.thread.take() {
            let joined = tokio::task::spawn_blocking(move || thread.join())
                .await
                .map_err(|e| CaptureError::TaskFailed(e.to_string()))?;
            if joined.is_err() {
                warn!("Capture thread panicked during shutdown");
            }
        }
        self.capturing = false;

        let dropped = self.dropped.swap(0, Ordering::Relaxed);
        if dropped > 0 {
            warn!("Dropped {} audio buffers during capture", dropped);
        }
        info!("Microphone capture stopped on '{}'", self.device_name);
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.capturing
    }

    fn name(&self) -> &str {
        &self.device_name
    }
}

fn open_device(preferred: Option<&str>) -> Result<cpal::Device, CaptureError> {
    let host = cpal::default_host();
    match preferred {
        Some(name) => {
            let mut devices = host.input_devices().map_err(|e| {
                CaptureError::DeviceUnavailable(format!("cannot enumerate input devices: {e}"))
            })?;
            devices
                .find(|d| d.name().map(|n| n == name).unwrap_or(false))
                .ok_or_else(|| {
                    CaptureError::DeviceUnavailable(format!("input device '{name}' not found"))
                })
        }
        None => host.default_input_device().ok_or_else(|| {
            CaptureError::DeviceUnavailable(format!(
                "no default input device. {}",
                mic_permission_hint()
            ))
        }),
    }
}

/// Opens the device and owns the cpal stream for its whole life; exits when
/// the stop flag flips or the frame receiver is dropped.
fn run_stream_thread(
    preferred: Option<String>,
    tx: mpsc::Sender<AudioFrame>,
    stop: Arc<AtomicBool>,
    dropped: Arc<AtomicUsize>,
    ready_tx: std::sync::mpsc::Sender<Result<(), CaptureError>>,
) {
    let device = match open_device(preferred.as_deref()) {
        Ok(device) => device,
        Err(e) => {
            let _ = ready_tx.send(Err(e));
            return;
        }
    };
    let stream_config = match device.default_input_config() {
        Ok(config) => config,
        Err(e) => {
            let _ = ready_tx.send(Err(CaptureError::DeviceUnavailable(format!(
                "no usable input config: {e}. {}",
                mic_permission_hint()
            ))));
            return;
        }
    };

    let sample_format = stream_config.sample_format();
    let config: cpal::StreamConfig = stream_config.into();
    let sample_rate = config.sample_rate.0;
    let channels = config.channels;
    let started = Instant::now();

    debug!(
        "Input stream format: {:?} @ {}Hz x{}",
        sample_format, sample_rate, channels
    );

    let err_fn = |err: cpal::StreamError| warn!("Audio stream error: {}", err);

    let stream = match sample_format {
        SampleFormat::F32 => {
            let tx = tx.clone();
            let dropped = Arc::clone(&dropped);
            device.build_input_stream(
                &config,
                move |data: &[f32], _| {
                    let samples = data
                        .iter()
                        .map(|s| (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)
                        .collect();
                    forward(&tx, &dropped, samples, sample_rate, channels, started);
                },
                err_fn,
                None,
            )
        }
        SampleFormat::I16 => {
            let tx = tx.clone();
            let dropped = Arc::clone(&dropped);
            device.build_input_stream(
                &config,
                move |data: &[i16], _| {
                    forward(&tx, &dropped, data.to_vec(), sample_rate, channels, started);
                },
                err_fn,
                None,
            )
        }
        SampleFormat::U16 => {
            let tx = tx.clone();
            let dropped = Arc::clone(&dropped);
            device.build_input_stream(
                &config,
                move |data: &[u16], _| {
                    let samples = data.iter().map(|&s| (s as i32 - 32768) as i16).collect();
                    forward(&tx, &dropped, samples, sample_rate, channels, started);
                },
                err_fn,
                None,
            )
        }
        other => {
            let _ = ready_tx.send(Err(CaptureError::Stream(format!(
                "unsupported sample format: {other:?}"
            ))));
            return;
        }
    };

    let stream = match stream {
        Ok(stream) => stream,
        Err(e) => {
            let _ = ready_tx.send(Err(CaptureError::Stream(format!(
                "failed to build input stream: {e}"
            ))));
            return;
        }
    };
    if let Err(e) = stream.play() {
        let _ = ready_tx.send(Err(CaptureError::Stream(format!(
            "failed to start input stream: {e}"
        ))));
        return;
    }
    let _ = ready_tx.send(Ok(()));

    while !stop.load(Ordering::Relaxed) && !tx.is_closed() {
        std::thread::sleep(STOP_POLL);
    }

    if let Err(e) = stream.pause() {
        debug!("Failed to pause input stream: {}", e);
    }
    // Dropping the stream releases the device.
    drop(stream);
}

fn forward(
    tx: &mpsc::Sender<AudioFrame>,
    dropped: &AtomicUsize,
    samples: Vec<i16>,
    sample_rate: u32,
    channels: u16,
    started: Instant,
) {
    let frame = AudioFrame {
        samples,
        sample_rate,
        channels,
        timestamp_ms: started.elapsed().as_millis() as u64,
    };
    // Never block inside the audio callback; count what we shed instead.
    if tx.try_send(frame).is_err() {
        dropped.fetch_add(1, Ordering::Relaxed);
    }
}

/// Platform-specific pointer for the usual cause of an unavailable mic.
pub fn mic_permission_hint() -> &'static str {
    if cfg!(target_os = "macos") {
        "Grant microphone access in System Settings > Privacy & Security > Microphone."
    } else if cfg!(target_os = "linux") {
        "Check that an ALSA/PulseAudio input exists and is not held by another process."
    } else {
        "Check that a microphone is connected and allowed for this application."
    }
}
