use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::device::{AudioFrame, CaptureConfig, CaptureDevice, CaptureError};

/// Hard per-clip duration ceiling. A capture attempt self-terminates here no
/// matter what the caller does, which is what bounds clip payload size.
pub const CLIP_CEILING: Duration = Duration::from_secs(3);

pub const WAV_CONTENT_TYPE: &str = "audio/wav";

/// One finished recording attempt: the encoded WAV payload plus its format.
#[derive(Debug, Clone)]
pub struct CapturedClip {
    pub payload: Vec<u8>,
    pub content_type: String,
    pub duration_ms: u64,
    pub sample_rate: u32,
    pub channels: u16,
}

/// Handle for an in-flight capture attempt.
///
/// `stop` ends the attempt early; `finish` resolves to the attempt's single
/// terminal result. The device is released before the result is produced,
/// whichever way the attempt ended.
pub struct CaptureHandle {
    stop: Arc<watch::Sender<()>>,
    task: JoinHandle<Result<CapturedClip, CaptureError>>,
}

impl CaptureHandle {
    /// Ask the attempt to finalize now instead of waiting for the ceiling.
    /// Idempotent; calls after termination are no-ops.
    pub fn stop(&self) {
        let _ = self.stop.send(());
    }

    /// Detachable stop control, so one owner can await `finish` while another
    /// can still end the attempt.
    pub fn stopper(&self) -> CaptureStopper {
        CaptureStopper(Arc::clone(&self.stop))
    }

    /// Wait for the attempt to terminate and take its result.
    pub async fn finish(self) -> Result<CapturedClip, CaptureError> {
        match self.task.await {
            Ok(result) => result,
            Err(e) => Err(CaptureError::TaskFailed(e.to_string())),
        }
    }
}

/// Cloneable early-stop control for a capture attempt.
#[derive(Clone)]
pub struct CaptureStopper(Arc<watch::Sender<()>>);

impl CaptureStopper {
    pub fn stop(&self) {
        let _ = self.0.send(());
    }
}

/// Start a single bounded capture attempt on the given device.
///
/// Fails right here if the device cannot start, so callers see a device
/// problem synchronously. Once started, the attempt runs until the first of:
/// the ceiling elapses, a stop request arrives, or the device's frame stream
/// ends. Frames are then normalized to the target format and encoded as WAV.
pub async fn start_clip_capture(
    mut device: Box<dyn CaptureDevice>,
    target: CaptureConfig,
    ceiling: Duration,
) -> Result<CaptureHandle, CaptureError> {
    let frames = device.start().await?;
    info!("Capture started on '{}' (ceiling {:?})", device.name(), ceiling);

    let (stop_tx, stop_rx) = watch::channel(());
    let task = tokio::spawn(run_capture(device, frames, target, ceiling, stop_rx));
    Ok(CaptureHandle {
        stop: Arc::new(stop_tx),
        task,
    })
}

async fn run_capture(
    mut device: Box<dyn CaptureDevice>,
    mut frames: mpsc::Receiver<AudioFrame>,
    target: CaptureConfig,
    ceiling: Duration,
    mut stop_rx: watch::Receiver<()>,
) -> Result<CapturedClip, CaptureError> {
    let deadline = tokio::time::sleep(ceiling);
    tokio::pin!(deadline);

    let mut samples: Vec<i16> = Vec::new();
    let mut source_rate = target.sample_rate;
    let mut source_channels = target.channels;
    let mut first_frame = true;
    let mut stopped_early = false;

    loop {
        tokio::select! {
            biased;
            _ = &mut deadline => {
                info!("Capture ceiling reached");
                break;
            }
            changed = stop_rx.changed() => {
                // Err means every stop handle is gone; with nobody left to
                // wait for the ceiling that also ends the attempt.
                let _ = changed;
                debug!("Capture stop requested");
                stopped_early = true;
                break;
            }
            frame = frames.recv() => match frame {
                Some(frame) => {
                    if first_frame {
                        source_rate = frame.sample_rate;
                        source_channels = frame.channels;
                        first_frame = false;
                    }
                    samples.extend_from_slice(&frame.samples);
                }
                None => {
                    debug!("Capture frame stream ended");
                    break;
                }
            },
        }
    }

    // Release the device on every exit path before reporting the result.
    if let Err(e) = device.stop().await {
        warn!("Failed to stop capture device: {}", e);
    }
    drop(frames);

    // Reaching the ceiling with nothing captured means the device produced
    // no frames at all; an explicit early stop may legitimately be empty.
    if samples.is_empty() && !stopped_early {
        return Err(CaptureError::NoAudio);
    }

    let (samples, out_rate, out_channels) =
        normalize(samples, source_rate, source_channels, target);
    let payload = encode_wav(&samples, out_rate, out_channels)?;
    let duration_ms = if samples.is_empty() {
        0
    } else {
        samples.len() as u64 * 1000 / (out_rate as u64 * out_channels as u64)
    };
    info!(
        "Capture finished: {}ms, {} bytes @ {}Hz x{}",
        duration_ms,
        payload.len(),
        out_rate,
        out_channels
    );

    Ok(CapturedClip {
        payload,
        content_type: WAV_CONTENT_TYPE.to_string(),
        duration_ms,
        sample_rate: out_rate,
        channels: out_channels,
    })
}

/// Downmix and resample captured audio toward the target format. Returns the
/// samples with the rate and channel count actually achieved.
fn normalize(
    samples: Vec<i16>,
    source_rate: u32,
    source_channels: u16,
    target: CaptureConfig,
) -> (Vec<i16>, u32, u16) {
    let mut samples = samples;
    let mut rate = source_rate;
    let mut channels = source_channels;

    if target.channels == 1 && channels > 1 {
        samples = downmix_to_mono(&samples, channels);
        channels = 1;
    }
    if rate != target.sample_rate {
        if channels == 1 {
            samples = resample(&samples, rate, target.sample_rate);
            rate = target.sample_rate;
        } else {
            // Linear resampling of interleaved audio would smear channels.
            warn!(
                "Keeping source rate {}Hz for {}-channel capture",
                rate, channels
            );
        }
    }
    (samples, rate, channels)
}

/// Average interleaved channels down to one.
fn downmix_to_mono(samples: &[i16], channels: u16) -> Vec<i16> {
    let channels = channels as usize;
    samples
        .chunks_exact(channels)
        .map(|frame| {
            let sum: i32 = frame.iter().map(|&s| s as i32).sum();
            (sum / channels as i32) as i16
        })
        .collect()
}

/// Linear-interpolation resampler. Good enough for speech at these rates.
fn resample(samples: &[i16], from_rate: u32, to_rate: u32) -> Vec<i16> {
    if from_rate == to_rate || samples.is_empty() {
        return samples.to_vec();
    }
    let ratio = from_rate as f64 / to_rate as f64;
    let out_len = (samples.len() as f64 / ratio) as usize;
    let mut out = Vec::with_capacity(out_len);
    for i in 0..out_len {
        let pos = i as f64 * ratio;
        let idx = pos as usize;
        let frac = pos - idx as f64;
        let s0 = samples[idx.min(samples.len() - 1)] as f64;
        let s1 = samples[(idx + 1).min(samples.len() - 1)] as f64;
        out.push((s0 + (s1 - s0) * frac).round() as i16);
    }
    out
}

fn encode_wav(samples: &[i16], sample_rate: u32, channels: u16) -> Result<Vec<u8>, CaptureError> {
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)
            .map_err(|e| CaptureError::Encode(e.to_string()))?;
        for &sample in samples {
            writer
                .write_sample(sample)
                .map_err(|e| CaptureError::Encode(e.to_string()))?;
        }
        writer
            .finalize()
            .map_err(|e| CaptureError::Encode(e.to_string()))?;
    }
    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn downmix_averages_interleaved_channels() {
        let samples = vec![100, 200, -100, -200, 0, 50];
        assert_eq!(downmix_to_mono(&samples, 2), vec![150, -150, 25]);
    }

    #[test]
    fn resample_halves_sample_count() {
        let samples: Vec<i16> = (0..32000).map(|i| (i % 100) as i16).collect();
        let out = resample(&samples, 32000, 16000);
        assert_eq!(out.len(), 16000);
    }

    #[test]
    fn resample_identity_when_rates_match() {
        let samples = vec![1, 2, 3, 4];
        assert_eq!(resample(&samples, 16000, 16000), samples);
    }

    #[test]
    fn encode_wav_produces_riff_header() {
        let payload = encode_wav(&[0i16; 160], 16000, 1).unwrap();
        assert_eq!(&payload[0..4], b"RIFF");
        assert_eq!(&payload[8..12], b"WAVE");
        // 44-byte header plus two bytes per sample.
        assert_eq!(payload.len(), 44 + 320);
    }
}
