use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::session::{RecordingSession, SessionError};
use super::slot::{SlotKey, SlotStatus};
use crate::capture::{
    start_clip_capture, CaptureConfig, CaptureDeviceFactory, CaptureError, CaptureStopper,
    CapturedClip, DeviceSource, CLIP_CEILING,
};
use crate::store::{ParticipantId, PersistenceClient};
use crate::upload::{Submission, SubmitError, UploadOrchestrator};

/// Anything a session operation can fail with
#[derive(Debug, Error)]
pub enum ControlError {
    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error(transparent)]
    Submit(#[from] SubmitError),
}

/// Where the current submission stands, as shown to clients
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum UploadPhase {
    Idle,
    Uploading {
        percent: u8,
    },
    Complete {
        participant: ParticipantId,
    },
    Failed {
        error: String,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        failed_clips: Vec<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        participant: Option<ParticipantId>,
    },
}

/// Full session view for the collection UI
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub session_id: String,
    pub started_at: DateTime<Utc>,
    pub captured: usize,
    pub required: usize,
    pub complete: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recording: Option<SlotRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub age: Option<u16>,
    pub clips: Vec<ClipStatus>,
    pub upload: UploadPhase,
}

#[derive(Debug, Clone, Serialize)]
pub struct SlotRef {
    pub digit: u8,
    pub variant: String,
}

impl From<SlotKey> for SlotRef {
    fn from(key: SlotKey) -> Self {
        Self {
            digit: key.digit.value(),
            variant: key.variant.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ClipStatus {
    pub digit: u8,
    pub variant: String,
    /// Arabic prompt label for this slot
    pub label: String,
    pub status: SlotStatus,
    pub has_preview: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    /// Spooled copy on local disk, when preview mirroring is enabled
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview_file: Option<String>,
}

struct ActiveCapture {
    key: SlotKey,
    attempt: u64,
    stopper: CaptureStopper,
}

/// Drives one participant's session: starts and stops capture attempts,
/// lands finished clips, and hands complete sessions to the upload
/// orchestrator. All entry points take `&self`; shared state lives behind
/// locks so the HTTP layer can clone one controller handle around.
pub struct SessionController {
    session: Arc<RwLock<RecordingSession>>,
    store: Arc<dyn PersistenceClient>,
    source: DeviceSource,
    capture_config: CaptureConfig,
    preview_dir: Option<PathBuf>,

    /// The single in-flight capture attempt, if any
    active: Arc<Mutex<Option<ActiveCapture>>>,
    attempt_counter: AtomicU64,

    /// Submission state, visible through `status`. Locked after `session`
    /// whenever both are held.
    upload: Arc<RwLock<UploadPhase>>,
    submit_task: Mutex<Option<JoinHandle<()>>>,
}

impl SessionController {
    pub fn new(
        store: Arc<dyn PersistenceClient>,
        source: DeviceSource,
        capture_config: CaptureConfig,
        preview_dir: Option<PathBuf>,
    ) -> Self {
        Self {
            session: Arc::new(RwLock::new(RecordingSession::new())),
            store,
            source,
            capture_config,
            preview_dir,
            active: Arc::new(Mutex::new(None)),
            attempt_counter: AtomicU64::new(0),
            upload: Arc::new(RwLock::new(UploadPhase::Idle)),
            submit_task: Mutex::new(None),
        }
    }

    /// Start a capture attempt for one slot.
    ///
    /// Returns once recording is running; the attempt then lands on its own,
    /// at the ceiling or on an explicit stop.
    pub async fn start_record(&self, key: SlotKey) -> Result<(), ControlError> {
        // Claim the slot before touching hardware. The submission check sits
        // inside the same lock as the claim, so it cannot interleave with a
        // submit claiming the phase.
        let session_id = {
            let mut session = self.session.write().await;
            self.ensure_not_submitting().await?;
            session.begin_capture(key)?;
            session.id().to_string()
        };

        let device = match CaptureDeviceFactory::create(&self.source, self.capture_config) {
            Ok(device) => device,
            Err(e) => {
                self.session.write().await.abort_capture(key);
                return Err(e.into());
            }
        };

        let handle = match start_clip_capture(device, self.capture_config, CLIP_CEILING).await {
            Ok(handle) => handle,
            Err(e) => {
                self.session.write().await.abort_capture(key);
                return Err(e.into());
            }
        };

        let attempt = self.attempt_counter.fetch_add(1, Ordering::Relaxed);
        {
            let mut active = self.active.lock().await;
            *active = Some(ActiveCapture {
                key,
                attempt,
                stopper: handle.stopper(),
            });
        }

        // The watcher owns the handle and lands the result, whichever way
        // the attempt ends.
        let session = Arc::clone(&self.session);
        let active = Arc::clone(&self.active);
        let preview_dir = self.preview_dir.clone();
        tokio::spawn(async move {
            let result = handle.finish().await;

            {
                let mut active = active.lock().await;
                if matches!(active.as_ref(), Some(a) if a.attempt == attempt) {
                    *active = None;
                }
            }

            let landed = match result {
                Ok(clip) => {
                    let preview = match &preview_dir {
                        Some(dir) => write_preview(dir, &session_id, key, &clip).await,
                        None => None,
                    };
                    Some((clip, preview))
                }
                Err(e) => {
                    error!("Capture attempt for slot {} failed: {}", key, e);
                    None
                }
            };

            let mut session = session.write().await;
            if session.id() != session_id {
                // The session was reset mid-attempt; the clip has no home.
                info!("Discarding clip for slot {}: session was reset", key);
                return;
            }
            match landed {
                Some((clip, preview)) => {
                    if let Err(e) = session.finish_capture(key, clip, preview) {
                        warn!("Could not land clip for slot {}: {}", key, e);
                    }
                }
                None => session.abort_capture(key),
            }
        });

        Ok(())
    }

    /// Stop the attempt running on `key` ahead of the ceiling.
    ///
    /// The attempt still lands through its watcher; callers observe the
    /// captured clip through `status` once it settles.
    pub async fn stop_record(&self, key: SlotKey) -> Result<(), ControlError> {
        self.ensure_not_submitting().await?;

        let active = self.active.lock().await;
        match active.as_ref() {
            Some(a) if a.key == key => {
                a.stopper.stop();
                Ok(())
            }
            _ => Err(SessionError::NotRecording { key }.into()),
        }
    }

    /// Submit the completed session.
    ///
    /// Validates locally, then returns while clips upload in the background;
    /// `status` reports progress and the terminal outcome. A submission that
    /// failed after creating its participant record resumes against that
    /// record instead of creating another.
    pub async fn submit(&self, age: u16) -> Result<(), ControlError> {
        // Validation and the phase claim share one critical section: a second
        // submit arriving mid-validation waits on the locks and then sees
        // Uploading, so only one batch can start at a time.
        let (submission, resume) = {
            let mut session = self.session.write().await;
            let mut upload = self.upload.write().await;
            if matches!(*upload, UploadPhase::Uploading { .. }) {
                return Err(SessionError::SubmissionInProgress.into());
            }
            if let Some(current) = session.recording() {
                return Err(SessionError::AlreadyRecording { current }.into());
            }
            session.set_age(age);
            let submission = Submission::from_session(&session)?;
            let resume = match &*upload {
                UploadPhase::Failed {
                    participant: Some(id),
                    ..
                } => Some(id.clone()),
                _ => None,
            };
            *upload = UploadPhase::Uploading { percent: 0 };
            (submission, resume)
        };

        let store = Arc::clone(&self.store);
        let phase = Arc::clone(&self.upload);
        let (progress_tx, mut progress_rx) = mpsc::channel::<u8>(32);

        let task = tokio::spawn(async move {
            let forwarder = {
                let phase = Arc::clone(&phase);
                tokio::spawn(async move {
                    while let Some(pct) = progress_rx.recv().await {
                        let mut upload = phase.write().await;
                        if let UploadPhase::Uploading { percent } = &mut *upload {
                            if pct > *percent {
                                *percent = pct;
                            }
                        }
                    }
                })
            };

            let result = UploadOrchestrator::new(store)
                .run(submission, resume, progress_tx)
                .await;
            // run dropped its sender, so the forwarder drains and exits.
            if let Err(e) = forwarder.await {
                error!("Progress forwarder panicked: {}", e);
            }

            let mut upload = phase.write().await;
            *upload = match result {
                Ok(receipt) => UploadPhase::Complete {
                    participant: receipt.participant,
                },
                Err(e) => failed_phase(&e),
            };
        });

        let mut slot = self.submit_task.lock().await;
        *slot = Some(task);
        Ok(())
    }

    /// Throw the session away and start a fresh one.
    ///
    /// Any in-flight capture attempt is stopped; its watcher sees the new
    /// session id and discards the clip.
    pub async fn reset(&self) -> Result<(), ControlError> {
        let mut session = self.session.write().await;
        let mut upload = self.upload.write().await;
        if matches!(*upload, UploadPhase::Uploading { .. }) {
            return Err(SessionError::SubmissionInProgress.into());
        }

        {
            let mut active = self.active.lock().await;
            if let Some(a) = active.take() {
                a.stopper.stop();
            }
        }

        *session = RecordingSession::new();
        *upload = UploadPhase::Idle;
        info!("Session reset: {}", session.id());
        Ok(())
    }

    /// Current session view
    pub async fn status(&self) -> SessionStatus {
        let session = self.session.read().await;
        let upload = self.upload.read().await.clone();

        SessionStatus {
            session_id: session.id().to_string(),
            started_at: session.started_at(),
            captured: session.captured_count(),
            required: SlotKey::COUNT,
            complete: session.is_complete(),
            recording: session.recording().map(SlotRef::from),
            age: session.age(),
            clips: session
                .slots()
                .map(|(key, slot)| ClipStatus {
                    digit: key.digit.value(),
                    variant: key.variant.to_string(),
                    label: key.variant.glyph().to_string(),
                    status: slot.status,
                    has_preview: slot.clip.is_some(),
                    duration_ms: slot.clip.as_ref().map(|clip| clip.duration_ms),
                    preview_file: slot.preview.as_ref().map(|p| p.display().to_string()),
                })
                .collect(),
            upload,
        }
    }

    /// Captured clip payload for preview playback, if the slot has one
    pub async fn clip_payload(&self, key: SlotKey) -> Option<(Vec<u8>, String)> {
        let session = self.session.read().await;
        session.slot(key).and_then(|slot| {
            slot.clip
                .as_ref()
                .map(|clip| (clip.payload.clone(), clip.content_type.clone()))
        })
    }

    pub async fn upload_phase(&self) -> UploadPhase {
        self.upload.read().await.clone()
    }

    /// Wait for a running submission to settle. Used on shutdown and by
    /// tests that need the terminal phase.
    pub async fn wait_for_submission(&self) {
        let task = { self.submit_task.lock().await.take() };
        if let Some(task) = task {
            if let Err(e) = task.await {
                error!("Submission task panicked: {}", e);
            }
        }
    }

    /// Reject while a batch is running.
    ///
    /// Session-mutating callers hold the session write lock across this
    /// check; `submit` claims the phase under that same lock, so the check
    /// and the claim cannot interleave.
    async fn ensure_not_submitting(&self) -> Result<(), SessionError> {
        let upload = self.upload.read().await;
        if matches!(*upload, UploadPhase::Uploading { .. }) {
            return Err(SessionError::SubmissionInProgress);
        }
        Ok(())
    }
}

fn failed_phase(error: &SubmitError) -> UploadPhase {
    let (failed_clips, participant) = match error {
        SubmitError::PartialUploadFailure {
            participant,
            failed,
        } => (
            failed.keys().iter().map(|key| key.to_string()).collect(),
            Some(participant.clone()),
        ),
        SubmitError::RecordFinalizationFailed { participant, .. } => {
            (Vec::new(), Some(participant.clone()))
        }
        _ => (Vec::new(), None),
    };
    UploadPhase::Failed {
        error: error.to_string(),
        failed_clips,
        participant,
    }
}

/// Write a clip next to its session for local review. Best effort: a failed
/// preview write never fails the capture itself.
async fn write_preview(
    dir: &Path,
    session_id: &str,
    key: SlotKey,
    clip: &CapturedClip,
) -> Option<PathBuf> {
    let session_dir = dir.join(session_id);
    if let Err(e) = tokio::fs::create_dir_all(&session_dir).await {
        warn!(
            "Failed to create preview dir {}: {}",
            session_dir.display(),
            e
        );
        return None;
    }

    let path = session_dir.join(format!("{key}.wav"));
    let tmp = session_dir.join(format!(".{key}.wav.tmp"));
    if let Err(e) = tokio::fs::write(&tmp, &clip.payload).await {
        warn!("Failed to write preview {}: {}", path.display(), e);
        return None;
    }
    if let Err(e) = tokio::fs::rename(&tmp, &path).await {
        warn!("Failed to finalize preview {}: {}", path.display(), e);
        let _ = tokio::fs::remove_file(&tmp).await;
        return None;
    }
    Some(path)
}
