use std::fmt;
use std::ops::RangeInclusive;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{error, info};

use crate::session::{RecordingSession, SlotKey};
use crate::store::{clip_path, ParticipantId, PersistenceClient, StoreError};

/// Accepted participant ages
pub const AGE_RANGE: RangeInclusive<u16> = 0..=120;

/// Errors a submission can end in
#[derive(Debug, Error)]
pub enum SubmitError {
    /// Not every slot holds a clip; nothing was sent.
    #[error("session incomplete: {captured} of {required} clips captured")]
    Incomplete { captured: usize, required: usize },

    /// The participant metadata is unusable; nothing was sent.
    #[error("invalid participant metadata: {detail}")]
    InvalidMetadata { detail: String },

    /// The participant record could not be created; no clips were sent.
    #[error("could not create participant record: {source}")]
    RecordCreationFailed {
        #[source]
        source: StoreError,
    },

    /// Some clips failed to land. The participant record exists but was left
    /// unfinalized; re-submitting resumes against it.
    #[error("upload failed for {n} clips: {failed}", n = .failed.len())]
    PartialUploadFailure {
        participant: ParticipantId,
        failed: FailedClips,
    },

    /// Every clip landed but the record could not be marked complete.
    #[error("clips uploaded but the participant record could not be finalized: {source}")]
    RecordFinalizationFailed {
        participant: ParticipantId,
        #[source]
        source: StoreError,
    },
}

/// Slot keys whose upload failed, in prompt order
#[derive(Debug, Clone)]
pub struct FailedClips(Vec<SlotKey>);

impl FailedClips {
    pub fn keys(&self) -> &[SlotKey] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<SlotKey>> for FailedClips {
    fn from(mut keys: Vec<SlotKey>) -> Self {
        keys.sort();
        Self(keys)
    }
}

impl fmt::Display for FailedClips {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for key in &self.0 {
            if !first {
                f.write_str(", ")?;
            }
            write!(f, "{}", key)?;
            first = false;
        }
        Ok(())
    }
}

/// One clip ready to ship
#[derive(Debug)]
pub struct SubmissionClip {
    pub key: SlotKey,
    pub payload: Vec<u8>,
    pub content_type: String,
}

/// Validated snapshot of a complete session, detached from session locks so
/// uploads run against frozen data.
#[derive(Debug)]
pub struct Submission {
    pub age: u16,
    pub created_at: DateTime<Utc>,
    pub clips: Vec<SubmissionClip>,
}

impl Submission {
    /// Snapshot a session for upload.
    ///
    /// Completeness is checked before metadata so a participant is told
    /// about missing clips first. No remote calls happen here.
    pub fn from_session(session: &RecordingSession) -> Result<Self, SubmitError> {
        let captured = session.captured_count();
        if captured < SlotKey::COUNT {
            return Err(SubmitError::Incomplete {
                captured,
                required: SlotKey::COUNT,
            });
        }

        let age = match session.age() {
            None => {
                return Err(SubmitError::InvalidMetadata {
                    detail: "participant age is required".to_string(),
                })
            }
            Some(age) if !AGE_RANGE.contains(&age) => {
                return Err(SubmitError::InvalidMetadata {
                    detail: format!(
                        "age {} outside accepted range {}-{}",
                        age,
                        AGE_RANGE.start(),
                        AGE_RANGE.end()
                    ),
                })
            }
            Some(age) => age,
        };

        let clips: Vec<SubmissionClip> = session
            .slots()
            .filter_map(|(key, slot)| {
                slot.clip.as_ref().map(|clip| SubmissionClip {
                    key,
                    payload: clip.payload.clone(),
                    content_type: clip.content_type.clone(),
                })
            })
            .collect();

        Ok(Self {
            age,
            created_at: Utc::now(),
            clips,
        })
    }
}

/// Successful submission outcome
#[derive(Debug, Clone)]
pub struct SubmitReceipt {
    pub participant: ParticipantId,
    pub uploaded: usize,
}

/// Drives the submission protocol: create the participant record, ship every
/// clip concurrently, then mark the record complete only if all clips landed.
pub struct UploadOrchestrator {
    store: Arc<dyn PersistenceClient>,
}

impl UploadOrchestrator {
    pub fn new(store: Arc<dyn PersistenceClient>) -> Self {
        Self { store }
    }

    /// Run one submission to a terminal outcome.
    ///
    /// `resume` reuses the participant record of a previously failed run
    /// instead of creating a second one; clip names are stable, so re-sent
    /// clips overwrite their earlier copies.
    ///
    /// Progress percentages (floor of completed/total, ending at 100) arrive
    /// on `progress` in nondecreasing order.
    pub async fn run(
        &self,
        submission: Submission,
        resume: Option<ParticipantId>,
        progress: mpsc::Sender<u8>,
    ) -> Result<SubmitReceipt, SubmitError> {
        let total = submission.clips.len();

        let participant = match resume {
            Some(id) => {
                info!("Resuming submission for participant {}", id);
                id
            }
            None => self
                .store
                .create_participant(submission.age, submission.created_at)
                .await
                .map_err(|source| SubmitError::RecordCreationFailed { source })?,
        };

        info!(
            "Uploading {} clips for participant {}",
            total, participant
        );

        // Completions fan into one counter so reported progress is monotonic
        // no matter how the upload futures interleave.
        let (done_tx, mut done_rx) = mpsc::unbounded_channel::<()>();

        let uploads = join_all(submission.clips.iter().map(|clip| {
            let store = Arc::clone(&self.store);
            let participant = participant.clone();
            let done = done_tx.clone();
            async move {
                let path = clip_path(&participant, clip.key, &clip.content_type);
                match store
                    .upload_clip(&path, clip.payload.clone(), &clip.content_type, true)
                    .await
                {
                    Ok(()) => {
                        let _ = done.send(());
                        None
                    }
                    Err(e) => {
                        error!("Upload of {} failed: {}", path, e);
                        Some(clip.key)
                    }
                }
            }
        }));
        drop(done_tx);

        let aggregator = async {
            let mut completed = 0usize;
            while done_rx.recv().await.is_some() {
                completed += 1;
                let percent = (completed * 100 / total) as u8;
                let _ = progress.send(percent).await;
            }
        };

        let (outcomes, ()) = tokio::join!(uploads, aggregator);

        let failed: Vec<SlotKey> = outcomes.into_iter().flatten().collect();
        if !failed.is_empty() {
            return Err(SubmitError::PartialUploadFailure {
                participant,
                failed: FailedClips::from(failed),
            });
        }

        if let Err(source) = self.store.mark_uploads_complete(&participant).await {
            return Err(SubmitError::RecordFinalizationFailed {
                participant,
                source,
            });
        }

        info!(
            "Submission complete: {} clips for participant {}",
            total, participant
        );
        Ok(SubmitReceipt {
            participant,
            uploaded: total,
        })
    }
}
