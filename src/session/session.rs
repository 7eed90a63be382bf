use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use super::slot::{ClipSlot, SlotKey, SlotStatus};
use crate::capture::CapturedClip;

/// Errors for invalid session state transitions
#[derive(Debug, Error)]
pub enum SessionError {
    /// Some slot already has an active capture attempt.
    #[error("slot {current} is currently recording")]
    AlreadyRecording { current: SlotKey },

    /// Stop or finish arrived for a slot with no active attempt.
    #[error("slot {key} is not recording")]
    NotRecording { key: SlotKey },

    /// A submission is running; the session is read-only until it settles.
    #[error("a submission is in progress; the session cannot be modified until it finishes")]
    SubmissionInProgress,
}

/// One participant's collection run: the 27 clip slots (digits 1-9, three
/// styles each), the participant age once provided, and which slot (if any)
/// currently has an active capture attempt.
pub struct RecordingSession {
    /// Stable identifier for logs and preview paths
    id: String,

    /// All 27 slots, keyed digit-major
    slots: BTreeMap<SlotKey, ClipSlot>,

    /// Participant age, provided at submission time
    age: Option<u16>,

    /// When the session was created
    started_at: DateTime<Utc>,
}

impl RecordingSession {
    /// Create a fresh session with every slot empty
    pub fn new() -> Self {
        let id = format!("session-{}", Uuid::new_v4());
        info!("Created recording session: {}", id);
        Self {
            id,
            slots: SlotKey::all().map(|key| (key, ClipSlot::default())).collect(),
            age: None,
            started_at: Utc::now(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn age(&self) -> Option<u16> {
        self.age
    }

    pub fn set_age(&mut self, age: u16) {
        self.age = Some(age);
    }

    /// Slot currently recording, if any
    pub fn recording(&self) -> Option<SlotKey> {
        self.slots
            .iter()
            .find(|(_, slot)| slot.status == SlotStatus::Recording)
            .map(|(key, _)| *key)
    }

    /// Move a slot to Recording. Only one slot may record at a time.
    ///
    /// Starting over a captured slot keeps the previous clip in place until
    /// the new attempt actually finishes.
    pub fn begin_capture(&mut self, key: SlotKey) -> Result<(), SessionError> {
        if let Some(current) = self.recording() {
            return Err(SessionError::AlreadyRecording { current });
        }
        self.slot_mut(key).status = SlotStatus::Recording;
        debug!("Slot {} recording", key);
        Ok(())
    }

    /// Land a finished clip in its slot, replacing any prior clip
    pub fn finish_capture(
        &mut self,
        key: SlotKey,
        clip: CapturedClip,
        preview: Option<PathBuf>,
    ) -> Result<(), SessionError> {
        let slot = self.slot_mut(key);
        if slot.status != SlotStatus::Recording {
            return Err(SessionError::NotRecording { key });
        }
        slot.status = SlotStatus::Captured;
        slot.clip = Some(clip);
        slot.preview = preview;
        let captured = self.captured_count();
        info!("Slot {} captured ({}/{} clips)", key, captured, SlotKey::COUNT);
        Ok(())
    }

    /// Abandon a recording attempt: the slot falls back to its previous clip
    /// if one exists, otherwise to empty
    pub fn abort_capture(&mut self, key: SlotKey) {
        let slot = self.slot_mut(key);
        if slot.status == SlotStatus::Recording {
            slot.status = if slot.clip.is_some() {
                SlotStatus::Captured
            } else {
                SlotStatus::Empty
            };
            debug!("Slot {} capture abandoned", key);
        }
    }

    pub fn slot(&self, key: SlotKey) -> Option<&ClipSlot> {
        self.slots.get(&key)
    }

    /// All slots in prompt order
    pub fn slots(&self) -> impl Iterator<Item = (SlotKey, &ClipSlot)> {
        self.slots.iter().map(|(key, slot)| (*key, slot))
    }

    /// Number of slots holding a settled clip. A slot being re-recorded does
    /// not count until its attempt settles.
    pub fn captured_count(&self) -> usize {
        self.slots
            .values()
            .filter(|slot| slot.status == SlotStatus::Captured)
            .count()
    }

    /// True once every slot holds a settled clip
    pub fn is_complete(&self) -> bool {
        self.captured_count() == SlotKey::COUNT
    }

    fn slot_mut(&mut self, key: SlotKey) -> &mut ClipSlot {
        self.slots.entry(key).or_default()
    }
}

impl Default for RecordingSession {
    fn default() -> Self {
        Self::new()
    }
}
