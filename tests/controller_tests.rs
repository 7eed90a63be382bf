// End-to-end tests for the session controller
//
// These drive the controller the way the HTTP layer does: synthetic audio
// device, scripted persistence, tokio's paused clock where timing matters.
// They cover capture landing, the one-at-a-time rule, the submission freeze,
// and resume.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use digit_corpus::capture::CaptureConfig;
use digit_corpus::session::{
    ControlError, Digit, SessionController, SessionError, SlotKey, SlotStatus, UploadPhase,
    Variant,
};
use digit_corpus::store::{ParticipantId, PersistenceClient, StoreError};
use digit_corpus::upload::SubmitError;
use digit_corpus::DeviceSource;
use tempfile::TempDir;
use tokio::sync::watch;

/// Store that accepts everything and counts what it saw.
#[derive(Default)]
struct CountingStore {
    creates: AtomicUsize,
    uploads: AtomicUsize,
    finalizes: AtomicUsize,
}

#[async_trait::async_trait]
impl PersistenceClient for CountingStore {
    async fn create_participant(
        &self,
        _age: u16,
        _created_at: DateTime<Utc>,
    ) -> Result<ParticipantId, StoreError> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        Ok(ParticipantId::new("9"))
    }

    async fn upload_clip(
        &self,
        _path: &str,
        _payload: Vec<u8>,
        _content_type: &str,
        _overwrite: bool,
    ) -> Result<(), StoreError> {
        self.uploads.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn mark_uploads_complete(&self, _id: &ParticipantId) -> Result<(), StoreError> {
        self.finalizes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Store whose uploads wait until the test opens the gate.
struct GatedStore {
    gate: watch::Receiver<bool>,
    creates: AtomicUsize,
    uploads: AtomicUsize,
}

#[async_trait::async_trait]
impl PersistenceClient for GatedStore {
    async fn create_participant(
        &self,
        _age: u16,
        _created_at: DateTime<Utc>,
    ) -> Result<ParticipantId, StoreError> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        Ok(ParticipantId::new("9"))
    }

    async fn upload_clip(
        &self,
        _path: &str,
        _payload: Vec<u8>,
        _content_type: &str,
        _overwrite: bool,
    ) -> Result<(), StoreError> {
        let mut gate = self.gate.clone();
        let _ = gate.wait_for(|released| *released).await;
        self.uploads.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn mark_uploads_complete(&self, _id: &ParticipantId) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Store that fails named paths exactly once, then succeeds on retry.
struct FlakyStore {
    fail_once: Mutex<HashSet<String>>,
    creates: AtomicUsize,
}

impl FlakyStore {
    fn failing(paths: &[&str]) -> Self {
        Self {
            fail_once: Mutex::new(paths.iter().map(|p| p.to_string()).collect()),
            creates: AtomicUsize::new(0),
        }
    }
}

#[async_trait::async_trait]
impl PersistenceClient for FlakyStore {
    async fn create_participant(
        &self,
        _age: u16,
        _created_at: DateTime<Utc>,
    ) -> Result<ParticipantId, StoreError> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        Ok(ParticipantId::new("77"))
    }

    async fn upload_clip(
        &self,
        path: &str,
        _payload: Vec<u8>,
        _content_type: &str,
        _overwrite: bool,
    ) -> Result<(), StoreError> {
        if self.fail_once.lock().unwrap().remove(path) {
            return Err(StoreError::Remote {
                endpoint: path.to_string(),
                status: 500,
                message: "scripted failure".to_string(),
            });
        }
        Ok(())
    }

    async fn mark_uploads_complete(&self, _id: &ParticipantId) -> Result<(), StoreError> {
        Ok(())
    }
}

fn controller(
    store: Arc<dyn PersistenceClient>,
    preview_dir: Option<PathBuf>,
) -> SessionController {
    SessionController::new(
        store,
        DeviceSource::Synthetic { tone_hz: 440.0 },
        CaptureConfig::default(),
        preview_dir,
    )
}

fn key(digit: u8, variant: Variant) -> SlotKey {
    SlotKey::new(Digit::new(digit).unwrap(), variant)
}

/// Poll status until the slot settles as captured (the watcher lands clips
/// asynchronously after a stop).
async fn wait_settled(controller: &SessionController, key: SlotKey) {
    for _ in 0..100 {
        let status = controller.status().await;
        let slot = status
            .clips
            .iter()
            .find(|c| c.digit == key.digit.value() && c.variant == key.variant.to_string())
            .expect("slot missing from status");
        if slot.status == SlotStatus::Captured && status.recording.is_none() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("slot {key} did not settle");
}

async fn capture_slot(controller: &SessionController, key: SlotKey) {
    controller.start_record(key).await.expect("start failed");
    tokio::time::sleep(Duration::from_millis(300)).await;
    controller.stop_record(key).await.expect("stop failed");
    wait_settled(controller, key).await;
}

async fn capture_all(controller: &SessionController) {
    for key in SlotKey::all() {
        capture_slot(controller, key).await;
    }
}

/// Fill every slot as fast as possible: start, then stop straight away. The
/// landed clips are empty, which is fine for tests that only need a complete
/// session under a real clock.
async fn capture_all_quickly(controller: &SessionController) {
    for key in SlotKey::all() {
        controller.start_record(key).await.expect("start failed");
        controller.stop_record(key).await.expect("stop failed");
        wait_settled(controller, key).await;
    }
}

#[tokio::test(start_paused = true)]
async fn test_record_then_stop_lands_clip_and_preview() -> Result<()> {
    let tmp = TempDir::new()?;
    let controller = controller(
        Arc::new(CountingStore::default()),
        Some(tmp.path().to_path_buf()),
    );
    let target = key(1, Variant::A);

    controller.start_record(target).await?;
    let status = controller.status().await;
    let recording = status.recording.expect("slot should be recording");
    assert_eq!(recording.digit, 1);
    assert_eq!(recording.variant, "a");

    tokio::time::sleep(Duration::from_millis(300)).await;
    controller.stop_record(target).await?;
    wait_settled(&controller, target).await;

    // The clip is playable through the preview endpoint's source.
    let (payload, content_type) = controller
        .clip_payload(target)
        .await
        .expect("captured slot should expose its clip");
    assert_eq!(content_type, "audio/wav");
    assert_eq!(&payload[0..4], b"RIFF");

    // And a review copy landed on disk where status says it did.
    let status = controller.status().await;
    let reported = status
        .clips
        .iter()
        .find(|c| c.digit == 1 && c.variant == "a")
        .and_then(|c| c.preview_file.clone())
        .expect("captured slot should report its preview file");
    assert_eq!(
        PathBuf::from(&reported),
        tmp.path().join(&status.session_id).join("1a.wav")
    );
    assert!(
        PathBuf::from(&reported).exists(),
        "missing preview at {reported}"
    );

    assert_eq!(status.captured, 1);
    assert!(!status.complete);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_second_record_while_recording_is_rejected() -> Result<()> {
    let controller = controller(Arc::new(CountingStore::default()), None);
    let first = key(1, Variant::A);

    controller.start_record(first).await?;
    let err = controller.start_record(key(1, Variant::B)).await.unwrap_err();
    match err {
        ControlError::Session(SessionError::AlreadyRecording { current }) => {
            assert_eq!(current, first);
        }
        other => panic!("expected AlreadyRecording, got {other:?}"),
    }

    controller.stop_record(first).await?;
    wait_settled(&controller, first).await;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_stop_on_an_idle_slot_is_rejected() {
    let controller = controller(Arc::new(CountingStore::default()), None);

    let err = controller.stop_record(key(5, Variant::C)).await.unwrap_err();
    assert!(matches!(
        err,
        ControlError::Session(SessionError::NotRecording { .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn test_unstopped_attempt_lands_at_the_ceiling() -> Result<()> {
    let controller = controller(Arc::new(CountingStore::default()), None);
    let target = key(8, Variant::B);

    controller.start_record(target).await?;
    // Never stop; the three second ceiling plus landing slack.
    tokio::time::sleep(Duration::from_secs(4)).await;

    let status = controller.status().await;
    assert!(status.recording.is_none());
    assert_eq!(status.captured, 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_reset_discards_an_inflight_attempt() -> Result<()> {
    let controller = controller(Arc::new(CountingStore::default()), None);

    controller.start_record(key(3, Variant::A)).await?;
    let old_id = controller.status().await.session_id;

    controller.reset().await?;

    let status = controller.status().await;
    assert_ne!(status.session_id, old_id);
    assert_eq!(status.captured, 0);
    assert!(status.recording.is_none());

    // Give the abandoned attempt time to finish; its clip must not leak
    // into the new session.
    tokio::time::sleep(Duration::from_secs(4)).await;
    let status = controller.status().await;
    assert_eq!(status.captured, 0);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_rerecord_replaces_the_landed_clip() -> Result<()> {
    let controller = controller(Arc::new(CountingStore::default()), None);
    let target = key(2, Variant::C);

    // First take: short.
    controller.start_record(target).await?;
    tokio::time::sleep(Duration::from_millis(300)).await;
    controller.stop_record(target).await?;
    wait_settled(&controller, target).await;
    let first = controller.status().await;
    let first_duration = first
        .clips
        .iter()
        .find(|c| c.digit == 2 && c.variant == "c")
        .and_then(|c| c.duration_ms)
        .expect("first take missing duration");

    // Second take: noticeably longer.
    controller.start_record(target).await?;
    tokio::time::sleep(Duration::from_millis(1500)).await;
    controller.stop_record(target).await?;
    wait_settled(&controller, target).await;
    let second = controller.status().await;
    let second_duration = second
        .clips
        .iter()
        .find(|c| c.digit == 2 && c.variant == "c")
        .and_then(|c| c.duration_ms)
        .expect("second take missing duration");

    assert!(
        second_duration > first_duration,
        "expected the re-record to replace the clip ({first_duration}ms -> {second_duration}ms)"
    );
    assert_eq!(second.captured, 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_submit_rejects_an_incomplete_session() -> Result<()> {
    let store = Arc::new(CountingStore::default());
    let controller = controller(store.clone(), None);

    capture_slot(&controller, key(1, Variant::A)).await;

    let err = controller.submit(30).await.unwrap_err();
    assert!(matches!(
        err,
        ControlError::Submit(SubmitError::Incomplete {
            captured: 1,
            required: 27
        })
    ));

    // Nothing remote happened and the phase never left idle.
    assert_eq!(store.creates.load(Ordering::SeqCst), 0);
    assert!(matches!(
        controller.upload_phase().await,
        UploadPhase::Idle
    ));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_complete_session_uploads_and_reports_success() -> Result<()> {
    let store = Arc::new(CountingStore::default());
    let controller = controller(store.clone(), None);

    capture_all(&controller).await;
    let status = controller.status().await;
    assert!(status.complete);

    controller.submit(25).await?;
    controller.wait_for_submission().await;

    match controller.upload_phase().await {
        UploadPhase::Complete { participant } => {
            assert_eq!(participant, ParticipantId::new("9"));
        }
        other => panic!("expected Complete, got {other:?}"),
    }
    assert_eq!(store.creates.load(Ordering::SeqCst), 1);
    assert_eq!(store.uploads.load(Ordering::SeqCst), 27);
    assert_eq!(store.finalizes.load(Ordering::SeqCst), 1);

    // Age is kept on the session it was submitted with.
    assert_eq!(controller.status().await.age, Some(25));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_session_is_frozen_while_uploading() -> Result<()> {
    let (gate_tx, gate_rx) = watch::channel(false);
    let store = Arc::new(GatedStore {
        gate: gate_rx,
        creates: AtomicUsize::new(0),
        uploads: AtomicUsize::new(0),
    });
    let controller = controller(store.clone(), None);

    capture_all(&controller).await;
    controller.submit(40).await?;

    assert!(matches!(
        controller.upload_phase().await,
        UploadPhase::Uploading { .. }
    ));

    // Every mutation is refused mid-upload.
    for err in [
        controller.start_record(key(1, Variant::A)).await.unwrap_err(),
        controller.reset().await.unwrap_err(),
        controller.submit(40).await.unwrap_err(),
    ] {
        assert!(matches!(
            err,
            ControlError::Session(SessionError::SubmissionInProgress)
        ));
    }

    // Open the gate; the submission settles and the freeze lifts.
    gate_tx.send(true).unwrap();
    controller.wait_for_submission().await;

    assert!(matches!(
        controller.upload_phase().await,
        UploadPhase::Complete { .. }
    ));
    assert_eq!(store.uploads.load(Ordering::SeqCst), 27);
    controller.start_record(key(1, Variant::A)).await?;
    controller.stop_record(key(1, Variant::A)).await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_simultaneous_submits_create_one_participant() -> Result<()> {
    let (gate_tx, gate_rx) = watch::channel(false);
    let store = Arc::new(GatedStore {
        gate: gate_rx,
        creates: AtomicUsize::new(0),
        uploads: AtomicUsize::new(0),
    });
    let controller = Arc::new(controller(store.clone(), None));

    capture_all_quickly(&controller).await;

    // Two submits race from separate tasks; only one may claim the phase.
    let first = {
        let controller = Arc::clone(&controller);
        tokio::spawn(async move { controller.submit(30).await })
    };
    let second = {
        let controller = Arc::clone(&controller);
        tokio::spawn(async move { controller.submit(30).await })
    };
    let (first, second) = (first.await?, second.await?);

    let accepted = [&first, &second].iter().filter(|r| r.is_ok()).count();
    assert_eq!(
        accepted, 1,
        "exactly one submit may win: {first:?} / {second:?}"
    );
    let loser = if first.is_err() { first } else { second };
    assert!(matches!(
        loser.unwrap_err(),
        ControlError::Session(SessionError::SubmissionInProgress)
    ));
    assert_eq!(store.creates.load(Ordering::SeqCst), 1);

    // The winning batch settles normally once the gate opens.
    gate_tx.send(true).unwrap();
    controller.wait_for_submission().await;
    assert!(matches!(
        controller.upload_phase().await,
        UploadPhase::Complete { .. }
    ));
    assert_eq!(store.creates.load(Ordering::SeqCst), 1);
    assert_eq!(store.uploads.load(Ordering::SeqCst), 27);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_resubmit_after_partial_failure_resumes_the_same_record() -> Result<()> {
    let store = Arc::new(FlakyStore::failing(&["number_4/person77_var2.wav"]));
    let controller = controller(store.clone(), None);

    capture_all(&controller).await;

    // First attempt: one clip fails, the record stays unfinalized.
    controller.submit(30).await?;
    controller.wait_for_submission().await;
    match controller.upload_phase().await {
        UploadPhase::Failed {
            failed_clips,
            participant,
            ..
        } => {
            assert_eq!(failed_clips, vec!["4b".to_string()]);
            assert_eq!(participant, Some(ParticipantId::new("77")));
        }
        other => panic!("expected Failed, got {other:?}"),
    }

    // Second attempt: same participant record, no duplicate.
    controller.submit(30).await?;
    controller.wait_for_submission().await;
    assert!(matches!(
        controller.upload_phase().await,
        UploadPhase::Complete { .. }
    ));
    assert_eq!(store.creates.load(Ordering::SeqCst), 1);
    Ok(())
}
