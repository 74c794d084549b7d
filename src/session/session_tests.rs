use super::{ConfirmationToken, SessionPhase, SessionResult, WipeSessionController};
use crate::backup::BackupEncryptor;
use crate::certificate::{CertificateIssuer, CertificateStore, CertificateVerifier, SignatureAlgorithm};
use crate::devices::{DeviceProbe, DeviceRegistry};
use crate::engine::{SanitizationEngine, SimulatedMedium, SimulatedMediumProvider};
use crate::{
    Device, DeviceStatus, DeviceType, ErrorClass, Operator, OperatorRole, SessionStatus,
    WipeError, WipeMode, WipeResult,
};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const SERIAL: &str = "SN-100";

struct OneDeviceProbe(Device);

impl DeviceProbe for OneDeviceProbe {
    fn scan(&self) -> WipeResult<Vec<Device>> {
        Ok(vec![self.0.clone()])
    }
}

struct Harness {
    controller: WipeSessionController,
    registry: Arc<DeviceRegistry>,
    media: Arc<SimulatedMediumProvider>,
    store: Arc<CertificateStore>,
    verifier: CertificateVerifier,
    device_id: String,
    _staging: TempDir,
}

fn harness() -> Harness {
    harness_with(|encryptor| encryptor)
}

fn harness_with(tune_backup: impl FnOnce(BackupEncryptor) -> BackupEncryptor) -> Harness {
    let device = Device::new("Test Phone", SERIAL, DeviceType::Phone, 8192).with_files_detected(2);
    let registry = Arc::new(DeviceRegistry::new(Box::new(OneDeviceProbe(device))));
    let device_id = registry.discover().unwrap()[0].id.clone();

    let media = Arc::new(SimulatedMediumProvider::new(8192));
    media.insert(
        SERIAL,
        SimulatedMedium::new(8192)
            .with_item("Documents/Personal/notes.txt", vec![1u8; 700])
            .with_item("Photos/Camera/img.jpg", vec![2u8; 900]),
    );

    let staging = TempDir::new().unwrap();
    let backup = Arc::new(tune_backup(
        BackupEncryptor::with_generated_key(staging.path()).unwrap(),
    ));

    let (issuer, _pkcs8) = CertificateIssuer::generate(SignatureAlgorithm::EcdsaP384).unwrap();
    let verifier =
        CertificateVerifier::new().with_trusted_key(issuer.algorithm(), issuer.public_key());
    let issuer = Arc::new(issuer);
    let store = Arc::new(CertificateStore::in_memory().unwrap());

    let controller = WipeSessionController::new(
        registry.clone(),
        media.clone(),
        backup,
        issuer,
        store.clone(),
        Operator::new("Security Administrator", OperatorRole::Admin),
    )
    .with_engine(SanitizationEngine::new().with_chunk_size(1024));

    Harness {
        controller,
        registry,
        media,
        store,
        verifier,
        device_id,
        _staging: staging,
    }
}

async fn wait_for_terminal(controller: &WipeSessionController) -> SessionResult {
    for _ in 0..500 {
        match controller.result() {
            SessionResult::InProgress => tokio::time::sleep(Duration::from_millis(10)).await,
            terminal => return terminal,
        }
    }
    panic!("session did not reach a terminal state in time");
}

// ==================== CONFIRMATION GATING ====================

#[tokio::test]
async fn test_wrong_token_leaves_everything_unchanged() {
    let h = harness();
    h.controller.start_setup(&h.device_id).unwrap();
    h.controller
        .update_setup(WipeMode::Complete, Vec::new(), false)
        .unwrap();

    for token in ["", "Confirm", "CONFIRM", "delete", "yes"] {
        let result = h.controller.confirm(&ConfirmationToken::new(token));
        assert!(matches!(result, Err(WipeError::InvalidConfirmation)));
    }

    // No partial progress: session still configurable, device untouched,
    // nothing issued.
    assert_eq!(h.controller.progress().phase, SessionPhase::Setup);
    let session = h.controller.session().unwrap();
    assert_eq!(session.status, SessionStatus::Pending);
    assert_eq!(session.mode, WipeMode::Complete);
    assert_eq!(
        h.registry.get(&h.device_id).unwrap().status,
        DeviceStatus::Ready
    );
    assert_eq!(h.store.count().unwrap(), 0);
    h.controller
        .update_setup(WipeMode::Complete, Vec::new(), true)
        .unwrap();
}

#[tokio::test]
async fn test_selective_mode_requires_selection_at_confirm() {
    let h = harness();
    h.controller.start_setup(&h.device_id).unwrap();
    h.controller
        .update_setup(WipeMode::Selective, Vec::new(), false)
        .unwrap();

    let result = h.controller.confirm(&ConfirmationToken::new("confirm"));
    assert!(matches!(result, Err(WipeError::InvalidSetup(_))));
    assert_eq!(h.controller.progress().phase, SessionPhase::Setup);
}

// ==================== THE COMPLETE-WIPE SCENARIO ====================

#[tokio::test]
async fn test_complete_wipe_issues_a_verifiable_certificate() {
    let h = harness();
    h.controller.start_setup(&h.device_id).unwrap();
    h.controller
        .update_setup(WipeMode::Complete, Vec::new(), false)
        .unwrap();
    h.controller.confirm(&ConfirmationToken::new("confirm")).unwrap();

    let certificate = match wait_for_terminal(&h.controller).await {
        SessionResult::Completed(certificate) => certificate,
        other => panic!("expected completion, got {:?}", other),
    };

    assert_eq!(certificate.device_serial, SERIAL);
    assert_eq!(certificate.wipe_mode, "Complete Device Wipe");
    assert!(!certificate.backup_created);
    assert!(h.verifier.verify(&certificate));

    // Completed implies exactly one persisted certificate for this device.
    assert_eq!(h.store.count().unwrap(), 1);
    let stored = h.store.get(&certificate.certificate_id).unwrap().unwrap();
    assert_eq!(stored, certificate);

    let session = h.controller.session().unwrap();
    assert_eq!(session.status, SessionStatus::Completed);
    assert!(session.certificate_issued);
    // Millisecond truncation of the certificate timestamp allows a little
    // slack against the untruncated start time.
    let window = (session.started_at.unwrap(), session.completed_at.unwrap());
    assert!(window.0 - chrono::Duration::milliseconds(10) <= certificate.timestamp);
    assert!(certificate.timestamp <= window.1 + chrono::Duration::seconds(1));

    assert_eq!(
        h.registry.get(&h.device_id).unwrap().status,
        DeviceStatus::Completed
    );
    assert_eq!(h.controller.progress().phase, SessionPhase::Completed);
    assert_eq!(h.controller.progress().percent, 100);

    // The medium was actually overwritten (single pass writes zeros).
    let medium = h.media.medium_for(SERIAL).unwrap();
    assert!(medium.surface_snapshot().iter().all(|&b| b == 0x00));
}

#[tokio::test]
async fn test_selective_wipe_unlinks_and_certifies() {
    let h = harness();
    h.controller.start_setup(&h.device_id).unwrap();
    h.controller
        .update_setup(
            WipeMode::Selective,
            vec!["Documents/Personal/notes.txt".to_string()],
            false,
        )
        .unwrap();
    h.controller.confirm(&ConfirmationToken::new("confirm")).unwrap();

    let certificate = match wait_for_terminal(&h.controller).await {
        SessionResult::Completed(certificate) => certificate,
        other => panic!("expected completion, got {:?}", other),
    };
    assert_eq!(certificate.wipe_mode, "Selective File Wipe");

    let medium = h.media.medium_for(SERIAL).unwrap();
    assert!(!medium.item_exists("Documents/Personal/notes.txt"));
    assert!(medium.item_exists("Photos/Camera/img.jpg"));
}

// ==================== LOCKING & MUTUAL EXCLUSION ====================

#[tokio::test]
async fn test_setup_is_locked_after_confirmation() {
    let h = harness();
    h.controller.start_setup(&h.device_id).unwrap();
    h.controller
        .update_setup(WipeMode::Complete, Vec::new(), false)
        .unwrap();
    h.controller.confirm(&ConfirmationToken::new("confirm")).unwrap();

    let result = h.controller.update_setup(WipeMode::Selective, vec!["x".into()], true);
    assert!(matches!(result, Err(WipeError::SessionLocked)));

    let result = h.controller.confirm(&ConfirmationToken::new("confirm"));
    assert!(matches!(result, Err(WipeError::SessionLocked)));

    wait_for_terminal(&h.controller).await;
}

#[tokio::test]
async fn test_start_setup_fails_while_session_runs() {
    let h = harness();
    h.controller.start_setup(&h.device_id).unwrap();
    h.controller
        .update_setup(WipeMode::Complete, Vec::new(), false)
        .unwrap();
    let session_id = h.controller.session().unwrap().id;
    h.controller.confirm(&ConfirmationToken::new("confirm")).unwrap();

    let result = h.controller.start_setup(&h.device_id);
    assert!(matches!(result, Err(WipeError::SessionInProgress)));
    // The running session is untouched by the rejected start.
    assert_eq!(h.controller.session().unwrap().id, session_id);

    wait_for_terminal(&h.controller).await;

    // After the terminal state a new session may start.
    h.controller.start_setup(&h.device_id).unwrap();
}

// ==================== BACKUP PATH ====================

#[tokio::test]
async fn test_backup_runs_before_wipe_and_is_recorded() {
    let h = harness();
    h.controller.start_setup(&h.device_id).unwrap();
    h.controller
        .update_setup(WipeMode::Complete, Vec::new(), true)
        .unwrap();
    h.controller.confirm(&ConfirmationToken::new("confirm")).unwrap();

    let certificate = match wait_for_terminal(&h.controller).await {
        SessionResult::Completed(certificate) => certificate,
        other => panic!("expected completion, got {:?}", other),
    };

    assert!(certificate.backup_created);
    let record = h.controller.backup_record().expect("backup record exists");
    assert!(record.completed);
    assert_eq!(record.algorithm, "AES-256-GCM");
    assert!(record.location.join("manifest.json").exists());
}

#[tokio::test]
async fn test_backup_failure_fails_session_without_certificate() {
    let h = harness_with(|encryptor| encryptor.fail_after_items(1));
    h.controller.start_setup(&h.device_id).unwrap();
    h.controller
        .update_setup(WipeMode::Complete, Vec::new(), true)
        .unwrap();
    h.controller.confirm(&ConfirmationToken::new("confirm")).unwrap();

    let reason = match wait_for_terminal(&h.controller).await {
        SessionResult::Failed(reason) => reason,
        other => panic!("expected failure, got {:?}", other),
    };
    assert_eq!(reason.class, ErrorClass::Resource);

    assert_eq!(h.controller.session().unwrap().status, SessionStatus::Failed);
    assert_eq!(
        h.registry.get(&h.device_id).unwrap().status,
        DeviceStatus::Error
    );
    assert!(h.controller.backup_record().is_none());
    assert_eq!(h.store.count().unwrap(), 0);

    // The medium was never written: sanitization must not start after a
    // failed backup gate.
    let medium = h.media.medium_for(SERIAL).unwrap();
    assert!(medium.item_exists("Documents/Personal/notes.txt"));
}

// ==================== FAILURE & CANCELLATION ====================

#[tokio::test]
async fn test_disconnect_fails_session_and_marks_device_error() {
    let h = harness();
    h.media.medium_for(SERIAL).unwrap().disconnect();

    h.controller.start_setup(&h.device_id).unwrap();
    h.controller
        .update_setup(WipeMode::Complete, Vec::new(), false)
        .unwrap();
    h.controller.confirm(&ConfirmationToken::new("confirm")).unwrap();

    let reason = match wait_for_terminal(&h.controller).await {
        SessionResult::Failed(reason) => reason,
        other => panic!("expected failure, got {:?}", other),
    };
    assert_eq!(reason.class, ErrorClass::Resource);
    assert_eq!(
        h.registry.get(&h.device_id).unwrap().status,
        DeviceStatus::Error
    );
    assert_eq!(h.store.count().unwrap(), 0);
    assert_eq!(h.controller.progress().phase, SessionPhase::Failed);
}

#[tokio::test]
async fn test_cancellation_results_in_failed_never_completed() {
    let h = harness();
    h.controller.start_setup(&h.device_id).unwrap();
    h.controller
        .update_setup(WipeMode::Complete, Vec::new(), false)
        .unwrap();

    // Request cancellation before the pipeline starts; the engine honors it
    // at its first safe checkpoint.
    h.controller.cancel();
    h.controller.confirm(&ConfirmationToken::new("confirm")).unwrap();

    match wait_for_terminal(&h.controller).await {
        SessionResult::Failed(reason) => {
            assert!(reason.message.to_lowercase().contains("cancelled"));
        }
        other => panic!("cancelled session must fail, got {:?}", other),
    }
    assert_eq!(h.controller.session().unwrap().status, SessionStatus::Failed);
}

// ==================== PROGRESS ====================

#[tokio::test]
async fn test_progress_is_monotone_within_each_phase() {
    let h = harness();
    h.controller.start_setup(&h.device_id).unwrap();
    h.controller
        .update_setup(WipeMode::Complete, Vec::new(), true)
        .unwrap();
    h.controller.confirm(&ConfirmationToken::new("confirm")).unwrap();

    let mut observations: Vec<(SessionPhase, u8)> = Vec::new();
    loop {
        let progress = h.controller.progress();
        observations.push((progress.phase, progress.percent));
        if let SessionResult::Completed(_) | SessionResult::Failed(_) = h.controller.result() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }

    for pair in observations.windows(2) {
        if pair[0].0 == pair[1].0 {
            assert!(
                pair[0].1 <= pair[1].1,
                "progress went backwards within {:?}",
                pair[0].0
            );
        }
    }
}
