// Tests for the shared core types: error taxonomy, classification, device
// and session models, serde representations.

use super::*;

// ==================== ERROR CLASSIFICATION TESTS ====================

#[test]
fn test_validation_errors_classify_as_validation() {
    assert_eq!(
        WipeError::InvalidSetup("bad".into()).class(),
        ErrorClass::Validation
    );
    assert_eq!(
        WipeError::InvalidConfirmation.class(),
        ErrorClass::Validation
    );
}

#[test]
fn test_resource_errors_classify_as_resource() {
    assert_eq!(
        WipeError::DeviceNotFound("x".into()).class(),
        ErrorClass::Resource
    );
    assert_eq!(
        WipeError::DeviceDisconnected("x".into()).class(),
        ErrorClass::Resource
    );
    assert_eq!(
        WipeError::BackupStorage("disk full".into()).class(),
        ErrorClass::Resource
    );
    assert_eq!(
        WipeError::Encryption("seal failed".into()).class(),
        ErrorClass::Resource
    );
    assert_eq!(WipeError::Cancelled.class(), ErrorClass::Resource);
}

#[test]
fn test_integrity_errors_classify_as_integrity() {
    assert_eq!(
        WipeError::VerificationMismatch("chunk 3".into()).class(),
        ErrorClass::Integrity
    );
    assert_eq!(
        WipeError::BackupIntegrity("tag mismatch".into()).class(),
        ErrorClass::Integrity
    );
    assert_eq!(WipeError::SignatureInvalid.class(), ErrorClass::Integrity);
}

#[test]
fn test_concurrency_errors_classify_as_concurrency() {
    assert_eq!(
        WipeError::SessionInProgress.class(),
        ErrorClass::Concurrency
    );
    assert_eq!(WipeError::SessionLocked.class(), ErrorClass::Concurrency);
}

#[test]
fn test_fatality_per_class() {
    assert!(!ErrorClass::Validation.is_fatal_to_session());
    assert!(!ErrorClass::Concurrency.is_fatal_to_session());
    assert!(ErrorClass::Resource.is_fatal_to_session());
    assert!(ErrorClass::Integrity.is_fatal_to_session());
}

#[test]
fn test_failure_reason_carries_class_and_message() {
    let err = WipeError::VerificationMismatch("offset 512".into());
    let reason = FailureReason::from(&err);
    assert_eq!(reason.class, ErrorClass::Integrity);
    assert!(reason.message.contains("offset 512"));
    assert!(reason.to_string().contains("Integrity"));
}

// ==================== MODEL TESTS ====================

#[test]
fn test_device_builder_defaults() {
    let device = Device::new("Pixel 8", "PX8-001", DeviceType::Phone, 128 << 30)
        .with_platform(Platform::Android)
        .with_files_detected(1200);
    assert_eq!(device.status, DeviceStatus::Connected);
    assert_eq!(device.platform, Some(Platform::Android));
    assert_eq!(device.files_detected, 1200);
    assert!(!device.id.is_empty());
}

#[test]
fn test_wipe_mode_labels() {
    assert_eq!(WipeMode::Complete.label(), "Complete Device Wipe");
    assert_eq!(WipeMode::Selective.label(), "Selective File Wipe");
}

#[test]
fn test_session_defaults_and_terminality() {
    let mut session = WipeSession::new("device-1");
    assert_eq!(session.status, SessionStatus::Pending);
    assert!(!session.is_terminal());
    assert!(!session.certificate_issued);

    session.status = SessionStatus::Completed;
    assert!(session.is_terminal());
    session.status = SessionStatus::Failed;
    assert!(session.is_terminal());
}

#[test]
fn test_device_type_serde_representation() {
    let json = serde_json::to_value(DeviceType::ExternalDrive).unwrap();
    assert_eq!(json, serde_json::json!("external-drive"));
    let json = serde_json::to_value(DeviceType::UsbDrive).unwrap();
    assert_eq!(json, serde_json::json!("usb-drive"));
}

#[test]
fn test_session_status_serde_representation() {
    let json = serde_json::to_value(SessionStatus::InProgress).unwrap();
    assert_eq!(json, serde_json::json!("in-progress"));
}

#[test]
fn test_device_serde_round_trip() {
    let device = Device::new("T7", "T7-9", DeviceType::ExternalDrive, 1 << 40);
    let json = serde_json::to_string(&device).unwrap();
    let back: Device = serde_json::from_str(&json).unwrap();
    assert_eq!(device, back);
}

#[test]
fn test_operator_identity() {
    let op = Operator::new("Security Administrator", OperatorRole::Admin);
    assert_eq!(op.name, "Security Administrator");
    assert_eq!(op.role, OperatorRole::Admin);
    assert!(!op.id.is_empty());
}
