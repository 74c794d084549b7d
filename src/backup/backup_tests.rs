use super::{BackupEncryptor, BackupEvent, BackupItem};
use crate::ErrorClass;
use tempfile::TempDir;

fn items() -> Vec<BackupItem> {
    vec![
        BackupItem {
            path: "Documents/Personal/notes.txt".to_string(),
            contents: b"meeting notes".to_vec(),
        },
        BackupItem {
            path: "Photos/Camera/img.jpg".to_string(),
            contents: vec![0x42u8; 2048],
        },
    ]
}

async fn drain(mut run: super::BackupRun) -> (Vec<u8>, Vec<BackupEvent>) {
    let mut progress = Vec::new();
    let mut terminals = Vec::new();
    while let Some(event) = run.events.recv().await {
        match event {
            BackupEvent::Progress { percent } => progress.push(percent),
            terminal => terminals.push(terminal),
        }
    }
    (progress, terminals)
}

#[tokio::test]
async fn test_backup_completes_with_verified_record() {
    let staging = TempDir::new().unwrap();
    let encryptor = BackupEncryptor::with_generated_key(staging.path()).unwrap();

    let run = encryptor.backup("session-1", items());
    let (progress, terminals) = drain(run).await;

    assert_eq!(terminals.len(), 1);
    let record = match &terminals[0] {
        BackupEvent::Completed(record) => record.clone(),
        other => panic!("expected completion, got {:?}", other),
    };

    assert!(record.completed);
    assert_eq!(record.algorithm, "AES-256-GCM");
    assert_eq!(record.session_id, "session-1");
    assert_eq!(record.integrity_digest.len(), 64);
    assert!(record.location.join("0000.enc").exists());
    assert!(record.location.join("0001.enc").exists());
    assert!(record.location.join("manifest.json").exists());

    assert_eq!(progress.last().copied(), Some(100));
    assert!(progress.windows(2).all(|w| w[0] <= w[1]));
}

#[tokio::test]
async fn test_archives_are_ciphertext_not_plaintext() {
    let staging = TempDir::new().unwrap();
    let encryptor = BackupEncryptor::with_generated_key(staging.path()).unwrap();

    let run = encryptor.backup("session-2", items());
    let (_, terminals) = drain(run).await;
    let record = match &terminals[0] {
        BackupEvent::Completed(record) => record.clone(),
        other => panic!("expected completion, got {:?}", other),
    };

    let archived = std::fs::read(record.location.join("0000.enc")).unwrap();
    assert!(!archived
        .windows(b"meeting notes".len())
        .any(|w| w == b"meeting notes"));
}

#[tokio::test]
async fn test_storage_failure_is_terminal_without_record() {
    let staging = TempDir::new().unwrap();
    let encryptor = BackupEncryptor::with_generated_key(staging.path())
        .unwrap()
        .fail_after_items(1);

    let run = encryptor.backup("session-3", items());
    let (progress, terminals) = drain(run).await;

    assert_eq!(terminals.len(), 1);
    match &terminals[0] {
        BackupEvent::Failed(reason) => assert_eq!(reason.class, ErrorClass::Resource),
        other => panic!("expected failure, got {:?}", other),
    }
    assert!(progress.last().copied().unwrap_or(0) < 100);
}

#[tokio::test]
async fn test_empty_backup_is_rejected() {
    let staging = TempDir::new().unwrap();
    let encryptor = BackupEncryptor::with_generated_key(staging.path()).unwrap();

    let run = encryptor.backup("session-4", Vec::new());
    let (_, terminals) = drain(run).await;
    match &terminals[0] {
        BackupEvent::Failed(reason) => assert_eq!(reason.class, ErrorClass::Validation),
        other => panic!("expected failure, got {:?}", other),
    }
}

#[tokio::test]
async fn test_unwritable_staging_is_a_storage_error() {
    let staging = TempDir::new().unwrap();
    let blocker = staging.path().join("occupied");
    std::fs::write(&blocker, b"a file, not a directory").unwrap();

    let encryptor = BackupEncryptor::with_generated_key(&blocker).unwrap();
    let run = encryptor.backup("session-5", items());
    let (_, terminals) = drain(run).await;
    match &terminals[0] {
        BackupEvent::Failed(reason) => assert_eq!(reason.class, ErrorClass::Resource),
        other => panic!("expected failure, got {:?}", other),
    }
}
