#[cfg(test)]
mod backup_tests;

use crate::{FailureReason, WipeError, WipeResult};
use chrono::{DateTime, Utc};
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM, NONCE_LEN};
use ring::rand::{SecureRandom, SystemRandom};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::PathBuf;
use tokio::sync::mpsc;

/// Record of a completed pre-wipe backup. Created before sanitization
/// begins, never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupRecord {
    pub session_id: String,
    pub algorithm: String,
    pub integrity_digest: String,
    pub location: PathBuf,
    pub completed: bool,
    pub created_at: DateTime<Utc>,
}

/// One item snapshotted before destruction.
#[derive(Debug, Clone)]
pub struct BackupItem {
    pub path: String,
    pub contents: Vec<u8>,
}

#[derive(Debug, Clone)]
pub enum BackupEvent {
    Progress { percent: u8 },
    Completed(BackupRecord),
    Failed(FailureReason),
}

/// Handle to a running backup; drain events until the terminal one.
pub struct BackupRun {
    pub events: mpsc::UnboundedReceiver<BackupEvent>,
}

impl BackupRun {
    pub async fn drive<F>(mut self, mut on_progress: F) -> Result<BackupRecord, FailureReason>
    where
        F: FnMut(u8),
    {
        while let Some(event) = self.events.recv().await {
            match event {
                BackupEvent::Progress { percent } => on_progress(percent),
                BackupEvent::Completed(record) => return Ok(record),
                BackupEvent::Failed(reason) => return Err(reason),
            }
        }
        Err(FailureReason::new(
            crate::ErrorClass::Resource,
            "backup terminated without a terminal event",
        ))
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ManifestEntry {
    path: String,
    file: String,
    bytes: u64,
}

/// Snapshots selected data under authenticated encryption before destructive
/// work begins.
///
/// Every written archive is decrypted and compared against the plaintext
/// before success is reported; the session controller gates sanitization on
/// that report, so an unverified backup never counts.
#[derive(Clone)]
pub struct BackupEncryptor {
    key_bytes: [u8; 32],
    staging_root: PathBuf,
    fail_after_items: Option<usize>,
}

impl BackupEncryptor {
    /// Algorithm identifier recorded on backup records and certificates.
    pub const ALGORITHM: &'static str = "AES-256-GCM";

    /// Build with a provisioned 256-bit key handle.
    pub fn new(key_bytes: [u8; 32], staging_root: impl Into<PathBuf>) -> Self {
        Self {
            key_bytes,
            staging_root: staging_root.into(),
            fail_after_items: None,
        }
    }

    /// Build with a freshly generated key (demo and test use).
    pub fn with_generated_key(staging_root: impl Into<PathBuf>) -> WipeResult<Self> {
        let rng = SystemRandom::new();
        let mut key_bytes = [0u8; 32];
        rng.fill(&mut key_bytes)
            .map_err(|_| WipeError::Encryption("key generation failed".to_string()))?;
        Ok(Self::new(key_bytes, staging_root))
    }

    /// Fault injection for simulated runs: fail after N items are written.
    pub fn fail_after_items(mut self, items: usize) -> Self {
        self.fail_after_items = Some(items);
        self
    }

    /// Start a backup of `items` for `session_id`. Progress percentages are
    /// non-decreasing; exactly one terminal event follows.
    pub fn backup(&self, session_id: &str, items: Vec<BackupItem>) -> BackupRun {
        let (tx, rx) = mpsc::unbounded_channel();
        let encryptor = self.clone();
        let session_id = session_id.to_string();

        tokio::task::spawn_blocking(move || {
            let terminal = match encryptor.execute(&session_id, items, &tx) {
                Ok(record) => BackupEvent::Completed(record),
                Err(err) => {
                    tracing::warn!(error = %err, "backup failed");
                    BackupEvent::Failed(FailureReason::from(&err))
                }
            };
            let _ = tx.send(terminal);
        });

        BackupRun { events: rx }
    }

    fn sealing_key(&self) -> WipeResult<LessSafeKey> {
        let unbound = UnboundKey::new(&AES_256_GCM, &self.key_bytes)
            .map_err(|_| WipeError::Encryption("invalid backup key".to_string()))?;
        Ok(LessSafeKey::new(unbound))
    }

    fn execute(
        &self,
        session_id: &str,
        items: Vec<BackupItem>,
        tx: &mpsc::UnboundedSender<BackupEvent>,
    ) -> WipeResult<BackupRecord> {
        if items.is_empty() {
            return Err(WipeError::InvalidSetup(
                "nothing to back up".to_string(),
            ));
        }

        let key = self.sealing_key()?;
        let rng = SystemRandom::new();
        let archive_dir = self.staging_root.join(format!("backup-{}", session_id));
        fs::create_dir_all(&archive_dir)
            .map_err(|e| WipeError::BackupStorage(format!("cannot create {:?}: {}", archive_dir, e)))?;

        // Two units per item: encrypt+write, then decrypt-and-compare.
        let total_units = items.len() as u64 * 2;
        let mut done_units = 0u64;
        let report = |done: u64| {
            let percent = ((done * 100) / total_units) as u8;
            let _ = tx.send(BackupEvent::Progress { percent });
        };
        report(0);

        let mut integrity = Sha256::new();
        let mut manifest = Vec::with_capacity(items.len());

        for (index, item) in items.iter().enumerate() {
            if let Some(fail_after) = self.fail_after_items {
                if index == fail_after {
                    return Err(WipeError::BackupStorage(
                        "staging storage failure".to_string(),
                    ));
                }
            }

            integrity.update(item.path.as_bytes());
            integrity.update([0u8]);
            integrity.update(&item.contents);

            let mut nonce_bytes = [0u8; NONCE_LEN];
            rng.fill(&mut nonce_bytes)
                .map_err(|_| WipeError::Encryption("nonce generation failed".to_string()))?;
            let nonce = Nonce::assume_unique_for_key(nonce_bytes);

            let mut sealed = item.contents.clone();
            key.seal_in_place_append_tag(nonce, Aad::from(item.path.as_bytes()), &mut sealed)
                .map_err(|_| WipeError::Encryption(format!("sealing {} failed", item.path)))?;

            let file_name = format!("{:04}.enc", index);
            let file_path = archive_dir.join(&file_name);
            let mut framed = Vec::with_capacity(NONCE_LEN + sealed.len());
            framed.extend_from_slice(&nonce_bytes);
            framed.extend_from_slice(&sealed);
            fs::write(&file_path, &framed)
                .map_err(|e| WipeError::BackupStorage(format!("writing {:?}: {}", file_path, e)))?;

            manifest.push(ManifestEntry {
                path: item.path.clone(),
                file: file_name,
                bytes: item.contents.len() as u64,
            });

            done_units += 1;
            report(done_units);
        }

        // Verify what actually landed on disk before reporting success.
        for (index, item) in items.iter().enumerate() {
            let file_path = archive_dir.join(format!("{:04}.enc", index));
            let framed = fs::read(&file_path)
                .map_err(|e| WipeError::BackupStorage(format!("reading {:?}: {}", file_path, e)))?;
            if framed.len() < NONCE_LEN {
                return Err(WipeError::BackupIntegrity(format!(
                    "archive for {} is truncated",
                    item.path
                )));
            }

            let (nonce_bytes, sealed) = framed.split_at(NONCE_LEN);
            let nonce = Nonce::try_assume_unique_for_key(nonce_bytes)
                .map_err(|_| WipeError::BackupIntegrity("bad archive nonce".to_string()))?;
            let mut opened = sealed.to_vec();
            let plaintext = key
                .open_in_place(nonce, Aad::from(item.path.as_bytes()), &mut opened)
                .map_err(|_| {
                    WipeError::BackupIntegrity(format!(
                        "archive for {} failed authentication",
                        item.path
                    ))
                })?;

            if plaintext != item.contents.as_slice() {
                return Err(WipeError::BackupIntegrity(format!(
                    "archive for {} does not match the source data",
                    item.path
                )));
            }

            done_units += 1;
            report(done_units);
        }

        let manifest_path = archive_dir.join("manifest.json");
        let manifest_json = serde_json::to_vec_pretty(&manifest)
            .map_err(|e| WipeError::BackupStorage(e.to_string()))?;
        fs::write(&manifest_path, manifest_json)
            .map_err(|e| WipeError::BackupStorage(format!("writing {:?}: {}", manifest_path, e)))?;

        Ok(BackupRecord {
            session_id: session_id.to_string(),
            algorithm: Self::ALGORITHM.to_string(),
            integrity_digest: hex::encode(integrity.finalize()),
            location: archive_dir,
            completed: true,
            created_at: Utc::now(),
        })
    }
}
