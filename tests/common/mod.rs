//! Shared fixtures for integration tests: a file-backed device image with
//! selectable items, wired into a full controller stack.
#![allow(dead_code)]

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;
use trustwipe::backup::BackupEncryptor;
use trustwipe::certificate::{
    CertificateIssuer, CertificateStore, CertificateVerifier, SignatureAlgorithm,
};
use trustwipe::devices::{DeviceRegistry, SimulatedProbe};
use trustwipe::engine::{FileMediumProvider, SanitizationEngine};
use trustwipe::session::WipeSessionController;
use trustwipe::{Device, DeviceType, Operator, OperatorRole};

pub const SERIAL: &str = "SN-100";
pub const IMAGE_BYTES: usize = 64 * 1024;

pub struct Fixture {
    pub controller: WipeSessionController,
    pub registry: Arc<DeviceRegistry>,
    pub store: Arc<CertificateStore>,
    pub verifier: CertificateVerifier,
    pub device_id: String,
    pub image_path: PathBuf,
    pub items_root: PathBuf,
    pub key_path: PathBuf,
    pub db_path: PathBuf,
    pub dir: TempDir,
}

pub fn fixture() -> Fixture {
    let dir = TempDir::new().unwrap();

    let image_path = dir.path().join("device.img");
    fs::write(&image_path, vec![0xEEu8; IMAGE_BYTES]).unwrap();

    let items_root = dir.path().join("items");
    fs::create_dir_all(items_root.join("Documents/Personal")).unwrap();
    fs::create_dir_all(items_root.join("Downloads")).unwrap();
    fs::write(
        items_root.join("Documents/Personal/notes.txt"),
        b"meeting notes",
    )
    .unwrap();
    fs::write(items_root.join("Downloads/setup.bin"), vec![7u8; 4096]).unwrap();

    let device = Device::new("Test External SSD", SERIAL, DeviceType::ExternalDrive, 64 << 10)
        .with_files_detected(2);
    let registry = Arc::new(DeviceRegistry::new(Box::new(SimulatedProbe::new(vec![
        device,
    ]))));
    let device_id = registry.discover().unwrap()[0].id.clone();

    let media = Arc::new(
        FileMediumProvider::new(&image_path).with_items_root(&items_root),
    );

    let key_path = dir.path().join("keys/signing.p8");
    let issuer =
        CertificateIssuer::from_key_file(SignatureAlgorithm::EcdsaP384, &key_path).unwrap();
    let verifier =
        CertificateVerifier::new().with_trusted_key(issuer.algorithm(), issuer.public_key());

    let db_path = dir.path().join("certificates.db");
    let store = Arc::new(CertificateStore::open(&db_path).unwrap());

    let backup =
        Arc::new(BackupEncryptor::with_generated_key(dir.path().join("backups")).unwrap());

    let controller = WipeSessionController::new(
        registry.clone(),
        media,
        backup,
        Arc::new(issuer),
        store.clone(),
        Operator::new("Security Administrator", OperatorRole::Admin),
    )
    .with_engine(SanitizationEngine::new().with_chunk_size(4096));

    Fixture {
        controller,
        registry,
        store,
        verifier,
        device_id,
        image_path,
        items_root,
        key_path,
        db_path,
        dir,
    }
}
