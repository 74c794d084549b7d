use crate::certificate::SignatureAlgorithm;
use crate::{WipeError, WipeResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Layered application configuration: optional file under `TRUSTWIPE_*`
/// environment overrides, with `ProjectDirs`-derived path defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub signing: SigningConfig,
    pub storage: StorageConfig,
    pub engine: EngineConfig,
    pub verification_url_base: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SigningConfig {
    pub algorithm: SignatureAlgorithm,
    pub key_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub certificate_db: Option<PathBuf>,
    pub backup_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub pass_count: u32,
    pub verify: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            signing: SigningConfig::default(),
            storage: StorageConfig::default(),
            engine: EngineConfig::default(),
            verification_url_base: crate::certificate::CertificateVerifier::DEFAULT_URL_BASE
                .to_string(),
        }
    }
}

impl Default for SigningConfig {
    fn default() -> Self {
        Self {
            algorithm: SignatureAlgorithm::EcdsaP384,
            key_path: None,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            certificate_db: None,
            backup_dir: None,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            pass_count: 1,
            verify: true,
        }
    }
}

impl AppConfig {
    /// Load the configuration: explicit file if given, otherwise an optional
    /// `trustwipe.toml` in the working directory, always layered under
    /// `TRUSTWIPE_*` environment variables.
    pub fn load(path: Option<&Path>) -> WipeResult<Self> {
        let mut builder = config::Config::builder();
        builder = match path {
            Some(path) => builder.add_source(config::File::from(path)),
            None => builder.add_source(config::File::with_name("trustwipe").required(false)),
        };
        builder = builder.add_source(
            config::Environment::with_prefix("TRUSTWIPE").separator("__"),
        );

        let settings = builder
            .build()
            .map_err(|e| WipeError::Config(e.to_string()))?;
        settings
            .try_deserialize()
            .map_err(|e| WipeError::Config(e.to_string()))
    }

    fn data_dir() -> PathBuf {
        directories::ProjectDirs::from("", "TrustWipe", "trustwipe")
            .map(|dirs| dirs.data_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("./trustwipe-data"))
    }

    pub fn signing_key_path(&self) -> PathBuf {
        self.signing
            .key_path
            .clone()
            .unwrap_or_else(|| Self::data_dir().join("keys").join("signing.p8"))
    }

    pub fn certificate_db_path(&self) -> PathBuf {
        self.storage
            .certificate_db
            .clone()
            .unwrap_or_else(|| Self::data_dir().join("certificates.db"))
    }

    pub fn backup_staging_dir(&self) -> PathBuf {
        self.storage
            .backup_dir
            .clone()
            .unwrap_or_else(|| Self::data_dir().join("backups"))
    }
}
