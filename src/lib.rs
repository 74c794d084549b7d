// Allow uppercase acronyms for industry-standard terms like USB, RSA, ECDSA
#![allow(clippy::upper_case_acronyms)]

pub mod backup;
pub mod certificate;
pub mod config;
pub mod devices;
pub mod engine;
pub mod session;

// Re-export the main entry points for convenience
pub use certificate::{Certificate, CertificateIssuer, CertificateStore, CertificateVerifier};
pub use devices::{DeviceProbe, DeviceRegistry, SimulatedProbe};
pub use engine::{SanitizationEngine, SanitizationSpec};
pub use session::{ConfirmationToken, SessionPhase, SessionResult, WipeSessionController};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Sanitization standard every certificate attests against.
pub const SANITIZATION_STANDARD: &str = "NIST SP 800-88";

#[derive(Error, Debug)]
pub enum WipeError {
    #[error("Invalid setup: {0}")]
    InvalidSetup(String),

    #[error("Confirmation token does not match the required acknowledgement")]
    InvalidConfirmation,

    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Device disconnected: {0}")]
    DeviceDisconnected(String),

    #[error("Backup storage failed: {0}")]
    BackupStorage(String),

    #[error("Encryption failed: {0}")]
    Encryption(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Certificate store error: {0}")]
    Store(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Signing failed: {0}")]
    Signing(String),

    #[error("Verification mismatch: {0}")]
    VerificationMismatch(String),

    #[error("Backup integrity check failed: {0}")]
    BackupIntegrity(String),

    #[error("Certificate signature is invalid")]
    SignatureInvalid,

    #[error("A wipe session is already in progress")]
    SessionInProgress,

    #[error("Session settings are locked once confirmed")]
    SessionLocked,

    #[error("Operation cancelled")]
    Cancelled,
}

impl WipeError {
    /// Classify the error for session handling.
    pub fn class(&self) -> ErrorClass {
        use WipeError::*;
        match self {
            InvalidSetup(_) | InvalidConfirmation => ErrorClass::Validation,
            VerificationMismatch(_) | BackupIntegrity(_) | SignatureInvalid => {
                ErrorClass::Integrity
            }
            SessionInProgress | SessionLocked => ErrorClass::Concurrency,
            _ => ErrorClass::Resource,
        }
    }

    /// Whether the error terminates the current session.
    pub fn is_fatal_to_session(&self) -> bool {
        self.class().is_fatal_to_session()
    }
}

pub type WipeResult<T> = Result<T, WipeError>;

/// Error classification driving recovery behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorClass {
    /// Bad input - recovered locally, state unchanged, surfaced for correction
    Validation,

    /// Device, storage or crypto resource failure - fatal to the current session
    Resource,

    /// Compliance-critical mismatch - always fatal, never downgraded
    Integrity,

    /// Session already running or locked - rejected immediately, no side effects
    Concurrency,
}

impl ErrorClass {
    pub fn description(&self) -> &'static str {
        match self {
            ErrorClass::Validation => "Input rejected, session state unchanged",
            ErrorClass::Resource => "Resource failure, session terminated",
            ErrorClass::Integrity => "Integrity violation, operation rejected",
            ErrorClass::Concurrency => "Conflicting operation rejected without side effects",
        }
    }

    pub fn is_fatal_to_session(&self) -> bool {
        matches!(self, ErrorClass::Resource | ErrorClass::Integrity)
    }
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorClass::Validation => write!(f, "Validation"),
            ErrorClass::Resource => write!(f, "Resource"),
            ErrorClass::Integrity => write!(f, "Integrity"),
            ErrorClass::Concurrency => write!(f, "Concurrency"),
        }
    }
}

/// Cloneable terminal failure recorded on a failed session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FailureReason {
    pub class: ErrorClass,
    pub message: String,
}

impl FailureReason {
    pub fn new(class: ErrorClass, message: impl Into<String>) -> Self {
        Self {
            class,
            message: message.into(),
        }
    }
}

impl From<&WipeError> for FailureReason {
    fn from(err: &WipeError) -> Self {
        Self {
            class: err.class(),
            message: err.to_string(),
        }
    }
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.class, self.message)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeviceType {
    Phone,
    Laptop,
    ExternalDrive,
    UsbDrive,
}

impl std::fmt::Display for DeviceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceType::Phone => write!(f, "phone"),
            DeviceType::Laptop => write!(f, "laptop"),
            DeviceType::ExternalDrive => write!(f, "external drive"),
            DeviceType::UsbDrive => write!(f, "usb drive"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Android,
    Ios,
    Windows,
    Macos,
    Linux,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    Connected,
    Ready,
    Wiping,
    Completed,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Device {
    pub id: String,
    pub serial: String,
    pub name: String,
    pub device_type: DeviceType,
    pub platform: Option<Platform>,
    pub capacity_bytes: u64,
    pub files_detected: u64,
    pub status: DeviceStatus,
}

impl Device {
    pub fn new(
        name: impl Into<String>,
        serial: impl Into<String>,
        device_type: DeviceType,
        capacity_bytes: u64,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            serial: serial.into(),
            name: name.into(),
            device_type,
            platform: None,
            capacity_bytes,
            files_detected: 0,
            status: DeviceStatus::Connected,
        }
    }

    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = Some(platform);
        self
    }

    pub fn with_files_detected(mut self, count: u64) -> Self {
        self.files_detected = count;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WipeMode {
    Selective,
    Complete,
}

impl WipeMode {
    /// Human-facing label, denormalized into certificates.
    pub fn label(&self) -> &'static str {
        match self {
            WipeMode::Selective => "Selective File Wipe",
            WipeMode::Complete => "Complete Device Wipe",
        }
    }
}

impl std::fmt::Display for WipeMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

/// One device's sanitization run. Mutated only by the session controller;
/// frozen once status reaches Completed or Failed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WipeSession {
    pub id: String,
    pub device_id: String,
    pub mode: WipeMode,
    pub selection: Vec<String>,
    pub backup_requested: bool,
    pub status: SessionStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub certificate_issued: bool,
}

impl WipeSession {
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            device_id: device_id.into(),
            mode: WipeMode::Selective,
            selection: Vec::new(),
            backup_requested: false,
            status: SessionStatus::Pending,
            started_at: None,
            completed_at: None,
            certificate_issued: false,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status,
            SessionStatus::Completed | SessionStatus::Failed
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperatorRole {
    Admin,
    Operator,
}

/// Identity of the person driving a session, recorded on certificates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Operator {
    pub id: String,
    pub name: String,
    pub role: OperatorRole,
}

impl Operator {
    pub fn new(name: impl Into<String>, role: OperatorRole) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            role,
        }
    }
}

#[cfg(test)]
mod lib_tests;
