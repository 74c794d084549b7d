pub mod issuer;
pub mod store;
pub mod verifier;


// Re-export the certificate pipeline
pub use issuer::CertificateIssuer;
pub use store::CertificateStore;
pub use verifier::{CertificateVerifier, VerificationPayload};

use crate::{WipeError, WipeResult};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Signature algorithm families supported by the issuer, selectable by
/// configuration to match differing compliance requirements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignatureAlgorithm {
    #[serde(rename = "RSA-4096")]
    Rsa4096,
    #[serde(rename = "ECDSA-P384")]
    EcdsaP384,
}

impl SignatureAlgorithm {
    pub fn label(&self) -> &'static str {
        match self {
            SignatureAlgorithm::Rsa4096 => "RSA-4096",
            SignatureAlgorithm::EcdsaP384 => "ECDSA-P384",
        }
    }
}

impl std::fmt::Display for SignatureAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

impl std::str::FromStr for SignatureAlgorithm {
    type Err = WipeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "RSA-4096" | "RSA" => Ok(SignatureAlgorithm::Rsa4096),
            "ECDSA-P384" | "ECDSA" => Ok(SignatureAlgorithm::EcdsaP384),
            other => Err(WipeError::Config(format!(
                "unknown signature algorithm: {}",
                other
            ))),
        }
    }
}

/// Signed, tamper-evident record of one completed sanitization.
///
/// Immutable once issued: corrections are new certificates carrying a
/// `supersedes` reference, never edits in place.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Certificate {
    pub certificate_id: String,
    pub device_name: String,
    pub device_serial: String,
    pub wipe_mode: String,
    pub operator: String,
    pub timestamp: DateTime<Utc>,
    pub standard: String,
    pub signature_algorithm: SignatureAlgorithm,
    pub signature: String,
    pub backup_created: bool,
    pub sanitization_digest: String,
    pub supersedes: Option<String>,
}

impl Certificate {
    /// Canonical byte serialization signed by the issuer and recomputed by
    /// the verifier: versioned, line-based, fixed field order, timestamps as
    /// RFC 3339 UTC at millisecond precision. The signature field itself is
    /// excluded.
    pub fn canonical_payload(&self) -> Vec<u8> {
        let lines = [
            "trustwipe-certificate-v1".to_string(),
            format!("certificate_id={}", self.certificate_id),
            format!("device_name={}", self.device_name),
            format!("device_serial={}", self.device_serial),
            format!("wipe_mode={}", self.wipe_mode),
            format!("operator={}", self.operator),
            format!(
                "timestamp={}",
                self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
            ),
            format!("standard={}", self.standard),
            format!("signature_algorithm={}", self.signature_algorithm),
            format!("backup_created={}", self.backup_created),
            format!("sanitization_digest={}", self.sanitization_digest),
            format!("supersedes={}", self.supersedes.as_deref().unwrap_or("-")),
        ];
        lines.join("\n").into_bytes()
    }

    /// Structured record export, field for field.
    pub fn to_json(&self) -> WipeResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| WipeError::Store(e.to_string()))
    }

    /// Human-readable export, derived from the same record as the JSON form.
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        out.push_str("TRUST WIPE CERTIFICATE\n");
        out.push_str(&format!("Certificate ID: {}\n", self.certificate_id));
        out.push('\n');
        out.push_str("Device Information\n");
        out.push_str(&format!("  Device Name:   {}\n", self.device_name));
        out.push_str(&format!("  Serial Number: {}\n", self.device_serial));
        out.push('\n');
        out.push_str("Operation Details\n");
        out.push_str(&format!("  Wipe Mode:      {}\n", self.wipe_mode));
        out.push_str(&format!("  Standard:       {}\n", self.standard));
        out.push_str(&format!(
            "  Backup Created: {}\n",
            if self.backup_created { "Yes" } else { "No" }
        ));
        out.push_str(&format!("  Signature:      {}\n", self.signature_algorithm));
        out.push('\n');
        out.push_str("Certification Details\n");
        out.push_str(&format!("  Operator:    {}\n", self.operator));
        out.push_str(&format!(
            "  Date & Time: {}\n",
            self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
        ));
        if let Some(superseded) = &self.supersedes {
            out.push_str(&format!("  Supersedes:  {}\n", superseded));
        }
        out.push('\n');
        out.push_str("Digital Signature\n");
        out.push_str(&format!("  Digest:    {}\n", self.sanitization_digest));
        out.push_str(&format!("  Signature: {}\n", self.signature));
        out
    }
}
