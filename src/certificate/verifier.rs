use crate::certificate::{Certificate, SignatureAlgorithm};
use crate::{WipeError, WipeResult};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use ring::signature::{self, UnparsedPublicKey};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Compact, self-contained verification document for optical/QR or link
/// transport. Carries enough to re-validate without the issuer's state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VerificationPayload {
    pub certificate_id: String,
    pub device_name: String,
    pub device_serial: String,
    pub wipe_mode: String,
    pub operator: String,
    pub timestamp: DateTime<Utc>,
    pub standard: String,
    pub signature_algorithm: SignatureAlgorithm,
    pub verified: bool,
    pub verification_url: String,
}

impl VerificationPayload {
    /// URL-safe base64 of the compact JSON form.
    pub fn encode(&self) -> WipeResult<String> {
        let json = serde_json::to_vec(self).map_err(|e| WipeError::Store(e.to_string()))?;
        Ok(URL_SAFE_NO_PAD.encode(json))
    }

    pub fn decode(encoded: &str) -> WipeResult<Self> {
        let json = URL_SAFE_NO_PAD
            .decode(encoded)
            .map_err(|e| WipeError::VerificationMismatch(format!("bad payload encoding: {}", e)))?;
        serde_json::from_slice(&json)
            .map_err(|e| WipeError::VerificationMismatch(format!("bad payload document: {}", e)))
    }
}

/// Validates certificates against trusted public keys, independently of the
/// process that issued them.
pub struct CertificateVerifier {
    trusted_keys: HashMap<SignatureAlgorithm, Vec<u8>>,
    url_base: String,
}

impl CertificateVerifier {
    pub const DEFAULT_URL_BASE: &'static str = "https://verify.trustwipe.example";

    pub fn new() -> Self {
        Self {
            trusted_keys: HashMap::new(),
            url_base: Self::DEFAULT_URL_BASE.to_string(),
        }
    }

    pub fn with_trusted_key(mut self, algorithm: SignatureAlgorithm, public_key: Vec<u8>) -> Self {
        self.trusted_keys.insert(algorithm, public_key);
        self
    }

    pub fn with_url_base(mut self, url_base: impl Into<String>) -> Self {
        self.url_base = url_base.into();
        self
    }

    /// Recompute the canonical payload from the certificate's own fields and
    /// check the signature. Any altered field rejects.
    pub fn verify_strict(&self, certificate: &Certificate) -> WipeResult<()> {
        let public_key = self
            .trusted_keys
            .get(&certificate.signature_algorithm)
            .ok_or_else(|| {
                WipeError::Config(format!(
                    "no trusted key for {}",
                    certificate.signature_algorithm
                ))
            })?;

        let signature_bytes = hex::decode(&certificate.signature)
            .map_err(|_| WipeError::SignatureInvalid)?;

        let algorithm: &dyn signature::VerificationAlgorithm =
            match certificate.signature_algorithm {
                SignatureAlgorithm::EcdsaP384 => &signature::ECDSA_P384_SHA384_ASN1,
                SignatureAlgorithm::Rsa4096 => &signature::RSA_PKCS1_2048_8192_SHA256,
            };

        UnparsedPublicKey::new(algorithm, public_key)
            .verify(&certificate.canonical_payload(), &signature_bytes)
            .map_err(|_| WipeError::SignatureInvalid)
    }

    /// Signature validity as a plain flag.
    pub fn verify(&self, certificate: &Certificate) -> bool {
        self.verify_strict(certificate).is_ok()
    }

    /// Build the compact verification document for a certificate.
    pub fn verification_payload(&self, certificate: &Certificate) -> VerificationPayload {
        VerificationPayload {
            certificate_id: certificate.certificate_id.clone(),
            device_name: certificate.device_name.clone(),
            device_serial: certificate.device_serial.clone(),
            wipe_mode: certificate.wipe_mode.clone(),
            operator: certificate.operator.clone(),
            timestamp: certificate.timestamp,
            standard: certificate.standard.clone(),
            signature_algorithm: certificate.signature_algorithm,
            verified: self.verify(certificate),
            verification_url: format!("{}/c/{}", self.url_base, certificate.certificate_id),
        }
    }
}

impl Default for CertificateVerifier {
    fn default() -> Self {
        Self::new()
    }
}
