use crate::certificate::{Certificate, SignatureAlgorithm};
use crate::{
    Device, Operator, SessionStatus, WipeError, WipeResult, WipeSession, SANITIZATION_STANDARD,
};
use chrono::{SubsecRound, Utc};
use ring::rand::SystemRandom;
use ring::signature::{self, EcdsaKeyPair, KeyPair, RsaKeyPair};
use std::path::Path;
use uuid::Uuid;

enum SigningKey {
    Ecdsa(EcdsaKeyPair),
    Rsa(RsaKeyPair),
}

/// Builds and signs certificates for completed wipe sessions.
///
/// ECDSA P-384 keys are generated on demand; RSA keys must be provisioned
/// externally as PKCS#8 DER (ring does not generate RSA key pairs).
pub struct CertificateIssuer {
    algorithm: SignatureAlgorithm,
    key: SigningKey,
    rng: SystemRandom,
}

impl CertificateIssuer {
    /// Load a signing key pair from PKCS#8 DER.
    pub fn from_pkcs8(algorithm: SignatureAlgorithm, pkcs8: &[u8]) -> WipeResult<Self> {
        let rng = SystemRandom::new();
        let key = match algorithm {
            SignatureAlgorithm::EcdsaP384 => {
                let pair = EcdsaKeyPair::from_pkcs8(
                    &signature::ECDSA_P384_SHA384_ASN1_SIGNING,
                    pkcs8,
                    &rng,
                )
                .map_err(|e| WipeError::Signing(format!("rejected ECDSA key: {}", e)))?;
                SigningKey::Ecdsa(pair)
            }
            SignatureAlgorithm::Rsa4096 => {
                let pair = RsaKeyPair::from_pkcs8(pkcs8)
                    .map_err(|e| WipeError::Signing(format!("rejected RSA key: {}", e)))?;
                SigningKey::Rsa(pair)
            }
        };
        Ok(Self {
            algorithm,
            key,
            rng,
        })
    }

    /// Generate a fresh key pair; returns the issuer and the PKCS#8 document
    /// to persist. Only the ECDSA family supports generation.
    pub fn generate(algorithm: SignatureAlgorithm) -> WipeResult<(Self, Vec<u8>)> {
        match algorithm {
            SignatureAlgorithm::EcdsaP384 => {
                let rng = SystemRandom::new();
                let document = EcdsaKeyPair::generate_pkcs8(
                    &signature::ECDSA_P384_SHA384_ASN1_SIGNING,
                    &rng,
                )
                .map_err(|_| WipeError::Signing("key generation failed".to_string()))?;
                let pkcs8 = document.as_ref().to_vec();
                let issuer = Self::from_pkcs8(algorithm, &pkcs8)?;
                Ok((issuer, pkcs8))
            }
            SignatureAlgorithm::Rsa4096 => Err(WipeError::Config(
                "RSA-4096 signing keys must be provisioned externally (PKCS#8 DER)".to_string(),
            )),
        }
    }

    /// Load the key file, generating and persisting one first when the file
    /// is absent and the algorithm supports generation.
    pub fn from_key_file(algorithm: SignatureAlgorithm, path: &Path) -> WipeResult<Self> {
        if path.exists() {
            let pkcs8 = std::fs::read(path)?;
            return Self::from_pkcs8(algorithm, &pkcs8);
        }
        let (issuer, pkcs8) = Self::generate(algorithm)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, pkcs8)?;
        tracing::info!(?path, %algorithm, "generated signing key");
        Ok(issuer)
    }

    pub fn algorithm(&self) -> SignatureAlgorithm {
        self.algorithm
    }

    /// Public key for verifier configuration, in the format ring verifies
    /// against (uncompressed point for ECDSA, DER RSAPublicKey for RSA).
    pub fn public_key(&self) -> Vec<u8> {
        match &self.key {
            SigningKey::Ecdsa(pair) => pair.public_key().as_ref().to_vec(),
            SigningKey::Rsa(pair) => pair.public_key().as_ref().to_vec(),
        }
    }

    fn sign(&self, payload: &[u8]) -> WipeResult<Vec<u8>> {
        match &self.key {
            SigningKey::Ecdsa(pair) => pair
                .sign(&self.rng, payload)
                .map(|sig| sig.as_ref().to_vec())
                .map_err(|_| WipeError::Signing("ECDSA signing failed".to_string())),
            SigningKey::Rsa(pair) => {
                let mut sig = vec![0u8; pair.public().modulus_len()];
                pair.sign(&signature::RSA_PKCS1_SHA256, &self.rng, payload, &mut sig)
                    .map_err(|_| WipeError::Signing("RSA signing failed".to_string()))?;
                Ok(sig)
            }
        }
    }

    /// Issue a certificate for a completed session. Fails for any session
    /// that has not reached `Completed`.
    pub fn issue(
        &self,
        session: &WipeSession,
        device: &Device,
        operator: &Operator,
        sanitization_digest: &str,
    ) -> WipeResult<Certificate> {
        self.issue_superseding(session, device, operator, sanitization_digest, None)
    }

    /// Issue a correcting certificate that supersedes an earlier one.
    pub fn issue_superseding(
        &self,
        session: &WipeSession,
        device: &Device,
        operator: &Operator,
        sanitization_digest: &str,
        supersedes: Option<String>,
    ) -> WipeResult<Certificate> {
        if session.status != SessionStatus::Completed {
            return Err(WipeError::InvalidSetup(
                "certificates are only issued for completed sessions".to_string(),
            ));
        }

        // Millisecond truncation keeps the canonical timestamp stable across
        // serde round trips.
        let timestamp = Utc::now().trunc_subsecs(3);

        let mut certificate = Certificate {
            certificate_id: Uuid::new_v4().to_string(),
            device_name: device.name.clone(),
            device_serial: device.serial.clone(),
            wipe_mode: session.mode.label().to_string(),
            operator: operator.name.clone(),
            timestamp,
            standard: SANITIZATION_STANDARD.to_string(),
            signature_algorithm: self.algorithm,
            signature: String::new(),
            backup_created: session.backup_requested,
            sanitization_digest: sanitization_digest.to_string(),
            supersedes,
        };

        let signature = self.sign(&certificate.canonical_payload())?;
        certificate.signature = hex::encode(signature);

        tracing::info!(
            certificate_id = %certificate.certificate_id,
            serial = %certificate.device_serial,
            algorithm = %self.algorithm,
            "certificate issued"
        );
        Ok(certificate)
    }
}
