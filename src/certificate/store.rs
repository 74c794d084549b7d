use crate::certificate::{Certificate, SignatureAlgorithm};
use crate::{WipeError, WipeResult};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Append-only certificate store keyed by certificate id.
///
/// Certificates are immutable once issued, so the store exposes insert and
/// read operations only; there is no update path. WAL mode keeps concurrent
/// readers safe while a session task appends.
pub struct CertificateStore {
    conn: Mutex<Connection>,
    db_path: PathBuf,
}

impl CertificateStore {
    /// Create or open the store at `path`.
    pub fn open(path: &Path) -> WipeResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| WipeError::Store(format!("creating store directory: {}", e)))?;
        }
        let conn = Connection::open(path)
            .map_err(|e| WipeError::Store(format!("opening certificate store: {}", e)))?;
        Self::with_connection(conn, path.to_path_buf())
    }

    /// In-memory store for tests and ephemeral runs.
    pub fn in_memory() -> WipeResult<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| WipeError::Store(format!("opening certificate store: {}", e)))?;
        Self::with_connection(conn, PathBuf::from(":memory:"))
    }

    fn with_connection(conn: Connection, db_path: PathBuf) -> WipeResult<Self> {
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| WipeError::Store(format!("setting WAL mode: {}", e)))?;
        conn.pragma_update(None, "synchronous", "NORMAL")
            .map_err(|e| WipeError::Store(format!("setting synchronous mode: {}", e)))?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS certificates (
                certificate_id TEXT PRIMARY KEY NOT NULL,
                device_name TEXT NOT NULL,
                device_serial TEXT NOT NULL,
                wipe_mode TEXT NOT NULL,
                operator TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                standard TEXT NOT NULL,
                signature_algorithm TEXT NOT NULL,
                signature TEXT NOT NULL,
                backup_created INTEGER NOT NULL,
                sanitization_digest TEXT NOT NULL,
                supersedes TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_cert_serial ON certificates(device_serial);
            CREATE INDEX IF NOT EXISTS idx_cert_timestamp ON certificates(timestamp);
            "#,
        )
        .map_err(|e| WipeError::Store(format!("creating certificate schema: {}", e)))?;

        Ok(Self {
            conn: Mutex::new(conn),
            db_path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    /// Append a certificate. Re-inserting an existing id is rejected; issue
    /// a superseding certificate instead of editing.
    pub fn insert(&self, certificate: &Certificate) -> WipeResult<()> {
        let conn = self.conn.lock().unwrap();
        let inserted = conn
            .execute(
                r#"
                INSERT INTO certificates (
                    certificate_id, device_name, device_serial, wipe_mode,
                    operator, timestamp, standard, signature_algorithm,
                    signature, backup_created, sanitization_digest, supersedes
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
                "#,
                params![
                    certificate.certificate_id,
                    certificate.device_name,
                    certificate.device_serial,
                    certificate.wipe_mode,
                    certificate.operator,
                    certificate
                        .timestamp
                        .to_rfc3339_opts(SecondsFormat::Millis, true),
                    certificate.standard,
                    certificate.signature_algorithm.label(),
                    certificate.signature,
                    certificate.backup_created as i64,
                    certificate.sanitization_digest,
                    certificate.supersedes,
                ],
            )
            .map_err(|e| WipeError::Store(format!("inserting certificate: {}", e)))?;

        debug_assert_eq!(inserted, 1);
        Ok(())
    }

    pub fn get(&self, certificate_id: &str) -> WipeResult<Option<Certificate>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            r#"
            SELECT certificate_id, device_name, device_serial, wipe_mode,
                   operator, timestamp, standard, signature_algorithm,
                   signature, backup_created, sanitization_digest, supersedes
            FROM certificates WHERE certificate_id = ?1
            "#,
            params![certificate_id],
            Self::row_to_certificate,
        )
        .optional()
        .map_err(|e| WipeError::Store(format!("loading certificate: {}", e)))
    }

    /// All certificates, newest first.
    pub fn list(&self) -> WipeResult<Vec<Certificate>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                r#"
                SELECT certificate_id, device_name, device_serial, wipe_mode,
                       operator, timestamp, standard, signature_algorithm,
                       signature, backup_created, sanitization_digest, supersedes
                FROM certificates ORDER BY timestamp DESC
                "#,
            )
            .map_err(|e| WipeError::Store(e.to_string()))?;

        let rows = stmt
            .query_map([], Self::row_to_certificate)
            .map_err(|e| WipeError::Store(e.to_string()))?;

        let mut certificates = Vec::new();
        for row in rows {
            certificates.push(row.map_err(|e| WipeError::Store(e.to_string()))?);
        }
        Ok(certificates)
    }

    pub fn count(&self) -> WipeResult<u64> {
        let conn = self.conn.lock().unwrap();
        conn.query_row("SELECT COUNT(*) FROM certificates", [], |row| {
            row.get::<_, i64>(0)
        })
        .map(|n| n as u64)
        .map_err(|e| WipeError::Store(e.to_string()))
    }

    fn row_to_certificate(row: &Row<'_>) -> rusqlite::Result<Certificate> {
        let timestamp_raw: String = row.get(5)?;
        let timestamp = DateTime::parse_from_rfc3339(&timestamp_raw)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    5,
                    rusqlite::types::Type::Text,
                    Box::new(e),
                )
            })?;

        let algorithm_raw: String = row.get(7)?;
        let signature_algorithm: SignatureAlgorithm = algorithm_raw.parse().map_err(|_| {
            rusqlite::Error::FromSqlConversionFailure(
                7,
                rusqlite::types::Type::Text,
                format!("unknown algorithm: {}", algorithm_raw).into(),
            )
        })?;

        Ok(Certificate {
            certificate_id: row.get(0)?,
            device_name: row.get(1)?,
            device_serial: row.get(2)?,
            wipe_mode: row.get(3)?,
            operator: row.get(4)?,
            timestamp,
            standard: row.get(6)?,
            signature_algorithm,
            signature: row.get(8)?,
            backup_created: row.get::<_, i64>(9)? != 0,
            sanitization_digest: row.get(10)?,
            supersedes: row.get(11)?,
        })
    }
}
