#[cfg(test)]
mod session_tests;

use crate::backup::{BackupEncryptor, BackupItem, BackupRecord};
use crate::certificate::{Certificate, CertificateIssuer, CertificateStore};
use crate::devices::DeviceRegistry;
use crate::engine::{CancelFlag, MediumProvider, SanitizationEngine, SanitizationSpec, WipeMedium};
use crate::{
    Device, DeviceStatus, ErrorClass, FailureReason, Operator, SessionStatus, WipeError, WipeMode,
    WipeResult, WipeSession,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

/// The acknowledgement an operator must type before destructive work starts.
pub const REQUIRED_CONFIRMATION: &str = "confirm";

/// Typed operator acknowledgement gating the irreversible transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmationToken(String);

impl ConfirmationToken {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    fn matches_required(&self) -> bool {
        self.0 == REQUIRED_CONFIRMATION
    }
}

impl From<&str> for ConfirmationToken {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionPhase {
    Setup,
    Confirmed,
    Backup,
    Wiping,
    Completed,
    Failed,
}

impl std::fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SessionPhase::Setup => "Setup",
            SessionPhase::Confirmed => "Confirmed",
            SessionPhase::Backup => "Backup",
            SessionPhase::Wiping => "Wiping",
            SessionPhase::Completed => "Completed",
            SessionPhase::Failed => "Failed",
        };
        f.write_str(name)
    }
}

/// What the presentation layer polls while a session runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionProgress {
    pub phase: SessionPhase,
    pub percent: u8,
}

#[derive(Debug, Clone)]
pub enum SessionResult {
    InProgress,
    Completed(Certificate),
    Failed(FailureReason),
}

#[derive(Debug, Clone)]
enum Outcome {
    Completed(Certificate),
    Failed(FailureReason),
}

struct ControllerState {
    session: Option<WipeSession>,
    phase: SessionPhase,
    percent: u8,
    outcome: Option<Outcome>,
    backup_record: Option<BackupRecord>,
    cancel: CancelFlag,
    driver_active: bool,
}

impl ControllerState {
    fn idle() -> Self {
        Self {
            session: None,
            phase: SessionPhase::Setup,
            percent: 0,
            outcome: None,
            backup_record: None,
            cancel: CancelFlag::new(),
            driver_active: false,
        }
    }

    /// Per-phase percentage, clamped monotone within a phase.
    fn set_progress(&mut self, phase: SessionPhase, percent: u8) {
        if self.phase == phase {
            self.percent = self.percent.max(percent.min(100));
        } else {
            self.phase = phase;
            self.percent = percent.min(100);
        }
    }
}

/// Orchestrates setup, confirmation, optional backup, sanitization and
/// certificate issuance for one device at a time.
///
/// The caller configures a session, confirms with the required token, then
/// polls `progress()`/`result()`; the destructive pipeline runs on a spawned
/// task. Once a session leaves `Setup` its mode, selection and backup flag
/// are immutable, and no new session can start while one is destructive.
pub struct WipeSessionController {
    registry: Arc<DeviceRegistry>,
    media: Arc<dyn MediumProvider>,
    engine: Arc<SanitizationEngine>,
    backup: Arc<BackupEncryptor>,
    issuer: Arc<CertificateIssuer>,
    store: Arc<CertificateStore>,
    operator: Operator,
    pass_count: u32,
    verify: bool,
    state: Arc<Mutex<ControllerState>>,
}

impl WipeSessionController {
    pub fn new(
        registry: Arc<DeviceRegistry>,
        media: Arc<dyn MediumProvider>,
        backup: Arc<BackupEncryptor>,
        issuer: Arc<CertificateIssuer>,
        store: Arc<CertificateStore>,
        operator: Operator,
    ) -> Self {
        Self {
            registry,
            media,
            engine: Arc::new(SanitizationEngine::new()),
            backup,
            issuer,
            store,
            operator,
            pass_count: 1,
            verify: true,
            state: Arc::new(Mutex::new(ControllerState::idle())),
        }
    }

    pub fn with_engine(mut self, engine: SanitizationEngine) -> Self {
        self.engine = Arc::new(engine);
        self
    }

    pub fn with_pass_count(mut self, pass_count: u32) -> Self {
        self.pass_count = pass_count.max(1);
        self
    }

    pub fn with_verify(mut self, verify: bool) -> Self {
        self.verify = verify;
        self
    }

    pub fn operator(&self) -> &Operator {
        &self.operator
    }

    /// Begin configuring a wipe of `device_id`. Fails with
    /// `SessionInProgress`, touching nothing, while a confirmed session is
    /// still running.
    pub fn start_setup(&self, device_id: &str) -> WipeResult<String> {
        let mut state = self.state.lock().unwrap();
        if state.driver_active {
            return Err(WipeError::SessionInProgress);
        }

        let device = self.registry.get(device_id)?;
        let session = WipeSession::new(&device.id);
        let session_id = session.id.clone();

        self.registry.set_status(&device.id, DeviceStatus::Ready)?;

        *state = ControllerState::idle();
        state.session = Some(session);
        tracing::info!(session_id = %session_id, serial = %device.serial, "session setup started");
        Ok(session_id)
    }

    /// Accumulate setup choices. Only legal while the session is in `Setup`.
    pub fn update_setup(
        &self,
        mode: WipeMode,
        selection: Vec<String>,
        backup_requested: bool,
    ) -> WipeResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.phase != SessionPhase::Setup {
            return Err(WipeError::SessionLocked);
        }
        let session = state
            .session
            .as_mut()
            .ok_or_else(|| WipeError::InvalidSetup("no session in setup".to_string()))?;

        session.mode = mode;
        session.selection = dedup_preserving_order(selection);
        session.backup_requested = backup_requested;
        Ok(())
    }

    /// Validate the acknowledgement and start the destructive pipeline.
    ///
    /// A mismatched token changes nothing and reports `InvalidConfirmation`;
    /// the session stays in `Setup` awaiting a corrected token.
    pub fn confirm(&self, token: &ConfirmationToken) -> WipeResult<()> {
        let mut state = self.state.lock().unwrap();
        match state.phase {
            SessionPhase::Setup => {}
            SessionPhase::Confirmed | SessionPhase::Backup | SessionPhase::Wiping => {
                return Err(WipeError::SessionLocked)
            }
            SessionPhase::Completed | SessionPhase::Failed => {
                return Err(WipeError::InvalidSetup("no session in setup".to_string()))
            }
        }
        let session = state
            .session
            .as_ref()
            .ok_or_else(|| WipeError::InvalidSetup("no session in setup".to_string()))?;

        if !token.matches_required() {
            return Err(WipeError::InvalidConfirmation);
        }
        if session.mode == WipeMode::Selective && session.selection.is_empty() {
            return Err(WipeError::InvalidSetup(
                "selective wipe requires at least one selected item".to_string(),
            ));
        }

        let device = self.registry.get(&session.device_id)?;

        let session = state.session.as_mut().unwrap();
        session.status = SessionStatus::InProgress;
        session.started_at = Some(Utc::now());
        state.phase = SessionPhase::Confirmed;
        state.percent = 0;
        state.driver_active = true;
        let cancel = state.cancel.clone();
        let session_snapshot = state.session.as_ref().unwrap().clone();
        drop(state);

        tracing::info!(
            session_id = %session_snapshot.id,
            serial = %device.serial,
            mode = %session_snapshot.mode,
            backup = session_snapshot.backup_requested,
            "session confirmed"
        );

        let driver = Driver {
            registry: self.registry.clone(),
            media: self.media.clone(),
            engine: self.engine.clone(),
            backup: self.backup.clone(),
            issuer: self.issuer.clone(),
            store: self.store.clone(),
            operator: self.operator.clone(),
            state: self.state.clone(),
            spec: SanitizationSpec {
                mode: session_snapshot.mode,
                selection: session_snapshot.selection.clone(),
                pass_count: self.pass_count,
                verify: self.verify,
            },
        };
        tokio::spawn(async move {
            driver.run(session_snapshot, device, cancel).await;
        });

        Ok(())
    }

    /// Current phase and per-phase percentage.
    pub fn progress(&self) -> SessionProgress {
        let state = self.state.lock().unwrap();
        SessionProgress {
            phase: state.phase,
            percent: state.percent,
        }
    }

    /// Terminal outcome, or `InProgress` while the pipeline runs.
    pub fn result(&self) -> SessionResult {
        let state = self.state.lock().unwrap();
        match &state.outcome {
            Some(Outcome::Completed(certificate)) => SessionResult::Completed(certificate.clone()),
            Some(Outcome::Failed(reason)) => SessionResult::Failed(reason.clone()),
            None => SessionResult::InProgress,
        }
    }

    /// Snapshot of the current session record.
    pub fn session(&self) -> Option<WipeSession> {
        self.state.lock().unwrap().session.clone()
    }

    pub fn backup_record(&self) -> Option<BackupRecord> {
        self.state.lock().unwrap().backup_record.clone()
    }

    /// Request cancellation; honored at the next safe checkpoint and always
    /// terminates in `Failed`, never `Completed`.
    pub fn cancel(&self) {
        self.state.lock().unwrap().cancel.cancel();
    }

    /// Cancellation flag for wiring into a signal handler.
    pub fn cancel_flag(&self) -> CancelFlag {
        self.state.lock().unwrap().cancel.clone()
    }
}

fn dedup_preserving_order(selection: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    selection
        .into_iter()
        .filter(|item| seen.insert(item.clone()))
        .collect()
}

struct Driver {
    registry: Arc<DeviceRegistry>,
    media: Arc<dyn MediumProvider>,
    engine: Arc<SanitizationEngine>,
    backup: Arc<BackupEncryptor>,
    issuer: Arc<CertificateIssuer>,
    store: Arc<CertificateStore>,
    operator: Operator,
    state: Arc<Mutex<ControllerState>>,
    spec: SanitizationSpec,
}

impl Driver {
    async fn run(self, session: WipeSession, device: Device, cancel: CancelFlag) {
        let outcome = self.pipeline(&session, &device, cancel).await;
        let mut state = self.state.lock().unwrap();
        match outcome {
            Ok(certificate) => {
                if let Some(s) = state.session.as_mut() {
                    s.status = SessionStatus::Completed;
                    s.completed_at = Some(certificate.timestamp);
                    s.certificate_issued = true;
                }
                state.set_progress(SessionPhase::Completed, 100);
                state.outcome = Some(Outcome::Completed(certificate));
            }
            Err(reason) => {
                tracing::warn!(session_id = %session.id, reason = %reason, "session failed");
                if let Some(s) = state.session.as_mut() {
                    s.status = SessionStatus::Failed;
                    s.completed_at = Some(Utc::now());
                }
                let current_percent = state.percent;
                state.set_progress(SessionPhase::Failed, current_percent);
                state.outcome = Some(Outcome::Failed(reason));
            }
        }
        state.driver_active = false;
    }

    async fn pipeline(
        &self,
        session: &WipeSession,
        device: &Device,
        cancel: CancelFlag,
    ) -> Result<Certificate, FailureReason> {
        let medium = self
            .media
            .open(device)
            .map_err(|e| self.fail_device(device, FailureReason::from(&e)))?;

        if session.backup_requested {
            self.run_backup(session, device, medium.as_ref()).await?;
        }

        let digest = self.run_wipe(device, medium, cancel).await?;

        // Certificate issuance is synchronous with completion: success is
        // never observable without a persisted certificate.
        self.registry
            .set_status(&device.id, DeviceStatus::Completed)
            .map_err(|e| FailureReason::from(&e))?;

        let mut completed = session.clone();
        completed.status = SessionStatus::Completed;
        completed.completed_at = Some(Utc::now());

        let issued = self
            .issuer
            .issue(&completed, device, &self.operator, &digest.value)
            .and_then(|certificate| {
                self.store.insert(&certificate)?;
                Ok(certificate)
            });

        match issued {
            Ok(certificate) => Ok(certificate),
            Err(e) => Err(self.fail_device(device, FailureReason::from(&e))),
        }
    }

    async fn run_backup(
        &self,
        session: &WipeSession,
        device: &Device,
        medium: &dyn WipeMedium,
    ) -> Result<(), FailureReason> {
        {
            let mut state = self.state.lock().unwrap();
            state.set_progress(SessionPhase::Backup, 0);
        }

        let paths = if session.selection.is_empty() {
            medium
                .item_paths()
                .map_err(|e| self.fail_device(device, FailureReason::from(&e)))?
        } else {
            session.selection.clone()
        };

        let mut items = Vec::with_capacity(paths.len());
        for path in paths {
            let contents = medium
                .read_item(&path)
                .map_err(|e| self.fail_device(device, FailureReason::from(&e)))?;
            items.push(BackupItem {
                path,
                contents,
            });
        }

        let run = self.backup.backup(&session.id, items);
        let state = self.state.clone();
        let result = run
            .drive(move |percent| {
                state
                    .lock()
                    .unwrap()
                    .set_progress(SessionPhase::Backup, percent);
            })
            .await;

        match result {
            Ok(record) => {
                self.state.lock().unwrap().backup_record = Some(record);
                Ok(())
            }
            Err(reason) => Err(self.fail_device(device, reason)),
        }
    }

    async fn run_wipe(
        &self,
        device: &Device,
        medium: Box<dyn WipeMedium>,
        cancel: CancelFlag,
    ) -> Result<crate::engine::SanitizationDigest, FailureReason> {
        {
            let mut state = self.state.lock().unwrap();
            state.set_progress(SessionPhase::Wiping, 0);
        }
        self.registry
            .set_status(&device.id, DeviceStatus::Wiping)
            .map_err(|e| FailureReason::from(&e))?;

        let run = self.engine.run(device, medium, self.spec.clone(), cancel);
        let state = self.state.clone();
        let result = run
            .drive(move |percent, _phase| {
                state
                    .lock()
                    .unwrap()
                    .set_progress(SessionPhase::Wiping, percent);
            })
            .await;

        result.map_err(|reason| self.fail_device(device, reason))
    }

    /// Mark the device errored and pass the failure through. Fatal errors
    /// always leave the device in a defined terminal state.
    fn fail_device(&self, device: &Device, reason: FailureReason) -> FailureReason {
        if reason.class.is_fatal_to_session() || reason.class == ErrorClass::Validation {
            let _ = self.registry.set_status(&device.id, DeviceStatus::Error);
        }
        reason
    }
}
