pub mod medium;


pub use medium::{
    FileMedium, FileMediumProvider, MediumProvider, SimulatedMedium, SimulatedMediumProvider,
    WipeMedium,
};

use crate::{Device, FailureReason, WipeError, WipeMode, WipeResult};
use ring::rand::{SecureRandom, SystemRandom};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Shared cancellation flag, checked at pass boundaries.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Raw flag for wiring into a signal handler.
    pub fn as_atomic(&self) -> Arc<AtomicBool> {
        self.0.clone()
    }
}

/// What the engine is currently doing, for progress rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WipePhase {
    Preparing,
    Overwriting { pass: u32, total: u32 },
    Verifying,
    Unlinking,
    Complete,
}

impl std::fmt::Display for WipePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WipePhase::Preparing => write!(f, "Preparing"),
            WipePhase::Overwriting { pass, total } => {
                write!(f, "Overwriting (pass {}/{})", pass, total)
            }
            WipePhase::Verifying => write!(f, "Verifying"),
            WipePhase::Unlinking => write!(f, "Removing items"),
            WipePhase::Complete => write!(f, "Complete"),
        }
    }
}

/// Digest attesting what was sanitized, recorded on the certificate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SanitizationDigest {
    pub algorithm: String,
    pub value: String,
}

impl SanitizationDigest {
    fn sha256(value: String) -> Self {
        Self {
            algorithm: "SHA-256".to_string(),
            value,
        }
    }
}

impl std::fmt::Display for SanitizationDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.value)
    }
}

/// Events of one run: zero or more progress reports with non-decreasing
/// percentages, then exactly one terminal event.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    Progress { percent: u8, phase: WipePhase },
    Completed(SanitizationDigest),
    Failed(FailureReason),
}

/// Parameters of a sanitization run.
///
/// NIST SP 800-88 prescribes a single overwrite pass with verification for
/// modern media; legacy media get more passes. Both knobs are explicit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SanitizationSpec {
    pub mode: WipeMode,
    pub selection: Vec<String>,
    pub pass_count: u32,
    pub verify: bool,
}

impl Default for SanitizationSpec {
    fn default() -> Self {
        Self {
            mode: WipeMode::Complete,
            selection: Vec::new(),
            pass_count: 1,
            verify: true,
        }
    }
}

impl SanitizationSpec {
    pub fn complete() -> Self {
        Self::default()
    }

    pub fn selective(selection: Vec<String>) -> Self {
        Self {
            mode: WipeMode::Selective,
            selection,
            ..Self::default()
        }
    }

    pub fn with_passes(mut self, pass_count: u32) -> Self {
        self.pass_count = pass_count.max(1);
        self
    }

    pub fn with_verify(mut self, verify: bool) -> Self {
        self.verify = verify;
        self
    }
}

/// Handle to a running sanitization: drain `events` until the terminal one.
/// The sequence is not restartable; start a new run instead.
pub struct WipeRun {
    pub events: mpsc::UnboundedReceiver<EngineEvent>,
}

impl WipeRun {
    /// Drain all events, invoking `on_progress` per report, and return the
    /// terminal outcome.
    pub async fn drive<F>(mut self, mut on_progress: F) -> Result<SanitizationDigest, FailureReason>
    where
        F: FnMut(u8, WipePhase),
    {
        while let Some(event) = self.events.recv().await {
            match event {
                EngineEvent::Progress { percent, phase } => on_progress(percent, phase),
                EngineEvent::Completed(digest) => return Ok(digest),
                EngineEvent::Failed(reason) => return Err(reason),
            }
        }
        Err(FailureReason::new(
            crate::ErrorClass::Resource,
            "engine terminated without a terminal event",
        ))
    }
}

/// Executes the overwrite/erase algorithm for one device.
pub struct SanitizationEngine {
    chunk_size: usize,
}

impl Default for SanitizationEngine {
    fn default() -> Self {
        Self {
            chunk_size: 1024 * 1024,
        }
    }
}

impl SanitizationEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(512);
        self
    }

    /// Start a run. Work happens on a blocking task; progress and the single
    /// terminal event arrive on the returned handle.
    pub fn run(
        &self,
        device: &Device,
        medium: Box<dyn WipeMedium>,
        spec: SanitizationSpec,
        cancel: CancelFlag,
    ) -> WipeRun {
        let (tx, rx) = mpsc::unbounded_channel();
        let chunk_size = self.chunk_size;
        let serial = device.serial.clone();

        tokio::task::spawn_blocking(move || {
            let mut reporter = ProgressReporter::new(tx.clone());
            let outcome = execute(serial, medium, &spec, &cancel, chunk_size, &mut reporter);
            let terminal = match outcome {
                Ok(digest) => {
                    reporter.report(100, WipePhase::Complete);
                    EngineEvent::Completed(digest)
                }
                Err(err) => {
                    tracing::warn!(error = %err, "sanitization run failed");
                    EngineEvent::Failed(FailureReason::from(&err))
                }
            };
            let _ = tx.send(terminal);
        });

        WipeRun { events: rx }
    }
}

/// Deduplicates progress so events arrive at bounded intervals: one per
/// percent or phase change.
struct ProgressReporter {
    tx: mpsc::UnboundedSender<EngineEvent>,
    last: Option<(u8, WipePhase)>,
}

impl ProgressReporter {
    fn new(tx: mpsc::UnboundedSender<EngineEvent>) -> Self {
        Self { tx, last: None }
    }

    fn report(&mut self, percent: u8, phase: WipePhase) {
        let percent = percent.min(100);
        if self.last == Some((percent, phase)) {
            return;
        }
        self.last = Some((percent, phase));
        let _ = self.tx.send(EngineEvent::Progress { percent, phase });
    }
}

/// Overwrite patterns cycled across passes: zeros, ones, then random data.
#[derive(Debug, Clone, Copy)]
enum PassPattern {
    Zeros,
    Ones,
    Random,
}

impl PassPattern {
    fn for_pass(index: u32) -> Self {
        match index % 3 {
            0 => PassPattern::Zeros,
            1 => PassPattern::Ones,
            _ => PassPattern::Random,
        }
    }

    fn fill(&self, buffer: &mut [u8], rng: &SystemRandom) -> WipeResult<()> {
        match self {
            PassPattern::Zeros => buffer.fill(0x00),
            PassPattern::Ones => buffer.fill(0xFF),
            PassPattern::Random => rng
                .fill(buffer)
                .map_err(|_| WipeError::Io(std::io::Error::other("secure RNG failure")))?,
        }
        Ok(())
    }
}

fn execute(
    serial: String,
    mut medium: Box<dyn WipeMedium>,
    spec: &SanitizationSpec,
    cancel: &CancelFlag,
    chunk_size: usize,
    reporter: &mut ProgressReporter,
) -> WipeResult<SanitizationDigest> {
    reporter.report(0, WipePhase::Preparing);
    let rng = SystemRandom::new();

    match spec.mode {
        WipeMode::Complete => {
            wipe_complete(&serial, medium.as_mut(), spec, cancel, chunk_size, &rng, reporter)
        }
        WipeMode::Selective => wipe_selective(medium.as_mut(), spec, cancel, &rng, reporter),
    }
}

fn check_connected(medium: &dyn WipeMedium) -> WipeResult<()> {
    if medium.is_connected() {
        Ok(())
    } else {
        Err(WipeError::DeviceDisconnected(
            "medium vanished mid-operation".to_string(),
        ))
    }
}

fn check_cancel(cancel: &CancelFlag) -> WipeResult<()> {
    if cancel.is_cancelled() {
        Err(WipeError::Cancelled)
    } else {
        Ok(())
    }
}

fn wipe_complete(
    serial: &str,
    medium: &mut dyn WipeMedium,
    spec: &SanitizationSpec,
    cancel: &CancelFlag,
    chunk_size: usize,
    rng: &SystemRandom,
    reporter: &mut ProgressReporter,
) -> WipeResult<SanitizationDigest> {
    let capacity = medium.capacity();
    if capacity == 0 {
        return Err(WipeError::InvalidSetup(
            "medium reports zero capacity".to_string(),
        ));
    }

    let chunks = (capacity + chunk_size as u64 - 1) / chunk_size as u64;
    let passes = spec.pass_count.max(1);
    let verify_units = if spec.verify { chunks } else { 0 };
    let total_units = chunks * passes as u64 + verify_units;
    let mut done_units = 0u64;

    // Checksums of the final pass, chunk by chunk, for verification and the
    // run digest.
    let mut final_checksums: Vec<[u8; 32]> = Vec::with_capacity(chunks as usize);
    let mut buffer = vec![0u8; chunk_size];

    for pass in 0..passes {
        check_cancel(cancel)?;
        let pattern = PassPattern::for_pass(pass);
        let last_pass = pass + 1 == passes;
        if last_pass {
            final_checksums.clear();
        }
        let phase = WipePhase::Overwriting {
            pass: pass + 1,
            total: passes,
        };

        let mut offset = 0u64;
        while offset < capacity {
            check_connected(medium)?;
            let len = (capacity - offset).min(chunk_size as u64) as usize;
            pattern.fill(&mut buffer[..len], rng)?;
            medium.write_chunk(offset, &buffer[..len])?;

            if last_pass {
                final_checksums.push(Sha256::digest(&buffer[..len]).into());
            }

            offset += len as u64;
            done_units += 1;
            reporter.report(percent(done_units, total_units), phase);
        }
        medium.sync()?;
    }

    if spec.verify {
        let mut offset = 0u64;
        let mut chunk_index = 0usize;
        while offset < capacity {
            check_connected(medium)?;
            let len = (capacity - offset).min(chunk_size as u64) as usize;
            let read_back = medium.read_chunk(offset, len)?;
            let actual: [u8; 32] = Sha256::digest(&read_back).into();
            if actual != final_checksums[chunk_index] {
                return Err(WipeError::VerificationMismatch(format!(
                    "chunk at offset {} does not match the written pattern",
                    offset
                )));
            }
            offset += len as u64;
            chunk_index += 1;
            done_units += 1;
            reporter.report(percent(done_units, total_units), WipePhase::Verifying);
        }
    }

    let mut hasher = Sha256::new();
    hasher.update(serial.as_bytes());
    for checksum in &final_checksums {
        hasher.update(checksum);
    }
    Ok(SanitizationDigest::sha256(hex::encode(hasher.finalize())))
}

fn wipe_selective(
    medium: &mut dyn WipeMedium,
    spec: &SanitizationSpec,
    cancel: &CancelFlag,
    rng: &SystemRandom,
    reporter: &mut ProgressReporter,
) -> WipeResult<SanitizationDigest> {
    if spec.selection.is_empty() {
        return Err(WipeError::InvalidSetup(
            "selective wipe requires at least one selected item".to_string(),
        ));
    }

    let passes = spec.pass_count.max(1);
    let verify_units = if spec.verify { 1 } else { 0 };
    let units_per_item = passes as u64 + verify_units + 1;
    let total_units = spec.selection.len() as u64 * units_per_item;
    let mut done_units = 0u64;

    // Ordered (path, final-pass checksum) pairs feed the run digest.
    let mut item_checksums: Vec<(String, [u8; 32])> = Vec::with_capacity(spec.selection.len());

    for path in &spec.selection {
        check_cancel(cancel)?;
        check_connected(medium)?;

        let size = medium.item_size(path)? as usize;
        let mut buffer = vec![0u8; size];
        let mut final_checksum = [0u8; 32];

        for pass in 0..passes {
            check_cancel(cancel)?;
            let pattern = PassPattern::for_pass(pass);
            pattern.fill(&mut buffer, rng)?;
            medium.overwrite_item(path, &buffer)?;
            if pass + 1 == passes {
                final_checksum = Sha256::digest(&buffer).into();
            }
            done_units += 1;
            reporter.report(
                percent(done_units, total_units),
                WipePhase::Overwriting {
                    pass: pass + 1,
                    total: passes,
                },
            );
        }

        if spec.verify {
            let read_back = medium.read_item(path)?;
            let actual: [u8; 32] = Sha256::digest(&read_back).into();
            if actual != final_checksum {
                return Err(WipeError::VerificationMismatch(format!(
                    "item {} does not match the written pattern",
                    path
                )));
            }
            done_units += 1;
            reporter.report(percent(done_units, total_units), WipePhase::Verifying);
        }

        medium.unlink_item(path)?;
        done_units += 1;
        reporter.report(percent(done_units, total_units), WipePhase::Unlinking);

        item_checksums.push((path.clone(), final_checksum));
    }

    let mut hasher = Sha256::new();
    for (path, checksum) in &item_checksums {
        hasher.update(path.as_bytes());
        hasher.update([0u8]);
        hasher.update(checksum);
    }
    Ok(SanitizationDigest::sha256(hex::encode(hasher.finalize())))
}

fn percent(done: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    ((done * 100) / total) as u8
}
