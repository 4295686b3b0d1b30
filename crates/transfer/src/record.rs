use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use skyhop_protocol::Compression;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::connection::Endpoint;
use crate::control::{ControlState, TransferControl};
use crate::events::TransferEvent;
use crate::resume::{ResumeRecord, ResumeStore};
use crate::stats::{ThroughputEstimator, TransferStats};
use crate::TransferError;

/// Which way the bytes flow, seen from this device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Incoming,
    Outgoing,
}

/// Lifecycle state of a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferStatus {
    Preparing,
    Transferring,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl TransferStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Whether the state machine allows moving from `self` to `next`.
    pub fn can_transition_to(self, next: TransferStatus) -> bool {
        use TransferStatus::*;
        if self.is_terminal() {
            return false;
        }
        match (self, next) {
            (_, Cancelled) => true,
            (Preparing, Transferring | Failed) => true,
            (Transferring, Paused | Completed | Failed) => true,
            (Paused, Transferring | Failed) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Preparing => "preparing",
            Self::Transferring => "transferring",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Snapshot of one transfer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferRecord {
    pub id: String,
    pub file_name: String,
    pub file_size: u64,
    pub device_id: String,
    pub device_name: String,
    pub direction: Direction,
    pub status: TransferStatus,
    pub transferred_bytes: u64,
    pub resume_offset: u64,
    pub file_hash: Option<String>,
    #[serde(default)]
    pub compression: Compression,
    pub local_path: PathBuf,
    pub remote: Option<Endpoint>,
    #[serde(default)]
    pub stats: TransferStats,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    /// Driven through the external adapter rather than a local engine.
    #[serde(default)]
    pub external: bool,
}

impl TransferRecord {
    /// Creates a record in [`TransferStatus::Preparing`].
    pub fn new(
        id: impl Into<String>,
        file_name: impl Into<String>,
        file_size: u64,
        direction: Direction,
        local_path: PathBuf,
    ) -> Self {
        Self {
            id: id.into(),
            file_name: file_name.into(),
            file_size,
            device_id: String::new(),
            device_name: String::new(),
            direction,
            status: TransferStatus::Preparing,
            transferred_bytes: 0,
            resume_offset: 0,
            file_hash: None,
            compression: Compression::None,
            local_path,
            remote: None,
            stats: TransferStats::default(),
            created_at: Utc::now(),
            completed_at: None,
            error: None,
            external: false,
        }
    }

    /// Fraction done in `[0, 1]`. An empty file counts as done.
    pub fn progress(&self) -> f64 {
        if self.file_size == 0 {
            return 1.0;
        }
        (self.transferred_bytes as f64 / self.file_size as f64).min(1.0)
    }

    pub fn remaining_bytes(&self) -> u64 {
        self.file_size.saturating_sub(self.transferred_bytes)
    }
}

/// Shared, lock-protected state of one live transfer.
///
/// The owning engine advances it; the manager reads snapshots and flips the
/// control token.
pub struct TransferHandle {
    record: RwLock<TransferRecord>,
    control: TransferControl,
    estimator: Mutex<ThroughputEstimator>,
    events: Option<mpsc::Sender<TransferEvent>>,
    store: Option<Arc<ResumeStore>>,
    attached: AtomicBool,
}

impl TransferHandle {
    pub fn new(record: TransferRecord) -> Self {
        Self {
            record: RwLock::new(record),
            control: TransferControl::new(),
            estimator: Mutex::new(ThroughputEstimator::default()),
            events: None,
            store: None,
            attached: AtomicBool::new(false),
        }
    }

    /// Routes progress and state events to `tx`.
    pub fn with_events(mut self, tx: mpsc::Sender<TransferEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    /// Persists a [`ResumeRecord`] into `store` whenever the transfer pauses.
    pub fn with_store(mut self, store: Arc<ResumeStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn id(&self) -> String {
        self.read().id.clone()
    }

    pub fn status(&self) -> TransferStatus {
        self.read().status
    }

    pub fn control(&self) -> &TransferControl {
        &self.control
    }

    pub fn snapshot(&self) -> TransferRecord {
        self.read().clone()
    }

    /// Whether an engine loop currently owns this transfer.
    pub fn is_attached(&self) -> bool {
        self.attached.load(Ordering::Acquire)
    }

    pub fn set_attached(&self, attached: bool) {
        self.attached.store(attached, Ordering::Release);
    }

    /// Enters [`TransferStatus::Transferring`] and restarts the speed baseline.
    pub fn start(&self) -> Result<(), TransferError> {
        let transferred = self.read().transferred_bytes;
        self.transition(TransferStatus::Transferring, None)?;
        self.estimator().rebase(transferred, Instant::now());
        Ok(())
    }

    /// Moves the byte counter forward to `total`.
    ///
    /// Totals below the current count are ignored so the counter never
    /// decreases while transferring.
    pub fn advance_to(&self, total: u64) {
        let snapshot = {
            let mut rec = self.write();
            if total <= rec.transferred_bytes {
                return;
            }
            rec.transferred_bytes = total.min(rec.file_size);

            let mut est = self.estimator();
            est.record(rec.transferred_bytes);
            rec.stats = est.snapshot(rec.remaining_bytes());
            rec.clone()
        };
        self.emit(TransferEvent::Progress(snapshot));
    }

    /// Sets both counters to `offset` before a resumed loop starts.
    ///
    /// Only allowed while the transfer is not moving bytes.
    pub fn rewind_to(&self, offset: u64) -> Result<(), TransferError> {
        let mut rec = self.write();
        if rec.status == TransferStatus::Transferring || rec.status.is_terminal() {
            return Err(TransferError::InvalidState(format!(
                "cannot reposition a {} transfer",
                rec.status
            )));
        }
        if offset > rec.file_size {
            return Err(TransferError::InvalidState(format!(
                "offset {offset} beyond file size {}",
                rec.file_size
            )));
        }
        rec.transferred_bytes = offset;
        rec.resume_offset = offset;
        Ok(())
    }

    /// Chunk-boundary control check for engine loops.
    ///
    /// Parks while paused and returns [`TransferError::TransferCancelled`]
    /// once cancelled.
    pub async fn checkpoint(&self) -> Result<(), TransferError> {
        match self.control.state() {
            ControlState::Running => Ok(()),
            ControlState::Cancelled => Err(TransferError::TransferCancelled),
            ControlState::Paused => {
                self.enter_pause()?;
                match self.control.wait_unpaused().await {
                    ControlState::Running => {
                        self.start()?;
                        debug!(transfer = %self.id(), "transfer unparked");
                        Ok(())
                    }
                    _ => Err(TransferError::TransferCancelled),
                }
            }
        }
    }

    fn enter_pause(&self) -> Result<(), TransferError> {
        self.keep_resume_point();
        self.transition(TransferStatus::Paused, None)
    }

    /// Pins the resume offset at the current byte count and persists it.
    ///
    /// Callers must have made the counted bytes durable first.
    pub fn keep_resume_point(&self) {
        {
            let mut rec = self.write();
            rec.resume_offset = rec.transferred_bytes;
        }
        self.save_resume_record();
    }

    /// Writes the current resume point to the store, if one is attached.
    fn save_resume_record(&self) {
        let Some(store) = &self.store else {
            return;
        };
        let record = ResumeRecord::from_record(&self.read());
        if let Err(e) = store.save(&record) {
            warn!(transfer = %record.transfer_id, error = %e, "failed to persist resume record");
        }
    }

    pub fn set_file_hash(&self, hash: impl Into<String>) {
        self.write().file_hash = Some(hash.into());
    }

    pub fn complete(&self) -> Result<(), TransferError> {
        self.transition(TransferStatus::Completed, None)
    }

    pub fn fail(&self, error: impl Into<String>) -> Result<(), TransferError> {
        self.transition(TransferStatus::Failed, Some(error.into()))
    }

    /// Marks the record cancelled and signals any parked loop.
    pub fn cancel(&self) -> Result<(), TransferError> {
        self.control.cancel();
        self.transition(TransferStatus::Cancelled, None)
    }

    fn transition(&self, to: TransferStatus, error: Option<String>) -> Result<(), TransferError> {
        let (id, from) = {
            let mut rec = self.write();
            let from = rec.status;
            if from == to {
                return Ok(());
            }
            if !from.can_transition_to(to) {
                return Err(TransferError::InvalidState(format!(
                    "transfer {} cannot go from {from} to {to}",
                    rec.id
                )));
            }
            rec.status = to;
            if to.is_terminal() {
                rec.completed_at = Some(Utc::now());
            }
            if to == TransferStatus::Completed {
                rec.transferred_bytes = rec.file_size;
            }
            if error.is_some() {
                rec.error = error.clone();
            }
            (rec.id.clone(), from)
        };

        debug!(transfer = %id, %from, %to, "transfer state changed");
        self.emit(TransferEvent::StateChanged {
            transfer_id: id,
            status: to,
            error,
        });
        Ok(())
    }

    fn emit(&self, event: TransferEvent) {
        if let Some(tx) = &self.events {
            if let Err(mpsc::error::TrySendError::Full(ev)) = tx.try_send(event) {
                debug!(transfer = %ev.transfer_id(), "event channel full, dropping event");
            }
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, TransferRecord> {
        self.record.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, TransferRecord> {
        self.record.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn estimator(&self) -> std::sync::MutexGuard<'_, ThroughputEstimator> {
        self.estimator.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
