//! Registry and orchestration of transfers.
//!
//! [`TransferManager`] owns the active map, a capped history, the resume
//! store and the connector. Each transfer runs on the caller's task against
//! one exclusive connection; `serve` spawns one task per accepted socket.

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use skyhop_protocol::{FileMetadata, Frame, MessageKind, ResumeRequest, TransferReceipt};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::TransferConfig;
use crate::connection::{Connection, Connector, Endpoint, TcpConnector, release};
use crate::events::TransferEvent;
use crate::receipt::{await_receipt, evaluate_receipt, send_failure_receipt, send_receipt};
use crate::receiver::{open_destination, receive_chunks};
use crate::record::{Direction, TransferHandle, TransferRecord, TransferStatus};
use crate::resume::{ResumeRecord, ResumeStore};
use crate::sender::{ChunkPlan, send_chunks};
use crate::validation::{validate_file_name, validate_transfer_id};
use crate::verify::{hash_file, hashes_match};
use crate::wire::{Opening, read_opening, read_resume_ack, write_frame, write_resume_ack, write_resume_request};
use crate::TransferError;

/// Maximum finished transfers kept in memory.
pub const MAX_HISTORY: usize = 100;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// How this device introduces itself in metadata frames.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceIdentity {
    pub id: String,
    pub name: String,
    pub platform: String,
    #[serde(default)]
    pub os_version: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub chip: Option<String>,
}

impl Default for DeviceIdentity {
    fn default() -> Self {
        let name = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "skyhop".into());
        Self {
            id: name.to_lowercase(),
            name,
            platform: std::env::consts::OS.into(),
            os_version: None,
            model: None,
            chip: None,
        }
    }
}

/// A transfer moved by some other transport, reported into the registry.
#[derive(Debug, Clone)]
pub struct ExternalTransfer {
    /// Generated when absent.
    pub transfer_id: Option<String>,
    pub file_name: String,
    pub file_size: u64,
    pub device_id: String,
    pub device_name: String,
    pub local_path: PathBuf,
    pub remote: Option<Endpoint>,
}

/// Runs transfers and keeps their bookkeeping.
pub struct TransferManager {
    config: TransferConfig,
    identity: DeviceIdentity,
    store: Arc<ResumeStore>,
    connector: Arc<dyn Connector>,
    active: RwLock<HashMap<String, Arc<TransferHandle>>>,
    history: RwLock<VecDeque<TransferRecord>>,
    events_tx: mpsc::Sender<TransferEvent>,
    events_rx: Mutex<Option<mpsc::Receiver<TransferEvent>>>,
}

impl TransferManager {
    pub fn new(
        config: TransferConfig,
        identity: DeviceIdentity,
        store: ResumeStore,
        connector: Arc<dyn Connector>,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            config,
            identity,
            store: Arc::new(store),
            connector,
            active: RwLock::new(HashMap::new()),
            history: RwLock::new(VecDeque::new()),
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
        }
    }

    /// Manager with a TCP connector and the configured (or platform) resume dir.
    pub fn from_config(config: TransferConfig, identity: DeviceIdentity) -> Result<Self, TransferError> {
        let store = match &config.resume_dir {
            Some(dir) => ResumeStore::new(dir),
            None => ResumeStore::open_default()?,
        };
        let connector = Arc::new(TcpConnector::new(config.connect_timeout()));
        Ok(Self::new(config, identity, store, connector))
    }

    pub fn config(&self) -> &TransferConfig {
        &self.config
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    pub fn store(&self) -> &ResumeStore {
        &self.store
    }

    /// Takes the event receiver. Returns `None` after the first call.
    pub async fn take_events(&self) -> Option<mpsc::Receiver<TransferEvent>> {
        self.events_rx.lock().await.take()
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// Active or historical record for `id`.
    pub fn get(&self, id: &str) -> Option<TransferRecord> {
        if let Some(handle) = self.handle(id) {
            return Some(handle.snapshot());
        }
        self.read_history().iter().find(|r| r.id == id).cloned()
    }

    pub fn active(&self) -> Vec<TransferRecord> {
        self.read_active().values().map(|h| h.snapshot()).collect()
    }

    /// Finished transfers, newest first.
    pub fn history(&self) -> Vec<TransferRecord> {
        self.read_history().iter().cloned().collect()
    }

    pub fn clear_history(&self) {
        self.history
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Resume records left on disk by earlier sessions.
    pub fn pending_resumes(&self) -> Result<Vec<ResumeRecord>, TransferError> {
        self.store.list()
    }

    /// Registers every stored resume record as a paused, detached transfer.
    ///
    /// Returns the records that were added.
    pub fn restore_pending(&self) -> Result<Vec<TransferRecord>, TransferError> {
        let mut restored = Vec::new();
        for resume in self.store.list()? {
            let Ok(handle) = self.try_register(resume.to_record()) else {
                continue;
            };
            handle.set_attached(false);
            handle.control().pause();
            info!(
                transfer = %resume.transfer_id,
                offset = resume.resume_offset,
                direction = ?resume.direction,
                "restored paused transfer"
            );
            restored.push(handle.snapshot());
        }
        Ok(restored)
    }

    // -----------------------------------------------------------------------
    // Sending
    // -----------------------------------------------------------------------

    /// Sends `path` to `endpoint` and waits for the receiver's receipt.
    pub async fn send_file(&self, path: &Path, endpoint: &Endpoint) -> Result<TransferRecord, TransferError> {
        let meta = match tokio::fs::metadata(path).await {
            Ok(m) if m.is_file() => m,
            Ok(_) => return Err(TransferError::InvalidPath(format!("not a regular file: {}", path.display()))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(TransferError::FileNotFound(path.to_path_buf()));
            }
            Err(e) => return Err(e.into()),
        };
        let local_path = tokio::fs::canonicalize(path).await?;
        let file_name = local_path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| TransferError::InvalidPath(format!("no usable file name: {}", path.display())))?
            .to_string();

        let mut record = TransferRecord::new(
            Uuid::new_v4().to_string(),
            file_name,
            meta.len(),
            Direction::Outgoing,
            local_path,
        );
        record.device_id = endpoint.to_string();
        record.device_name = endpoint.address.clone();
        record.remote = Some(endpoint.clone());
        record.compression = self.config.compression();

        let handle = self.register(record);
        info!(
            transfer = %handle.id(),
            peer = %endpoint,
            size = meta.len(),
            "sending file"
        );
        let result = self.run_outgoing(&handle, endpoint).await;
        self.finish(&handle, result)
    }

    async fn run_outgoing(&self, handle: &TransferHandle, endpoint: &Endpoint) -> Result<(), TransferError> {
        let rec = handle.snapshot();
        let hash = hash_file(rec.local_path.clone()).await?;
        handle.set_file_hash(hash.clone());

        let mut conn = self.connector.connect(endpoint).await?;
        let result = async {
            handle.start()?;
            let metadata = FileMetadata {
                transfer_id: rec.id.clone(),
                file_name: rec.file_name.clone(),
                file_size: rec.file_size as i64,
                file_hash: hash,
                chunk_size: self.config.effective_chunk_size() as i64,
                compression: rec.compression,
                sender_id: Some(self.identity.id.clone()),
                sender_name: Some(self.identity.name.clone()),
                sender_platform: Some(self.identity.platform.clone()),
                sender_os_version: self.identity.os_version.clone(),
                sender_model: self.identity.model.clone(),
                sender_chip: self.identity.chip.clone(),
            };
            write_frame(&mut conn, &Frame::metadata(&metadata)?).await?;
            self.stream_and_confirm(handle, &mut conn, 0).await
        }
        .await;
        release(conn).await;
        result
    }

    /// Sender loop from `offset` followed by the receipt handshake.
    async fn stream_and_confirm(
        &self,
        handle: &TransferHandle,
        conn: &mut Connection,
        offset: u64,
    ) -> Result<(), TransferError> {
        let rec = handle.snapshot();
        let hash = rec
            .file_hash
            .clone()
            .ok_or_else(|| TransferError::InvalidState("outgoing transfer has no file hash".into()))?;

        let mut source = tokio::fs::File::open(&rec.local_path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => TransferError::FileNotFound(rec.local_path.clone()),
            _ => TransferError::Io(e),
        })?;
        let plan = ChunkPlan {
            chunk_size: self.config.effective_chunk_size(),
            compression: rec.compression,
        };
        send_chunks(&mut source, conn, handle, plan, offset).await?;
        drop(source);

        let receipt = await_receipt(conn, self.config.receipt_timeout(), handle.control()).await?;
        evaluate_receipt(&receipt, &rec.id, rec.file_size, &hash)
    }

    // -----------------------------------------------------------------------
    // Receiving
    // -----------------------------------------------------------------------

    /// Handles one accepted connection: a fresh transfer or a resume request.
    pub async fn receive_file(
        &self,
        mut conn: Connection,
        peer: Option<SocketAddr>,
    ) -> Result<TransferRecord, TransferError> {
        let opening = match tokio::time::timeout(self.config.connect_timeout(), read_opening(&mut conn)).await {
            Ok(Ok(opening)) => opening,
            Ok(Err(e)) => {
                release(conn).await;
                return Err(e);
            }
            Err(_) => {
                release(conn).await;
                return Err(TransferError::Timeout("first frame"));
            }
        };

        match opening {
            Opening::Frame(frame) => self.accept_fresh(conn, frame, peer).await,
            Opening::Resume(request) => self.accept_resume(conn, request).await,
        }
    }

    async fn accept_fresh(
        &self,
        mut conn: Connection,
        frame: Frame,
        peer: Option<SocketAddr>,
    ) -> Result<TransferRecord, TransferError> {
        let prepared = async {
            let meta: FileMetadata = frame.parse(MessageKind::Metadata)?;
            validate_transfer_id(&meta.transfer_id)?;
            validate_file_name(&meta.file_name)?;
            if meta.file_size < 0 {
                return Err(TransferError::InvalidHeader(format!(
                    "negative file size {}",
                    meta.file_size
                )));
            }
            if self.handle(&meta.transfer_id).is_some() {
                return Err(TransferError::InvalidState(format!(
                    "transfer {} is already active",
                    meta.transfer_id
                )));
            }
            let dest = unique_destination(&self.config.download_dir, &meta.file_name).await?;
            Ok::<_, TransferError>((meta, dest))
        }
        .await;

        let (meta, dest) = match prepared {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "rejecting incoming transfer");
                release(conn).await;
                return Err(e);
            }
        };

        let peer_label = peer.map(|p| p.ip().to_string()).unwrap_or_else(|| "unknown".into());
        let mut record = TransferRecord::new(
            meta.transfer_id.clone(),
            meta.file_name.clone(),
            meta.file_size as u64,
            Direction::Incoming,
            dest,
        );
        record.device_id = meta.sender_id.clone().unwrap_or_else(|| peer_label.clone());
        record.device_name = meta.sender_name.clone().unwrap_or(peer_label);
        record.file_hash = Some(meta.file_hash.clone());
        record.compression = meta.compression;

        let handle = match self.try_register(record) {
            Ok(h) => h,
            Err(e) => {
                warn!(error = %e, "rejecting incoming transfer");
                release(conn).await;
                return Err(e);
            }
        };
        info!(
            transfer = %meta.transfer_id,
            file = %meta.file_name,
            size = meta.file_size,
            sender = %handle.snapshot().device_name,
            "receiving file"
        );

        let result = self.run_incoming(&handle, &mut conn, 0).await;
        if let Err(e) = &result {
            self.report_receive_failure(&handle, &mut conn, e).await;
        }
        release(conn).await;
        self.finish(&handle, result)
    }

    /// Receiver loop from `offset`, verification and the success receipt.
    async fn run_incoming(
        &self,
        handle: &TransferHandle,
        conn: &mut Connection,
        offset: u64,
    ) -> Result<(), TransferError> {
        handle.start()?;
        let rec = handle.snapshot();

        let mut dest = open_destination(&rec.local_path).await?;
        if let Err(e) = receive_chunks(conn, &mut dest, handle, rec.compression, offset).await {
            // Whatever was counted must be on disk before a resume point is kept.
            if let Err(sync) = sync_partial(&mut dest).await {
                warn!(transfer = %rec.id, error = %sync, "could not sync partial file");
            }
            return Err(e);
        }
        drop(dest);

        let expected = rec.file_hash.clone().unwrap_or_default();
        let actual = hash_file(rec.local_path.clone()).await?;
        if !hashes_match(&expected, &actual) {
            return Err(TransferError::IntegrityCheckFailed { expected, actual });
        }
        if handle.control().is_cancelled() {
            return Err(TransferError::TransferCancelled);
        }

        let receipt = TransferReceipt::accepted(rec.id.clone(), rec.file_size as i64, actual);
        if let Err(e) = send_receipt(conn, &receipt).await {
            warn!(transfer = %rec.id, error = %e, "file verified but receipt could not be delivered");
        }
        Ok(())
    }

    async fn report_receive_failure(&self, handle: &TransferHandle, conn: &mut Connection, error: &TransferError) {
        if matches!(error, TransferError::ConnectionClosed) {
            return;
        }
        let rec = handle.snapshot();
        send_failure_receipt(conn, &rec.id, rec.transferred_bytes, error).await;
    }

    // -----------------------------------------------------------------------
    // Resume
    // -----------------------------------------------------------------------

    /// Accepting side of the resume sub-protocol.
    async fn accept_resume(&self, mut conn: Connection, request: ResumeRequest) -> Result<TransferRecord, TransferError> {
        let id = request.transfer_id.clone();
        let prepared = self.prepare_accepted_resume(&request).await;
        let (handle, offset) = match prepared {
            Ok(p) => p,
            Err(e) => {
                warn!(transfer = %id, offset = request.offset, error = %e, "refusing resume request");
                release(conn).await;
                return Err(e);
            }
        };

        info!(transfer = %id, offset, "accepted resume request");
        let result = async {
            write_resume_ack(&mut conn).await?;
            match handle.snapshot().direction {
                Direction::Incoming => self.run_incoming(&handle, &mut conn, offset).await,
                Direction::Outgoing => {
                    handle.start()?;
                    self.stream_and_confirm(&handle, &mut conn, offset).await
                }
            }
        }
        .await;

        if let (Err(e), Direction::Incoming) = (&result, handle.snapshot().direction) {
            self.report_receive_failure(&handle, &mut conn, e).await;
        }
        release(conn).await;
        self.finish(&handle, result)
    }

    /// Looks up and validates a resume request against local durable state.
    async fn prepare_accepted_resume(
        &self,
        request: &ResumeRequest,
    ) -> Result<(Arc<TransferHandle>, u64), TransferError> {
        let id = &request.transfer_id;
        validate_transfer_id(id)?;
        let stored = self
            .store
            .load(id)?
            .ok_or_else(|| TransferError::UnknownTransfer(id.clone()))?;
        let offset = request.offset as u64;

        let limit = match stored.direction {
            Direction::Incoming => match tokio::fs::metadata(&stored.local_path).await {
                Ok(m) => m.len().min(stored.file_size),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => 0,
                Err(e) => return Err(e.into()),
            },
            Direction::Outgoing => {
                if !tokio::fs::try_exists(&stored.local_path).await? {
                    return Err(TransferError::FileNotFound(stored.local_path.clone()));
                }
                stored.file_size
            }
        };
        if offset > limit {
            return Err(TransferError::InvalidState(format!(
                "resume offset {offset} beyond {limit} durable bytes"
            )));
        }

        let handle = self.detached_handle(&stored)?;
        handle.rewind_to(offset)?;
        Ok((handle, offset))
    }

    /// Active handle for a stored record, registering one when needed.
    fn detached_handle(&self, stored: &ResumeRecord) -> Result<Arc<TransferHandle>, TransferError> {
        if let Some(handle) = self.handle(&stored.transfer_id) {
            if handle.is_attached() {
                if handle.status() != TransferStatus::Paused {
                    return Err(TransferError::InvalidState(format!(
                        "transfer {} is already running",
                        stored.transfer_id
                    )));
                }
                // The parked engine's connection was abandoned by the peer.
                let fresh = self.register(stored.to_record());
                handle.control().cancel();
                debug!(transfer = %stored.transfer_id, "superseded parked engine");
                return Ok(fresh);
            }
            handle.control().resume();
            handle.set_attached(true);
            return Ok(handle);
        }
        let handle = self.register(stored.to_record());
        Ok(handle)
    }

    /// Re-opens the connection for a stored outgoing transfer and finishes it.
    async fn reconnect_outgoing(
        &self,
        handle: &TransferHandle,
        endpoint: &Endpoint,
        offset: u64,
    ) -> Result<(), TransferError> {
        let id = handle.id();
        let mut conn = self.connector.connect(endpoint).await?;
        let result = async {
            let request = ResumeRequest {
                transfer_id: id.clone(),
                offset: offset as i64,
            };
            write_resume_request(&mut conn, &request).await?;
            match tokio::time::timeout(self.config.resume_ack_timeout(), read_resume_ack(&mut conn)).await {
                Ok(ack) => ack?,
                Err(_) => return Err(TransferError::Timeout("resume ack")),
            }
            debug!(transfer = %id, offset, "resume acknowledged");
            handle.start()?;
            self.stream_and_confirm(handle, &mut conn, offset).await
        }
        .await;
        release(conn).await;
        result
    }

    // -----------------------------------------------------------------------
    // Control
    // -----------------------------------------------------------------------

    /// Requests a pause. The engine parks at its next chunk boundary.
    pub fn pause(&self, id: &str) -> Result<(), TransferError> {
        let handle = self.engine_handle(id)?;
        let status = handle.status();
        if status != TransferStatus::Transferring {
            return Err(TransferError::InvalidState(format!("cannot pause a {status} transfer")));
        }
        handle.control().pause();
        info!(transfer = %id, "pause requested");
        Ok(())
    }

    /// Continues a paused transfer.
    ///
    /// A transfer whose engine is still parked is unparked in place and the
    /// current snapshot is returned. Otherwise the transfer is continued from
    /// its resume record over a new connection and the final record is
    /// returned once that run ends.
    pub async fn resume(&self, id: &str) -> Result<TransferRecord, TransferError> {
        if let Some(handle) = self.handle(id) {
            if handle.snapshot().external {
                return Err(TransferError::InvalidState(format!("transfer {id} is external")));
            }
            if handle.is_attached() {
                if !handle.control().resume() {
                    return Err(TransferError::InvalidState(format!(
                        "transfer {id} is not paused"
                    )));
                }
                info!(transfer = %id, "transfer resumed in place");
                return Ok(handle.snapshot());
            }
        }

        let stored = self
            .store
            .load(id)?
            .ok_or_else(|| TransferError::UnknownTransfer(id.to_string()))?;
        if stored.direction == Direction::Incoming {
            return Err(TransferError::InvalidState(format!(
                "incoming transfer {id} continues when its sender reconnects"
            )));
        }
        let endpoint = stored
            .endpoint()
            .ok_or_else(|| TransferError::InvalidState(format!("transfer {id} has no recorded peer")))?;

        let handle = self.detached_handle(&stored)?;
        handle.rewind_to(stored.resume_offset.min(stored.file_size))?;
        info!(transfer = %id, peer = %endpoint, offset = stored.resume_offset, "resuming transfer");
        let result = self.reconnect_outgoing(&handle, &endpoint, stored.resume_offset).await;
        self.finish(&handle, result)
    }

    /// Cancels a transfer. A running engine stops at its next boundary.
    pub fn cancel(&self, id: &str) -> Result<(), TransferError> {
        let Some(handle) = self.handle(id) else {
            if self.store.load(id)?.is_some() {
                self.store.delete(id)?;
                info!(transfer = %id, "discarded stored resume point");
                return Ok(());
            }
            return Err(TransferError::UnknownTransfer(id.to_string()));
        };

        handle.cancel()?;
        info!(transfer = %id, "transfer cancelled");
        if !handle.is_attached() {
            self.discard_resume_record(id);
            self.retire(id);
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // External adapter
    // -----------------------------------------------------------------------

    pub fn begin_incoming_external(&self, transfer: ExternalTransfer) -> Result<String, TransferError> {
        self.begin_external(transfer, Direction::Incoming)
    }

    pub fn begin_outgoing_external(&self, transfer: ExternalTransfer) -> Result<String, TransferError> {
        self.begin_external(transfer, Direction::Outgoing)
    }

    fn begin_external(&self, transfer: ExternalTransfer, direction: Direction) -> Result<String, TransferError> {
        let id = transfer
            .transfer_id
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let mut record = TransferRecord::new(
            id.clone(),
            transfer.file_name,
            transfer.file_size,
            direction,
            transfer.local_path,
        );
        record.device_id = transfer.device_id;
        record.device_name = transfer.device_name;
        record.remote = transfer.remote;
        record.external = true;

        let handle = self.try_register(record)?;
        handle.set_attached(false);
        handle.start()?;
        debug!(transfer = %id, ?direction, "external transfer started");
        Ok(id)
    }

    /// Reports external progress as an absolute byte count.
    pub fn update_external(&self, id: &str, transferred_bytes: u64) -> Result<(), TransferError> {
        self.external_handle(id)?.advance_to(transferred_bytes);
        Ok(())
    }

    pub fn complete_external(&self, id: &str) -> Result<TransferRecord, TransferError> {
        let handle = self.external_handle(id)?;
        handle.complete()?;
        info!(transfer = %id, "external transfer completed");
        Ok(self.retire(id).unwrap_or_else(|| handle.snapshot()))
    }

    pub fn fail_external(&self, id: &str, error: impl Into<String>) -> Result<TransferRecord, TransferError> {
        let handle = self.external_handle(id)?;
        let error = error.into();
        handle.fail(error.clone())?;
        warn!(transfer = %id, %error, "external transfer failed");
        Ok(self.retire(id).unwrap_or_else(|| handle.snapshot()))
    }

    // -----------------------------------------------------------------------
    // Serving
    // -----------------------------------------------------------------------

    /// Accepts connections until `cancel` fires, one task per connection.
    pub async fn serve(self: Arc<Self>, listener: TcpListener, cancel: CancellationToken) -> Result<(), TransferError> {
        if let Ok(addr) = listener.local_addr() {
            info!(%addr, "listening for transfers");
        }
        loop {
            let (stream, peer) = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("transfer listener stopped");
                    return Ok(());
                }
                accepted = listener.accept() => match accepted {
                    Ok(a) => a,
                    Err(e) => {
                        error!(error = %e, "accept failed");
                        continue;
                    }
                },
            };
            if let Err(e) = stream.set_nodelay(true) {
                debug!(%peer, error = %e, "set_nodelay failed");
            }

            let manager = self.clone();
            tokio::spawn(async move {
                match manager.receive_file(Box::new(stream), Some(peer)).await {
                    Ok(rec) => info!(transfer = %rec.id, file = %rec.local_path.display(), "transfer received"),
                    Err(e) => warn!(%peer, kind = e.kind(), error = %e, "incoming transfer failed"),
                }
            });
        }
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    /// Inserts a handle for `record`, replacing any handle with the same id.
    fn register(&self, record: TransferRecord) -> Arc<TransferHandle> {
        let handle = self.new_handle(record);
        let mut active = self.active.write().unwrap_or_else(PoisonError::into_inner);
        self.check_capacity(&active, &handle);
        active.insert(handle.id(), handle.clone());
        handle
    }

    /// Inserts a handle for `record` unless its id is already active.
    ///
    /// The check and the insert happen under one write lock.
    fn try_register(&self, record: TransferRecord) -> Result<Arc<TransferHandle>, TransferError> {
        let handle = self.new_handle(record);
        let id = handle.id();
        let mut active = self.active.write().unwrap_or_else(PoisonError::into_inner);
        if active.contains_key(&id) {
            return Err(TransferError::InvalidState(format!("transfer {id} is already active")));
        }
        self.check_capacity(&active, &handle);
        active.insert(id, handle.clone());
        Ok(handle)
    }

    fn new_handle(&self, record: TransferRecord) -> Arc<TransferHandle> {
        let handle = Arc::new(
            TransferHandle::new(record)
                .with_events(self.events_tx.clone())
                .with_store(self.store.clone()),
        );
        handle.set_attached(true);
        handle
    }

    /// Advisory only: logs when a new transfer exceeds the configured limit.
    fn check_capacity(&self, active: &HashMap<String, Arc<TransferHandle>>, handle: &TransferHandle) {
        let running = active.values().filter(|h| !h.status().is_terminal()).count();
        if running >= self.config.max_concurrent_transfers {
            warn!(
                transfer = %handle.id(),
                running,
                max = self.config.max_concurrent_transfers,
                "concurrent transfer limit exceeded"
            );
        }
    }

    /// Settles the record from the engine result and retires it.
    fn finish(&self, handle: &TransferHandle, result: Result<(), TransferError>) -> Result<TransferRecord, TransferError> {
        let id = handle.id();
        handle.set_attached(false);
        if !self.is_current(&id, handle) {
            debug!(transfer = %id, "superseded engine exited");
            return result.map(|()| handle.snapshot());
        }
        let result = match result {
            Ok(()) => match handle.complete() {
                Ok(()) => {
                    self.discard_resume_record(&id);
                    info!(transfer = %id, bytes = handle.snapshot().file_size, "transfer finished");
                    Ok(())
                }
                Err(_) if handle.status() == TransferStatus::Cancelled => {
                    // Cancelled after the last byte but before settling.
                    self.discard_resume_record(&id);
                    info!(transfer = %id, "transfer cancelled before completion");
                    Err(TransferError::TransferCancelled)
                }
                Err(e) => {
                    warn!(transfer = %id, error = %e, "could not mark transfer completed");
                    Err(e)
                }
            },
            Err(TransferError::TransferCancelled) => {
                let _ = handle.cancel();
                self.discard_resume_record(&id);
                info!(transfer = %id, "transfer cancelled");
                Err(TransferError::TransferCancelled)
            }
            Err(e) => {
                let rec = handle.snapshot();
                if matches!(e, TransferError::ConnectionClosed)
                    && rec.direction == Direction::Incoming
                    && !rec.external
                {
                    handle.keep_resume_point();
                    info!(
                        transfer = %id,
                        offset = rec.transferred_bytes,
                        "sender went away, keeping resume point"
                    );
                }
                let _ = handle.fail(e.to_string());
                warn!(transfer = %id, kind = e.kind(), error = %e, "transfer failed");
                Err(e)
            }
        };

        let record = self.retire(&id).unwrap_or_else(|| handle.snapshot());
        result.map(|()| record)
    }

    /// Moves a terminal transfer from the active map into history.
    fn retire(&self, id: &str) -> Option<TransferRecord> {
        let handle = self
            .active
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)?;
        let record = handle.snapshot();

        let mut history = self.history.write().unwrap_or_else(PoisonError::into_inner);
        history.push_front(record.clone());
        history.truncate(MAX_HISTORY);
        Some(record)
    }

    fn is_current(&self, id: &str, handle: &TransferHandle) -> bool {
        self.handle(id)
            .is_some_and(|current| std::ptr::eq(Arc::as_ptr(&current), handle))
    }

    fn discard_resume_record(&self, id: &str) {
        if let Err(e) = self.store.delete(id) {
            warn!(transfer = %id, error = %e, "failed to delete resume record");
        }
    }

    fn handle(&self, id: &str) -> Option<Arc<TransferHandle>> {
        self.read_active().get(id).cloned()
    }

    fn engine_handle(&self, id: &str) -> Result<Arc<TransferHandle>, TransferError> {
        let handle = self
            .handle(id)
            .ok_or_else(|| TransferError::UnknownTransfer(id.to_string()))?;
        if handle.snapshot().external {
            return Err(TransferError::InvalidState(format!("transfer {id} is external")));
        }
        Ok(handle)
    }

    fn external_handle(&self, id: &str) -> Result<Arc<TransferHandle>, TransferError> {
        let handle = self
            .handle(id)
            .ok_or_else(|| TransferError::UnknownTransfer(id.to_string()))?;
        if !handle.snapshot().external {
            return Err(TransferError::InvalidState(format!("transfer {id} is not external")));
        }
        Ok(handle)
    }

    fn read_active(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Arc<TransferHandle>>> {
        self.active.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn read_history(&self) -> std::sync::RwLockReadGuard<'_, VecDeque<TransferRecord>> {
        self.history.read().unwrap_or_else(PoisonError::into_inner)
    }
}

async fn sync_partial(dest: &mut tokio::fs::File) -> std::io::Result<()> {
    dest.flush().await?;
    dest.sync_data().await
}

/// First free `name`, `name (1)`, `name (2)`, ... inside `dir`.
async fn unique_destination(dir: &Path, file_name: &str) -> Result<PathBuf, TransferError> {
    let candidate = dir.join(file_name);
    if !tokio::fs::try_exists(&candidate).await? {
        return Ok(candidate);
    }

    let path = Path::new(file_name);
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or(file_name);
    let ext = path.extension().and_then(|e| e.to_str());
    for n in 1..10_000 {
        let name = match ext {
            Some(ext) => format!("{stem} ({n}).{ext}"),
            None => format!("{stem} ({n})"),
        };
        let candidate = dir.join(name);
        if !tokio::fs::try_exists(&candidate).await? {
            return Ok(candidate);
        }
    }
    Err(TransferError::InvalidPath(format!(
        "no free destination name for {file_name}"
    )))
}
