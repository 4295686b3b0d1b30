//! Durable resume points, one JSON file per paused transfer.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use skyhop_protocol::Compression;
use tracing::{debug, error, warn};

use crate::TransferError;
use crate::connection::Endpoint;
use crate::record::{Direction, TransferRecord, TransferStatus};
use crate::validation::validate_transfer_id;

/// Everything needed to continue a transfer after a restart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumeRecord {
    pub transfer_id: String,
    pub file_name: String,
    pub file_size: u64,
    pub transferred_bytes: u64,
    pub resume_offset: u64,
    pub device_id: String,
    pub device_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_port: Option<u16>,
    pub direction: Direction,
    pub local_path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_hash: Option<String>,
    #[serde(default)]
    pub compression: Compression,
    pub timestamp: DateTime<Utc>,
}

impl ResumeRecord {
    pub fn from_record(rec: &TransferRecord) -> Self {
        Self {
            transfer_id: rec.id.clone(),
            file_name: rec.file_name.clone(),
            file_size: rec.file_size,
            transferred_bytes: rec.transferred_bytes,
            resume_offset: rec.resume_offset,
            device_id: rec.device_id.clone(),
            device_name: rec.device_name.clone(),
            remote_address: rec.remote.as_ref().map(|e| e.address.clone()),
            remote_port: rec.remote.as_ref().map(|e| e.port),
            direction: rec.direction,
            local_path: rec.local_path.clone(),
            file_hash: rec.file_hash.clone(),
            compression: rec.compression,
            timestamp: Utc::now(),
        }
    }

    /// Peer to reconnect to, if one was recorded.
    pub fn endpoint(&self) -> Option<Endpoint> {
        match (&self.remote_address, self.remote_port) {
            (Some(address), Some(port)) => Some(Endpoint::new(address.clone(), port)),
            _ => None,
        }
    }

    /// Rebuilds a paused transfer record.
    pub fn to_record(&self) -> TransferRecord {
        let mut rec = TransferRecord::new(
            self.transfer_id.clone(),
            self.file_name.clone(),
            self.file_size,
            self.direction,
            self.local_path.clone(),
        );
        rec.device_id = self.device_id.clone();
        rec.device_name = self.device_name.clone();
        rec.status = TransferStatus::Paused;
        rec.transferred_bytes = self.resume_offset.min(self.file_size);
        rec.resume_offset = rec.transferred_bytes;
        rec.file_hash = self.file_hash.clone();
        rec.compression = self.compression;
        rec.remote = self.endpoint();
        rec
    }
}

/// Directory of `<transfer id>.json` resume files.
#[derive(Debug, Clone)]
pub struct ResumeStore {
    dir: PathBuf,
}

impl ResumeStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Store rooted at the platform cache directory.
    pub fn open_default() -> Result<Self, TransferError> {
        default_dir()
            .map(Self::new)
            .ok_or_else(|| TransferError::InvalidPath("no cache directory for resume records".into()))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, transfer_id: &str) -> Result<PathBuf, TransferError> {
        validate_transfer_id(transfer_id)?;
        Ok(self.dir.join(format!("{transfer_id}.json")))
    }

    /// Writes the record via a temp file and rename.
    pub fn save(&self, record: &ResumeRecord) -> Result<(), TransferError> {
        let path = self.path_for(&record.transfer_id)?;
        std::fs::create_dir_all(&self.dir)?;

        let content = serde_json::to_vec_pretty(record)?;
        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, content).inspect_err(|e| {
            error!(path = %tmp_path.display(), error = %e, "failed to write resume record");
        })?;
        std::fs::rename(&tmp_path, &path).inspect_err(|e| {
            error!(path = %path.display(), error = %e, "failed to move resume record into place");
            let _ = std::fs::remove_file(&tmp_path);
        })?;

        debug!(transfer = %record.transfer_id, offset = record.resume_offset, "resume record saved");
        Ok(())
    }

    /// Loads the record for `transfer_id`, `None` if there is none.
    pub fn load(&self, transfer_id: &str) -> Result<Option<ResumeRecord>, TransferError> {
        let path = self.path_for(transfer_id)?;
        let content = match std::fs::read(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_slice(&content)?))
    }

    /// Removes the record. Missing records are not an error.
    pub fn delete(&self, transfer_id: &str) -> Result<(), TransferError> {
        let path = self.path_for(transfer_id)?;
        match std::fs::remove_file(&path) {
            Ok(()) => {
                debug!(transfer = %transfer_id, "resume record deleted");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// All readable records. Corrupt files are skipped with a warning.
    pub fn list(&self) -> Result<Vec<ResumeRecord>, TransferError> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut records = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match std::fs::read(&path)
                .map_err(TransferError::from)
                .and_then(|c| serde_json::from_slice::<ResumeRecord>(&c).map_err(Into::into))
            {
                Ok(rec) => records.push(rec),
                Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable resume record"),
            }
        }
        records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(records)
    }
}

/// Platform cache directory for resume records.
pub fn default_dir() -> Option<PathBuf> {
    cache_dir().map(|d| d.join("skyhop").join("resume"))
}

fn cache_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var("LOCALAPPDATA").ok().map(PathBuf::from)
    }

    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("XDG_CACHE_HOME")
            .ok()
            .filter(|d| !d.is_empty())
            .map(PathBuf::from)
            .or_else(|| {
                std::env::var("HOME")
                    .ok()
                    .map(|h| PathBuf::from(h).join(".cache"))
            })
    }
}
