//! Transfer engine settings.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use skyhop_protocol::Compression;
use skyhop_protocol::constants::{
    DEFAULT_CHUNK_SIZE, RECEIPT_TIMEOUT, RESUME_ACK_TIMEOUT, clamp_chunk_size,
};

/// Tunables shared by every transfer a manager runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferConfig {
    /// Requested chunk size in bytes, clamped to
    /// [`MIN_CHUNK_SIZE`](skyhop_protocol::constants::MIN_CHUNK_SIZE)..=[`MAX_CHUNK_SIZE`](skyhop_protocol::constants::MAX_CHUNK_SIZE).
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Offer zlib chunk compression on outgoing transfers.
    #[serde(default)]
    pub compression_enabled: bool,

    /// Recorded only; the engine itself never encrypts.
    #[serde(default)]
    pub encryption_enabled: bool,

    /// Advisory: exceeding it is logged, not refused.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_transfers: usize,

    #[serde(default = "default_receipt_timeout")]
    pub receipt_timeout_secs: u64,

    #[serde(default = "default_resume_ack_timeout")]
    pub resume_ack_timeout_secs: u64,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Where incoming files are written.
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,

    /// Resume record directory. Platform cache dir when unset.
    #[serde(default)]
    pub resume_dir: Option<PathBuf>,
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_max_concurrent() -> usize {
    3
}

fn default_receipt_timeout() -> u64 {
    RECEIPT_TIMEOUT.as_secs()
}

fn default_resume_ack_timeout() -> u64 {
    RESUME_ACK_TIMEOUT.as_secs()
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_download_dir() -> PathBuf {
    std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .map(|h| PathBuf::from(h).join("Downloads"))
        .unwrap_or_else(|_| PathBuf::from("downloads"))
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            compression_enabled: false,
            encryption_enabled: false,
            max_concurrent_transfers: default_max_concurrent(),
            receipt_timeout_secs: default_receipt_timeout(),
            resume_ack_timeout_secs: default_resume_ack_timeout(),
            connect_timeout_secs: default_connect_timeout(),
            download_dir: default_download_dir(),
            resume_dir: None,
        }
    }
}

impl TransferConfig {
    /// Chunk size after clamping.
    pub fn effective_chunk_size(&self) -> usize {
        clamp_chunk_size(self.chunk_size)
    }

    /// Compression offered to receivers of outgoing transfers.
    pub fn compression(&self) -> Compression {
        if self.compression_enabled {
            Compression::Zlib
        } else {
            Compression::None
        }
    }

    pub fn receipt_timeout(&self) -> Duration {
        Duration::from_secs(self.receipt_timeout_secs)
    }

    pub fn resume_ack_timeout(&self) -> Duration {
        Duration::from_secs(self.resume_ack_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}
