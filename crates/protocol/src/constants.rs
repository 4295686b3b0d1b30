use std::time::Duration;

/// Size of a frame header: 4-byte message type + 4-byte payload length.
pub const FRAME_HEADER_LEN: usize = 8;

/// Largest payload a single frame may declare (any message type).
pub const MAX_MESSAGE_BYTES: u32 = 2_000_000;

/// Largest uncompressed size a chunk may declare (512 KiB).
pub const MAX_CHUNK_BYTES: usize = 512 * 1024;

/// Smallest configurable chunk size (64 KiB).
pub const MIN_CHUNK_SIZE: usize = 64 * 1024;

/// Largest configurable chunk size. Same as [`MAX_CHUNK_BYTES`].
pub const MAX_CHUNK_SIZE: usize = MAX_CHUNK_BYTES;

/// Chunk size used when nothing else is configured.
pub const DEFAULT_CHUNK_SIZE: usize = 256 * 1024;

/// How long a sender waits for the receiver's receipt after `Complete`.
pub const RECEIPT_TIMEOUT: Duration = Duration::from_secs(15);

/// How long a resuming side waits for the resume acknowledgement.
pub const RESUME_ACK_TIMEOUT: Duration = Duration::from_secs(10);

/// Clamps a requested chunk size into `[MIN_CHUNK_SIZE, MAX_CHUNK_SIZE]`.
pub fn clamp_chunk_size(requested: usize) -> usize {
    requested.clamp(MIN_CHUNK_SIZE, MAX_CHUNK_SIZE)
}

/// Frame message type identifier (the first 4 header bytes, big-endian).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum MessageKind {
    Metadata = 1,
    Chunk = 2,
    Complete = 3,
    Receipt = 4,
}

impl MessageKind {
    /// Wire code for this message type.
    pub fn code(self) -> u32 {
        self as u32
    }

    /// Maps a wire code back to a message type.
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            1 => Some(Self::Metadata),
            2 => Some(Self::Chunk),
            3 => Some(Self::Complete),
            4 => Some(Self::Receipt),
            _ => None,
        }
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Metadata => "metadata",
            Self::Chunk => "chunk",
            Self::Complete => "complete",
            Self::Receipt => "receipt",
        };
        f.write_str(name)
    }
}
