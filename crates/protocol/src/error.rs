/// Errors produced while encoding or decoding wire messages.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("invalid header: {0}")]
    InvalidHeader(String),

    #[error("frame payload is {declared} bytes (max {max})")]
    PayloadTooLarge { declared: u64, max: u32 },

    #[error("invalid payload: {0}")]
    InvalidPayload(#[from] serde_json::Error),

    #[error("transfer id must be at most {max} bytes, got {len}")]
    TransferIdTooLong { len: usize, max: usize },
}
