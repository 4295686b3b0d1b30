//! Wire protocol for Skyhop file transfers.
//!
//! Pure encode/decode only: frame headers, JSON payloads and the resume
//! sub-protocol. Socket I/O lives in `skyhop-transfer`.

pub mod constants;
pub mod error;
pub mod frame;
pub mod messages;
pub mod resume;

pub use constants::MessageKind;
pub use error::ProtocolError;
pub use frame::{Frame, FrameHeader};
pub use messages::{Compression, FileChunk, FileMetadata, TransferReceipt};
pub use resume::ResumeRequest;
