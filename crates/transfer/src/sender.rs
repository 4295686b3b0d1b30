use skyhop_protocol::{Compression, FileChunk, Frame};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWrite};
use tracing::debug;

use crate::TransferError;
use crate::compression::encode_chunk;
use crate::record::TransferHandle;
use crate::wire::write_frame;

/// How a file is cut into chunk frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPlan {
    pub chunk_size: usize,
    pub compression: Compression,
}

/// Streams chunk frames from `start_offset` to the end of the file, then a
/// Complete frame.
///
/// Control is checked before each chunk. Returns the number of bytes sent.
pub async fn send_chunks<W: AsyncWrite + Unpin>(
    source: &mut File,
    writer: &mut W,
    handle: &TransferHandle,
    plan: ChunkPlan,
    start_offset: u64,
) -> Result<u64, TransferError> {
    let rec = handle.snapshot();
    let file_size = rec.file_size;
    let chunk_size = plan.chunk_size as u64;
    if chunk_size == 0 {
        return Err(TransferError::InvalidState("chunk size must be > 0".into()));
    }
    if start_offset > file_size {
        return Err(TransferError::InvalidState(format!(
            "start offset {start_offset} beyond file size {file_size}"
        )));
    }

    source.seek(std::io::SeekFrom::Start(start_offset)).await?;

    let mut buf = vec![0u8; plan.chunk_size];
    let mut offset = start_offset;
    while offset < file_size {
        handle.checkpoint().await?;

        let len = chunk_size.min(file_size - offset) as usize;
        source.read_exact(&mut buf[..len]).await?;
        let data = encode_chunk(plan.compression, &buf[..len])?;

        let chunk = FileChunk {
            index: (offset / chunk_size) as i64,
            data,
            size: len as i64,
        };
        write_frame(writer, &Frame::chunk(&chunk)?).await?;

        offset += len as u64;
        handle.advance_to(offset);
    }

    write_frame(writer, &Frame::complete()).await?;
    debug!(transfer = %rec.id, sent = offset - start_offset, "all chunks sent");
    Ok(offset - start_offset)
}
