use std::path::Path;

use skyhop_protocol::constants::MAX_CHUNK_BYTES;
use skyhop_protocol::{Compression, FileChunk, MessageKind};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncRead, AsyncSeekExt, AsyncWriteExt};
use tracing::debug;

use crate::TransferError;
use crate::compression::decode_chunk;
use crate::control::ControlState;
use crate::record::TransferHandle;
use crate::wire::read_frame;

/// Opens (or creates) the destination without truncating it.
pub async fn open_destination(path: &Path) -> Result<File, TransferError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .await?;
    Ok(file)
}

/// Writes chunk frames into `dest` from `start_offset` until the file is
/// full, then requires a Complete frame.
///
/// The file is cut to its declared size and synced before returning.
pub async fn receive_chunks<R: AsyncRead + Unpin>(
    reader: &mut R,
    dest: &mut File,
    handle: &TransferHandle,
    compression: Compression,
    start_offset: u64,
) -> Result<u64, TransferError> {
    let rec = handle.snapshot();
    let file_size = rec.file_size;
    let mut received = start_offset.min(file_size);

    while received < file_size {
        if handle.control().state() == ControlState::Paused {
            // The pause saves `received` as the resume point.
            dest.flush().await?;
            dest.sync_data().await?;
        }
        handle.checkpoint().await?;

        let frame = read_frame(reader).await?;
        let chunk: FileChunk = frame.parse(MessageKind::Chunk)?;

        let remaining = file_size - received;
        if chunk.size <= 0 || chunk.size as u64 > MAX_CHUNK_BYTES as u64 || chunk.size as u64 > remaining {
            return Err(TransferError::InvalidHeader(format!(
                "chunk {} has invalid size {} ({remaining} bytes remaining)",
                chunk.index, chunk.size
            )));
        }

        let data = decode_chunk(compression, chunk.data, chunk.size as usize)?;
        dest.seek(std::io::SeekFrom::Start(received)).await?;
        dest.write_all(&data).await?;

        received += data.len() as u64;
        handle.advance_to(received);
    }

    let trailer = read_frame(reader).await?;
    if trailer.kind != MessageKind::Complete {
        return Err(TransferError::InvalidHeader(format!(
            "expected complete frame, got {}",
            trailer.kind
        )));
    }

    dest.set_len(file_size).await?;
    dest.flush().await?;
    dest.sync_all().await?;

    debug!(transfer = %rec.id, received = received - start_offset, "all chunks written");
    Ok(received - start_offset)
}
