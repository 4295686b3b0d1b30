//! Per-chunk zlib, decided once per transfer in the metadata frame.

use std::io::{Read, Write};

use flate2::Compression as Level;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use skyhop_protocol::Compression;

use crate::TransferError;

/// Encodes one chunk for the wire.
pub fn encode_chunk(mode: Compression, data: &[u8]) -> Result<Vec<u8>, TransferError> {
    match mode {
        Compression::None => Ok(data.to_vec()),
        Compression::Zlib => {
            let mut encoder = ZlibEncoder::new(Vec::with_capacity(data.len() / 2), Level::fast());
            encoder.write_all(data)?;
            Ok(encoder.finish()?)
        }
    }
}

/// Decodes one chunk, refusing to inflate past `expected_len` bytes.
pub fn decode_chunk(
    mode: Compression,
    data: Vec<u8>,
    expected_len: usize,
) -> Result<Vec<u8>, TransferError> {
    let decoded = match mode {
        Compression::None => data,
        Compression::Zlib => {
            let mut out = Vec::with_capacity(expected_len);
            ZlibDecoder::new(data.as_slice())
                .take(expected_len as u64 + 1)
                .read_to_end(&mut out)
                .map_err(|e| TransferError::InvalidHeader(format!("corrupt zlib chunk: {e}")))?;
            out
        }
    };

    if decoded.len() != expected_len {
        return Err(TransferError::InvalidHeader(format!(
            "chunk declared {expected_len} bytes, decoded {}",
            decoded.len()
        )));
    }
    Ok(decoded)
}
