//! Frame codec: 8-byte header + payload.
//!
//! ```text
//! [4 bytes BE: message type][4 bytes BE: payload length][payload]
//! ```
//!
//! Payloads of `metadata`, `chunk` and `receipt` frames are JSON; `complete`
//! carries no payload.

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::constants::{FRAME_HEADER_LEN, MAX_MESSAGE_BYTES, MessageKind};
use crate::error::ProtocolError;
use crate::messages::{FileChunk, FileMetadata, TransferReceipt};

/// Decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub kind: MessageKind,
    pub length: u32,
}

impl FrameHeader {
    /// Encodes the header into its 8-byte wire form.
    pub fn encode(&self) -> [u8; FRAME_HEADER_LEN] {
        let mut buf = [0u8; FRAME_HEADER_LEN];
        buf[..4].copy_from_slice(&self.kind.code().to_be_bytes());
        buf[4..].copy_from_slice(&self.length.to_be_bytes());
        buf
    }

    /// Decodes and validates a header.
    ///
    /// Rejects unknown type codes and lengths above [`MAX_MESSAGE_BYTES`].
    pub fn decode(buf: &[u8; FRAME_HEADER_LEN]) -> Result<Self, ProtocolError> {
        let code = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
        let length = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]);

        let kind = MessageKind::from_code(code)
            .ok_or_else(|| ProtocolError::InvalidHeader(format!("unknown message type {code}")))?;

        if length > MAX_MESSAGE_BYTES {
            return Err(ProtocolError::PayloadTooLarge {
                declared: length as u64,
                max: MAX_MESSAGE_BYTES,
            });
        }

        Ok(Self { kind, length })
    }
}

/// One header + payload unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub kind: MessageKind,
    pub payload: Vec<u8>,
}

impl Frame {
    /// Builds a frame, checking the payload against [`MAX_MESSAGE_BYTES`].
    pub fn new(kind: MessageKind, payload: Vec<u8>) -> Result<Self, ProtocolError> {
        if payload.len() as u64 > MAX_MESSAGE_BYTES as u64 {
            return Err(ProtocolError::PayloadTooLarge {
                declared: payload.len() as u64,
                max: MAX_MESSAGE_BYTES,
            });
        }
        Ok(Self { kind, payload })
    }

    fn json<T: Serialize>(kind: MessageKind, value: &T) -> Result<Self, ProtocolError> {
        Self::new(kind, serde_json::to_vec(value)?)
    }

    pub fn metadata(meta: &FileMetadata) -> Result<Self, ProtocolError> {
        Self::json(MessageKind::Metadata, meta)
    }

    pub fn chunk(chunk: &FileChunk) -> Result<Self, ProtocolError> {
        Self::json(MessageKind::Chunk, chunk)
    }

    pub fn complete() -> Self {
        Self {
            kind: MessageKind::Complete,
            payload: Vec::new(),
        }
    }

    pub fn receipt(receipt: &TransferReceipt) -> Result<Self, ProtocolError> {
        Self::json(MessageKind::Receipt, receipt)
    }

    /// Header describing this frame.
    pub fn header(&self) -> FrameHeader {
        FrameHeader {
            kind: self.kind,
            length: self.payload.len() as u32,
        }
    }

    /// Encodes header and payload into one buffer.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(FRAME_HEADER_LEN + self.payload.len());
        buf.extend_from_slice(&self.header().encode());
        buf.extend_from_slice(&self.payload);
        buf
    }

    /// Decodes a complete frame from `data`.
    ///
    /// `data` must hold exactly one frame; trailing or missing bytes are an
    /// invalid header.
    pub fn decode(data: &[u8]) -> Result<Self, ProtocolError> {
        let header_bytes: &[u8; FRAME_HEADER_LEN] = data
            .get(..FRAME_HEADER_LEN)
            .and_then(|h| h.try_into().ok())
            .ok_or_else(|| {
                ProtocolError::InvalidHeader(format!(
                    "frame too short: {} bytes (need {FRAME_HEADER_LEN})",
                    data.len()
                ))
            })?;
        let header = FrameHeader::decode(header_bytes)?;

        let body = &data[FRAME_HEADER_LEN..];
        if body.len() != header.length as usize {
            return Err(ProtocolError::InvalidHeader(format!(
                "declared {} payload bytes, got {}",
                header.length,
                body.len()
            )));
        }

        Ok(Self {
            kind: header.kind,
            payload: body.to_vec(),
        })
    }

    /// Parses the JSON payload, requiring the frame to be of `expected` kind.
    pub fn parse<T: DeserializeOwned>(&self, expected: MessageKind) -> Result<T, ProtocolError> {
        if self.kind != expected {
            return Err(ProtocolError::InvalidHeader(format!(
                "expected {expected} frame, got {}",
                self.kind
            )));
        }
        Ok(serde_json::from_slice(&self.payload)?)
    }
}
