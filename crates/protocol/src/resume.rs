//! Resume sub-protocol, sent before any frame on a resumed connection.
//!
//! ```text
//! REQUEST: [1 byte: 0x04][36 bytes: transfer id, UTF-8, zero-padded][8 bytes BE: i64 offset]
//! ACK:     [1 byte: 0x05]
//! ```
//!
//! A frame header always starts with `0x00` (message type codes are small
//! u32 values), so the first byte of a connection tells the two apart.

use crate::error::ProtocolError;

/// Opcode of a resume request.
pub const RESUME_REQUEST: u8 = 0x04;

/// Opcode of a resume acknowledgement.
pub const RESUME_ACK: u8 = 0x05;

/// Fixed width of the transfer id field.
pub const TRANSFER_ID_LEN: usize = 36;

/// Request body length, opcode excluded.
pub const RESUME_REQUEST_BODY_LEN: usize = TRANSFER_ID_LEN + 8;

/// Asks the peer to continue `transfer_id` from byte `offset`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumeRequest {
    pub transfer_id: String,
    pub offset: i64,
}

impl ResumeRequest {
    /// Encodes opcode + body.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        let id = self.transfer_id.as_bytes();
        if id.len() > TRANSFER_ID_LEN {
            return Err(ProtocolError::TransferIdTooLong {
                len: id.len(),
                max: TRANSFER_ID_LEN,
            });
        }

        let mut buf = Vec::with_capacity(1 + RESUME_REQUEST_BODY_LEN);
        buf.push(RESUME_REQUEST);
        buf.extend_from_slice(id);
        buf.resize(1 + TRANSFER_ID_LEN, 0);
        buf.extend_from_slice(&self.offset.to_be_bytes());
        Ok(buf)
    }

    /// Decodes the body that follows the [`RESUME_REQUEST`] opcode.
    pub fn decode_body(body: &[u8; RESUME_REQUEST_BODY_LEN]) -> Result<Self, ProtocolError> {
        let id_field = &body[..TRANSFER_ID_LEN];
        let id_len = id_field
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(TRANSFER_ID_LEN);
        let transfer_id = std::str::from_utf8(&id_field[..id_len])
            .map_err(|e| ProtocolError::InvalidHeader(format!("invalid transfer id: {e}")))?
            .to_string();
        if transfer_id.is_empty() {
            return Err(ProtocolError::InvalidHeader("empty transfer id".into()));
        }

        let mut offset_bytes = [0u8; 8];
        offset_bytes.copy_from_slice(&body[TRANSFER_ID_LEN..]);
        let offset = i64::from_be_bytes(offset_bytes);
        if offset < 0 {
            return Err(ProtocolError::InvalidHeader(format!(
                "negative resume offset {offset}"
            )));
        }

        Ok(Self {
            transfer_id,
            offset,
        })
    }
}
