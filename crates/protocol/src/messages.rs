use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Compression
// ---------------------------------------------------------------------------

/// Per-transfer chunk compression, negotiated once through [`FileMetadata`].
///
/// On the wire this is the optional `compression` field: absent means
/// [`Compression::None`], `"zlib"` means [`Compression::Zlib`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Compression {
    #[default]
    #[serde(rename = "none")]
    None,
    #[serde(rename = "zlib")]
    Zlib,
}

impl Compression {
    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }
}

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

/// Announces a transfer. First frame on a fresh connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMetadata {
    pub transfer_id: String,
    pub file_name: String,
    pub file_size: i64,
    pub file_hash: String,
    pub chunk_size: i64,
    #[serde(default, skip_serializing_if = "Compression::is_none")]
    pub compression: Compression,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_platform: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_os_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_chip: Option<String>,
}

/// One slice of file data.
///
/// `data` may be compressed; `size` is always the uncompressed byte count.
/// The `data` field is base64-encoded in JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileChunk {
    pub index: i64,
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
    pub size: i64,
}

/// The receiver's attestation that the file was written and verified.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferReceipt {
    pub transfer_id: String,
    pub success: bool,
    pub received_bytes: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TransferReceipt {
    /// A receipt confirming every byte was written and verified.
    pub fn accepted(transfer_id: impl Into<String>, received_bytes: i64, file_hash: String) -> Self {
        Self {
            transfer_id: transfer_id.into(),
            success: true,
            received_bytes,
            file_hash: Some(file_hash),
            error: None,
        }
    }

    /// A receipt reporting failure on the receiver side.
    pub fn rejected(
        transfer_id: impl Into<String>,
        received_bytes: i64,
        file_hash: Option<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            transfer_id: transfer_id.into(),
            success: false,
            received_bytes,
            file_hash,
            error: Some(error.into()),
        }
    }
}

/// Base64 serde module for raw byte fields.
mod base64_bytes {
    use base64::{Engine, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        STANDARD.encode(data).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(&s).map_err(serde::de::Error::custom)
    }
}
