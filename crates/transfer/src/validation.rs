use std::path::{Component, Path};

use skyhop_protocol::resume::TRANSFER_ID_LEN;

use crate::TransferError;

/// Validates a file name announced by a peer.
///
/// The name must be a single normal path component so it cannot leave the
/// download directory. Rejects:
/// - Empty names
/// - Absolute paths (Unix `/` or Windows `C:\`)
/// - Parent or current directory references (`..`, `.`)
/// - Anything with a separator
pub fn validate_file_name(name: &str) -> Result<(), TransferError> {
    if name.is_empty() {
        return Err(TransferError::InvalidPath("empty file name".into()));
    }
    if name.contains(['/', '\\', '\0']) {
        return Err(TransferError::InvalidPath(format!(
            "file name must not contain separators: {name}"
        )));
    }

    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        (Some(Component::ParentDir), _) => Err(TransferError::InvalidPath(format!(
            "parent directory traversal not allowed: {name}"
        ))),
        _ => Err(TransferError::InvalidPath(format!(
            "not a plain file name: {name}"
        ))),
    }
}

/// Validates a transfer id: 1..=36 bytes of ASCII letters, digits, `-` or `_`.
pub fn validate_transfer_id(id: &str) -> Result<(), TransferError> {
    if id.is_empty() || id.len() > TRANSFER_ID_LEN {
        return Err(TransferError::InvalidPath(format!(
            "transfer id must be 1..={TRANSFER_ID_LEN} bytes, got {}",
            id.len()
        )));
    }
    if !id
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
    {
        return Err(TransferError::InvalidPath(format!(
            "transfer id contains invalid characters: {id}"
        )));
    }
    Ok(())
}
