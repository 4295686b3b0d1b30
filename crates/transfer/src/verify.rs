use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::TransferError;

/// Read size used while hashing.
pub const HASH_BUFFER_SIZE: usize = 1024 * 1024;

/// Computes SHA-256 of `data` and returns the lower-case hex digest.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Computes SHA-256 of an entire file with sequential 1 MiB reads.
pub fn file_sha256(path: &Path) -> Result<String, TransferError> {
    let mut file = std::fs::File::open(path).map_err(|e| match e.kind() {
        ErrorKind::NotFound => TransferError::FileNotFound(path.to_path_buf()),
        _ => TransferError::Io(e),
    })?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; HASH_BUFFER_SIZE];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// [`file_sha256`] on the blocking pool.
pub async fn hash_file(path: PathBuf) -> Result<String, TransferError> {
    tokio::task::spawn_blocking(move || file_sha256(&path))
        .await
        .map_err(|e| TransferError::Io(std::io::Error::other(e)))?
}

/// Case-insensitive digest comparison.
pub fn hashes_match(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}
