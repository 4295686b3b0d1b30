//! Receipt handshake that gates completion on the sending side.

use std::time::Duration;

use skyhop_protocol::{Frame, MessageKind, TransferReceipt};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, warn};

use crate::TransferError;
use crate::control::TransferControl;
use crate::verify::hashes_match;
use crate::wire::{read_frame, write_frame};

/// Decides whether a receipt confirms the transfer.
pub fn evaluate_receipt(
    receipt: &TransferReceipt,
    transfer_id: &str,
    file_size: u64,
    local_hash: &str,
) -> Result<(), TransferError> {
    if receipt.transfer_id != transfer_id {
        return Err(TransferError::ReceiverNotConfirmed(format!(
            "receipt for {} while sending {transfer_id}",
            receipt.transfer_id
        )));
    }

    let hash_differs = receipt
        .file_hash
        .as_deref()
        .is_some_and(|remote| !hashes_match(remote, local_hash));

    if !receipt.success {
        if let (true, Some(remote)) = (hash_differs, receipt.file_hash.as_deref()) {
            return Err(TransferError::IntegrityCheckFailed {
                expected: local_hash.to_string(),
                actual: remote.to_string(),
            });
        }
        return Err(TransferError::ReceiverRejected(
            receipt
                .error
                .clone()
                .unwrap_or_else(|| "no reason given".into()),
        ));
    }

    if receipt.received_bytes < 0 || receipt.received_bytes as u64 != file_size {
        return Err(TransferError::ReceiverNotConfirmed(format!(
            "receiver reported {} of {file_size} bytes",
            receipt.received_bytes
        )));
    }

    if let (true, Some(remote)) = (hash_differs, receipt.file_hash.as_deref()) {
        return Err(TransferError::IntegrityCheckFailed {
            expected: local_hash.to_string(),
            actual: remote.to_string(),
        });
    }

    Ok(())
}

/// Waits for exactly one receipt frame.
///
/// Resolves once, on whichever comes first: the frame, the timeout or
/// cancellation.
pub async fn await_receipt<R: AsyncRead + Unpin>(
    reader: &mut R,
    timeout: Duration,
    control: &TransferControl,
) -> Result<TransferReceipt, TransferError> {
    let frame = tokio::select! {
        biased;
        _ = control.cancelled() => return Err(TransferError::TransferCancelled),
        result = tokio::time::timeout(timeout, read_frame(reader)) => match result {
            Err(_) => return Err(TransferError::Timeout("receipt")),
            Ok(Err(TransferError::ConnectionClosed)) => {
                return Err(TransferError::ReceiverNotConfirmed(
                    "connection closed before receipt".into(),
                ));
            }
            Ok(other) => other?,
        },
    };

    if frame.kind != MessageKind::Receipt {
        return Err(TransferError::InvalidHeader(format!(
            "expected receipt frame, got {}",
            frame.kind
        )));
    }
    let receipt: TransferReceipt = frame.parse(MessageKind::Receipt)?;
    debug!(transfer = %receipt.transfer_id, success = receipt.success, "receipt received");
    Ok(receipt)
}

/// Sends a receipt frame.
pub async fn send_receipt<W: AsyncWrite + Unpin>(
    writer: &mut W,
    receipt: &TransferReceipt,
) -> Result<(), TransferError> {
    write_frame(writer, &Frame::receipt(receipt)?).await
}

/// Best-effort failure receipt from the receiving side.
///
/// For integrity failures the locally computed hash is reported so the
/// sender can classify the failure.
pub async fn send_failure_receipt<W: AsyncWrite + Unpin>(
    writer: &mut W,
    transfer_id: &str,
    received_bytes: u64,
    error: &TransferError,
) {
    let actual_hash = match error {
        TransferError::IntegrityCheckFailed { actual, .. } => Some(actual.clone()),
        _ => None,
    };
    let receipt =
        TransferReceipt::rejected(transfer_id, received_bytes as i64, actual_hash, error.to_string());
    if let Err(e) = send_receipt(writer, &receipt).await {
        warn!(transfer = %transfer_id, error = %e, "could not deliver failure receipt");
    }
}
