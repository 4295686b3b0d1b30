//! Frame and resume sub-protocol I/O over any async byte stream.

use std::io::ErrorKind;

use skyhop_protocol::constants::FRAME_HEADER_LEN;
use skyhop_protocol::resume::{RESUME_ACK, RESUME_REQUEST, RESUME_REQUEST_BODY_LEN};
use skyhop_protocol::{Frame, FrameHeader, ResumeRequest};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::TransferError;

/// First thing read on an accepted connection.
#[derive(Debug)]
pub enum Opening {
    /// A fresh transfer starting with its first frame.
    Frame(Frame),
    /// The peer wants to continue a known transfer.
    Resume(ResumeRequest),
}

/// Maps stream errors that mean "peer is gone" to [`TransferError::ConnectionClosed`].
pub(crate) fn io_error(e: std::io::Error) -> TransferError {
    match e.kind() {
        ErrorKind::UnexpectedEof
        | ErrorKind::ConnectionReset
        | ErrorKind::ConnectionAborted
        | ErrorKind::BrokenPipe => TransferError::ConnectionClosed,
        _ => TransferError::Io(e),
    }
}

/// Writes one frame and flushes.
pub async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    frame: &Frame,
) -> Result<(), TransferError> {
    writer
        .write_all(&frame.header().encode())
        .await
        .map_err(io_error)?;
    if !frame.payload.is_empty() {
        writer.write_all(&frame.payload).await.map_err(io_error)?;
    }
    writer.flush().await.map_err(io_error)?;
    Ok(())
}

/// Reads one frame.
///
/// The header is validated before any payload byte is read.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Frame, TransferError> {
    let mut header = [0u8; FRAME_HEADER_LEN];
    reader.read_exact(&mut header).await.map_err(io_error)?;
    read_frame_body(reader, &header).await
}

async fn read_frame_body<R: AsyncRead + Unpin>(
    reader: &mut R,
    header: &[u8; FRAME_HEADER_LEN],
) -> Result<Frame, TransferError> {
    let header = FrameHeader::decode(header)?;
    let mut payload = vec![0u8; header.length as usize];
    reader.read_exact(&mut payload).await.map_err(io_error)?;
    Ok(Frame::new(header.kind, payload)?)
}

/// Reads the first message of an accepted connection.
pub async fn read_opening<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Opening, TransferError> {
    let first = reader.read_u8().await.map_err(io_error)?;
    match first {
        RESUME_REQUEST => {
            let mut body = [0u8; RESUME_REQUEST_BODY_LEN];
            reader.read_exact(&mut body).await.map_err(io_error)?;
            Ok(Opening::Resume(ResumeRequest::decode_body(&body)?))
        }
        0x00 => {
            let mut header = [0u8; FRAME_HEADER_LEN];
            reader.read_exact(&mut header[1..]).await.map_err(io_error)?;
            Ok(Opening::Frame(read_frame_body(reader, &header).await?))
        }
        other => Err(TransferError::InvalidHeader(format!(
            "unexpected opening byte {other:#04x}"
        ))),
    }
}

/// Sends a resume request and flushes.
pub async fn write_resume_request<W: AsyncWrite + Unpin>(
    writer: &mut W,
    request: &ResumeRequest,
) -> Result<(), TransferError> {
    writer.write_all(&request.encode()?).await.map_err(io_error)?;
    writer.flush().await.map_err(io_error)?;
    Ok(())
}

/// Sends the one-byte resume acknowledgement.
pub async fn write_resume_ack<W: AsyncWrite + Unpin>(writer: &mut W) -> Result<(), TransferError> {
    writer.write_u8(RESUME_ACK).await.map_err(io_error)?;
    writer.flush().await.map_err(io_error)?;
    Ok(())
}

/// Reads the resume acknowledgement.
pub async fn read_resume_ack<R: AsyncRead + Unpin>(reader: &mut R) -> Result<(), TransferError> {
    match reader.read_u8().await.map_err(io_error)? {
        RESUME_ACK => Ok(()),
        other => Err(TransferError::InvalidHeader(format!(
            "expected resume ack, got {other:#04x}"
        ))),
    }
}
