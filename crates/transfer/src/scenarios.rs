//! End-to-end transfers between managers, fake peers and gated links.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::future::BoxFuture;
use skyhop_protocol::{Compression, FileChunk, FileMetadata, Frame, MessageKind, TransferReceipt};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::config::TransferConfig;
use crate::connection::{Connection, Connector, Endpoint, TcpConnector};
use crate::manager::{DeviceIdentity, TransferManager};
use crate::record::{Direction, TransferRecord, TransferStatus};
use crate::resume::{ResumeRecord, ResumeStore};
use crate::verify::{file_sha256, sha256_hex};
use crate::wire::{read_frame, write_frame};
use crate::TransferError;

const KIB: usize = 1024;
const MIB: usize = 1024 * 1024;

/// Hands out one pre-made in-memory connection.
struct DuplexConnector {
    conn: Mutex<Option<DuplexStream>>,
}

impl DuplexConnector {
    fn new(stream: DuplexStream) -> Arc<Self> {
        Arc::new(Self {
            conn: Mutex::new(Some(stream)),
        })
    }
}

impl Connector for DuplexConnector {
    fn connect<'a>(&'a self, _endpoint: &'a Endpoint) -> BoxFuture<'a, Result<Connection, TransferError>> {
        Box::pin(async move {
            let stream = self.conn.lock().unwrap().take().ok_or(TransferError::ConnectionClosed)?;
            Ok(Box::new(stream) as Connection)
        })
    }
}

/// Connects over TCP through a frame relay.
///
/// After forwarding `hold_after` frames the relay reads the next header and
/// then stops until released. The sender has passed that frame's pause check
/// by then, and the tiny link keeps it stuck mid-frame.
struct GatedTcpConnector {
    port: u16,
    hold_after: usize,
    holding: Arc<Notify>,
    release: Arc<Notify>,
}

impl Connector for GatedTcpConnector {
    fn connect<'a>(&'a self, _endpoint: &'a Endpoint) -> BoxFuture<'a, Result<Connection, TransferError>> {
        Box::pin(async move {
            let upstream = tokio::net::TcpStream::connect(("127.0.0.1", self.port)).await?;
            let (mut up_r, mut up_w) = upstream.into_split();
            let (local, relay) = tokio::io::duplex(64);
            let (mut relay_r, mut relay_w) = tokio::io::split(relay);

            let hold_after = self.hold_after;
            let holding = self.holding.clone();
            let release = self.release.clone();
            tokio::spawn(async move {
                let mut forwarded = 0;
                let mut header = [0u8; 8];
                while relay_r.read_exact(&mut header).await.is_ok() {
                    if forwarded == hold_after {
                        holding.notify_one();
                        release.notified().await;
                    }
                    let len = u32::from_be_bytes([header[4], header[5], header[6], header[7]]) as usize;
                    let mut payload = vec![0u8; len];
                    if relay_r.read_exact(&mut payload).await.is_err() {
                        break;
                    }
                    if up_w.write_all(&header).await.is_err() || up_w.write_all(&payload).await.is_err() {
                        break;
                    }
                    forwarded += 1;
                }
                let _ = up_w.shutdown().await;
            });
            tokio::spawn(async move {
                let _ = tokio::io::copy(&mut up_r, &mut relay_w).await;
            });
            Ok(Box::new(local) as Connection)
        })
    }
}

fn config(root: &Path, chunk_size: usize) -> TransferConfig {
    TransferConfig {
        chunk_size,
        download_dir: root.join("downloads"),
        resume_dir: Some(root.join("resume")),
        receipt_timeout_secs: 5,
        ..TransferConfig::default()
    }
}

fn manager_with(root: &Path, chunk_size: usize, connector: Arc<dyn Connector>) -> Arc<TransferManager> {
    let cfg = config(root, chunk_size);
    let store = ResumeStore::new(root.join("resume"));
    Arc::new(TransferManager::new(cfg, DeviceIdentity::default(), store, connector))
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i.wrapping_mul(31) % 251) as u8).collect()
}

fn write_source(dir: &Path, name: &str, data: &[u8]) -> PathBuf {
    std::fs::create_dir_all(dir).unwrap();
    let path = dir.join(name);
    std::fs::write(&path, data).unwrap();
    path
}

async fn wait_for(mut check: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(10), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn scenario_a_frame_counts() {
    let root = tempfile::tempdir().unwrap();
    let data = pattern(5 * MIB);
    let src = write_source(&root.path().join("out"), "clip.bin", &data);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let peer = tokio::spawn(async move {
        let (mut s, _) = listener.accept().await.unwrap();
        let first = read_frame(&mut s).await.unwrap();
        let meta: FileMetadata = first.parse(MessageKind::Metadata).unwrap();

        let mut kinds = vec![first.kind];
        let mut indices = Vec::new();
        let mut body = Vec::new();
        loop {
            let frame = read_frame(&mut s).await.unwrap();
            kinds.push(frame.kind);
            if frame.kind == MessageKind::Complete {
                break;
            }
            let chunk: FileChunk = frame.parse(MessageKind::Chunk).unwrap();
            indices.push(chunk.index);
            body.extend_from_slice(&chunk.data);
        }

        let receipt = TransferReceipt::accepted(meta.transfer_id.clone(), body.len() as i64, sha256_hex(&body));
        write_frame(&mut s, &Frame::receipt(&receipt).unwrap()).await.unwrap();
        (meta, kinds, indices, body)
    });

    let mgr = manager_with(&root.path().join("sender"), 512 * KIB, Arc::new(TcpConnector::default()));
    let record = mgr.send_file(&src, &Endpoint::new("127.0.0.1", port)).await.unwrap();

    let (meta, kinds, indices, body) = peer.await.unwrap();
    assert_eq!(meta.chunk_size, 512 * KIB as i64);
    assert_eq!(meta.file_size, data.len() as i64);
    assert_eq!(meta.compression, Compression::None);
    assert_eq!(kinds.iter().filter(|k| **k == MessageKind::Metadata).count(), 1);
    assert_eq!(kinds.iter().filter(|k| **k == MessageKind::Chunk).count(), 10);
    assert_eq!(kinds.iter().filter(|k| **k == MessageKind::Complete).count(), 1);
    assert_eq!(indices, (0..10).collect::<Vec<i64>>());
    assert_eq!(body, data);

    assert_eq!(record.status, TransferStatus::Completed);
    assert_eq!(record.progress(), 1.0);
    assert_eq!(mgr.history()[0].id, record.id);
    assert!(mgr.active().is_empty());
}

#[tokio::test]
async fn tcp_roundtrip_through_serve_with_compression() {
    let root = tempfile::tempdir().unwrap();
    let data = pattern(MIB + 123);
    let src = write_source(&root.path().join("out"), "notes.txt", &data);

    let mut recv_cfg = config(&root.path().join("receiver"), 64 * KIB);
    recv_cfg.connect_timeout_secs = 5;
    let receiver = Arc::new(TransferManager::from_config(recv_cfg, DeviceIdentity::default()).unwrap());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let cancel = CancellationToken::new();
    let server = tokio::spawn(receiver.clone().serve(listener, cancel.clone()));

    let mut send_cfg = config(&root.path().join("sender"), 64 * KIB);
    send_cfg.compression_enabled = true;
    let sender = TransferManager::from_config(send_cfg, DeviceIdentity::default()).unwrap();
    let record = sender.send_file(&src, &Endpoint::new("127.0.0.1", port)).await.unwrap();
    assert_eq!(record.status, TransferStatus::Completed);
    assert_eq!(record.compression, Compression::Zlib);

    wait_for(|| !receiver.history().is_empty()).await;
    let history = receiver.history();
    let received = &history[0];
    assert_eq!(received.status, TransferStatus::Completed);
    assert_eq!(received.direction, Direction::Incoming);
    assert_eq!(std::fs::read(&received.local_path).unwrap(), data);

    cancel.cancel();
    server.await.unwrap().unwrap();
}

#[tokio::test]
async fn live_pause_persists_and_resumes_in_place() {
    let root = tempfile::tempdir().unwrap();
    let chunk = 64 * KIB;
    let data = pattern(10 * chunk + 500);
    let src = write_source(&root.path().join("out"), "album.zip", &data);

    // sender <-> gate <-> receiver. The gate stops forwarding after the
    // metadata frame and two chunks until released.
    let (sender_side, gate_a) = tokio::io::duplex(8 * KIB);
    let (gate_b, receiver_side) = tokio::io::duplex(8 * KIB);
    let holding = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    {
        let holding = holding.clone();
        let release = release.clone();
        let (mut a_r, mut a_w) = tokio::io::split(gate_a);
        let (mut b_r, mut b_w) = tokio::io::split(gate_b);
        tokio::spawn(async move {
            let mut forwarded = 0;
            while let Ok(frame) = read_frame(&mut a_r).await {
                write_frame(&mut b_w, &frame).await.unwrap();
                forwarded += 1;
                if forwarded == 3 {
                    holding.notify_one();
                    release.notified().await;
                }
            }
            let _ = b_w.shutdown().await;
        });
        tokio::spawn(async move {
            let _ = tokio::io::copy(&mut b_r, &mut a_w).await;
            let _ = a_w.shutdown().await;
        });
    }

    let receiver = manager_with(&root.path().join("receiver"), chunk, Arc::new(TcpConnector::default()));
    let recv_task = {
        let receiver = receiver.clone();
        tokio::spawn(async move { receiver.receive_file(Box::new(receiver_side), None).await })
    };

    let sender = manager_with(&root.path().join("sender"), chunk, DuplexConnector::new(sender_side));
    let send_task = {
        let sender = sender.clone();
        let src = src.clone();
        tokio::spawn(async move { sender.send_file(&src, &Endpoint::new("receiver", 7070)).await })
    };

    holding.notified().await;
    let id = sender.active()[0].id.clone();
    sender.pause(&id).unwrap();
    release.notify_one();

    wait_for(|| sender.get(&id).is_some_and(|r| r.status == TransferStatus::Paused)).await;
    let paused = sender.get(&id).unwrap();
    assert_eq!(paused.transferred_bytes, 3 * chunk as u64);
    assert_eq!(paused.resume_offset, 3 * chunk as u64);
    let stored = sender.store().load(&id).unwrap().expect("resume record on pause");
    assert_eq!(stored.resume_offset, 3 * chunk as u64);
    assert_eq!(stored.remote_address.as_deref(), Some("receiver"));

    // Only a transferring transfer can be paused.
    assert!(sender.pause(&id).is_err());
    sender.resume(&id).await.unwrap();

    let sent = send_task.await.unwrap().unwrap();
    assert_eq!(sent.status, TransferStatus::Completed);
    assert!(sender.store().load(&id).unwrap().is_none());

    let received = recv_task.await.unwrap().unwrap();
    assert_eq!(received.status, TransferStatus::Completed);
    assert_eq!(std::fs::read(&received.local_path).unwrap(), data);
}

#[tokio::test]
async fn scenario_b_resume_after_restart() {
    let root = tempfile::tempdir().unwrap();
    let id = "0b5d1f9a-8c3e-4e52-b7a1-2f6d9c0e4a77";
    let data = pattern(5 * MIB);
    let offset = 3 * MIB as u64;
    let src = write_source(&root.path().join("out"), "movie.bin", &data);
    let hash = file_sha256(&src).unwrap();

    // Sender side: paused at 3 MiB before the restart.
    let sender_root = root.path().join("sender");
    let mut out = TransferRecord::new(id, "movie.bin", data.len() as u64, Direction::Outgoing, src.clone());
    out.transferred_bytes = offset;
    out.resume_offset = offset;
    out.file_hash = Some(hash.clone());
    out.remote = Some(Endpoint::new("receiver", 7070));
    ResumeStore::new(sender_root.join("resume"))
        .save(&ResumeRecord::from_record(&out))
        .unwrap();

    // Receiver side: the first 3 MiB are durable.
    let receiver_root = root.path().join("receiver");
    let dest = write_source(&receiver_root.join("downloads"), "movie.bin", &data[..offset as usize]);
    let mut inc = TransferRecord::new(id, "movie.bin", data.len() as u64, Direction::Incoming, dest.clone());
    inc.transferred_bytes = offset;
    inc.resume_offset = offset;
    inc.file_hash = Some(hash.clone());
    ResumeStore::new(receiver_root.join("resume"))
        .save(&ResumeRecord::from_record(&inc))
        .unwrap();

    // Tap the opening bytes on their way to the receiver.
    let (sender_side, mut tap_in) = tokio::io::duplex(64 * KIB);
    let (mut tap_out, receiver_side) = tokio::io::duplex(64 * KIB);
    let tap = tokio::spawn(async move {
        let mut request = [0u8; 45];
        tap_in.read_exact(&mut request).await.unwrap();
        tap_out.write_all(&request).await.unwrap();
        let _ = tokio::io::copy_bidirectional(&mut tap_in, &mut tap_out).await;
        request
    });

    let receiver = manager_with(&receiver_root, 512 * KIB, Arc::new(TcpConnector::default()));
    let recv_task = {
        let receiver = receiver.clone();
        tokio::spawn(async move { receiver.receive_file(Box::new(receiver_side), None).await })
    };

    let sender = manager_with(&sender_root, 512 * KIB, DuplexConnector::new(sender_side));
    assert_eq!(sender.pending_resumes().unwrap().len(), 1);
    let done = sender.resume(id).await.unwrap();
    assert_eq!(done.status, TransferStatus::Completed);

    let received = recv_task.await.unwrap().unwrap();
    assert_eq!(received.status, TransferStatus::Completed);
    assert_eq!(file_sha256(&dest).unwrap(), hash);
    assert_eq!(std::fs::read(&dest).unwrap(), data);

    let request = tap.await.unwrap();
    assert_eq!(request[0], 0x04);
    assert_eq!(&request[1..37], id.as_bytes());
    assert_eq!(&request[37..], &3_145_728i64.to_be_bytes());

    assert!(sender.pending_resumes().unwrap().is_empty());
    assert!(receiver.pending_resumes().unwrap().is_empty());
}

/// Pauses a real sender after `chunks` chunks, kills it, and finishes the
/// file from a fresh sender manager sharing the same resume directory.
async fn pause_kill_and_resume_from_new_process(chunks: usize) {
    let root = tempfile::tempdir().unwrap();
    let chunk = 64 * KIB;
    let data = pattern(8 * chunk);
    let src = write_source(&root.path().join("out"), "backup.tar", &data);
    let hash = file_sha256(&src).unwrap();

    let receiver = manager_with(&root.path().join("receiver"), chunk, Arc::new(TcpConnector::default()));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let cancel = CancellationToken::new();
    let server = tokio::spawn(receiver.clone().serve(listener, cancel.clone()));

    let holding = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let gate = Arc::new(GatedTcpConnector {
        port,
        hold_after: chunks,
        holding: holding.clone(),
        release: release.clone(),
    });
    let sender_root = root.path().join("sender");
    let first = manager_with(&sender_root, chunk, gate);
    let send_task = {
        let first = first.clone();
        let src = src.clone();
        tokio::spawn(async move { first.send_file(&src, &Endpoint::new("127.0.0.1", port)).await })
    };

    holding.notified().await;
    wait_for(|| first.active().first().is_some_and(|r| r.status == TransferStatus::Transferring)).await;
    let id = first.active()[0].id.clone();
    first.pause(&id).unwrap();
    release.notify_one();

    let offset = (chunks * chunk) as u64;
    wait_for(|| first.get(&id).is_some_and(|r| r.status == TransferStatus::Paused)).await;
    assert_eq!(first.get(&id).unwrap().resume_offset, offset);
    wait_for(|| receiver.get(&id).is_some_and(|r| r.transferred_bytes == offset)).await;

    // The sending process dies while paused.
    send_task.abort();
    let _ = send_task.await;

    wait_for(|| receiver.store().load(&id).unwrap().is_some()).await;
    let kept = receiver.store().load(&id).unwrap().unwrap();
    assert_eq!(kept.resume_offset, offset);
    assert!(std::fs::metadata(&kept.local_path).unwrap().len() >= offset);
    wait_for(|| receiver.history().iter().any(|r| r.id == id)).await;

    let second = manager_with(&sender_root, chunk, Arc::new(TcpConnector::default()));
    assert_eq!(second.pending_resumes().unwrap().len(), 1);
    let done = second.resume(&id).await.unwrap();
    assert_eq!(done.status, TransferStatus::Completed, "offset {offset}");

    wait_for(|| receiver.history().first().is_some_and(|r| r.id == id && r.status == TransferStatus::Completed)).await;
    assert_eq!(file_sha256(&kept.local_path).unwrap(), hash, "offset {offset}");
    assert!(second.pending_resumes().unwrap().is_empty());
    assert!(receiver.pending_resumes().unwrap().is_empty());

    cancel.cancel();
    server.await.unwrap().unwrap();
}

#[tokio::test]
async fn resume_after_sender_restart_at_start() {
    pause_kill_and_resume_from_new_process(0).await;
}

#[tokio::test]
async fn resume_after_sender_restart_after_one_chunk() {
    pause_kill_and_resume_from_new_process(1).await;
}

#[tokio::test]
async fn resume_after_sender_restart_mid_file() {
    pause_kill_and_resume_from_new_process(4).await;
}

#[tokio::test]
async fn resume_after_sender_restart_one_chunk_from_end() {
    pause_kill_and_resume_from_new_process(7).await;
}

#[tokio::test]
async fn resume_request_for_unknown_transfer_is_refused() {
    let root = tempfile::tempdir().unwrap();
    let receiver = manager_with(root.path(), 64 * KIB, Arc::new(TcpConnector::default()));

    let (mut peer, receiver_side) = tokio::io::duplex(KIB);
    let request = skyhop_protocol::ResumeRequest {
        transfer_id: "never-seen".into(),
        offset: 0,
    };
    peer.write_all(&request.encode().unwrap()).await.unwrap();

    let err = receiver.receive_file(Box::new(receiver_side), None).await.unwrap_err();
    assert!(matches!(err, TransferError::UnknownTransfer(_)));

    // Released without an ack.
    let mut rest = Vec::new();
    peer.read_to_end(&mut rest).await.unwrap();
    assert!(rest.is_empty());
}

#[tokio::test]
async fn resume_offset_beyond_durable_bytes_is_refused() {
    let root = tempfile::tempdir().unwrap();
    let dest = write_source(&root.path().join("downloads"), "x.bin", &[1u8; 100]);
    let mut inc = TransferRecord::new("t-short", "x.bin", 1000, Direction::Incoming, dest);
    inc.resume_offset = 100;
    inc.transferred_bytes = 100;
    let receiver = manager_with(root.path(), 64 * KIB, Arc::new(TcpConnector::default()));
    receiver.store().save(&ResumeRecord::from_record(&inc)).unwrap();

    let (mut peer, receiver_side) = tokio::io::duplex(KIB);
    let request = skyhop_protocol::ResumeRequest {
        transfer_id: "t-short".into(),
        offset: 500,
    };
    peer.write_all(&request.encode().unwrap()).await.unwrap();

    let err = receiver.receive_file(Box::new(receiver_side), None).await.unwrap_err();
    assert!(matches!(err, TransferError::InvalidState(_)));
    assert!(receiver.store().load("t-short").unwrap().is_some());
}

#[tokio::test]
async fn scenario_c_receiver_reports_other_hash() {
    let root = tempfile::tempdir().unwrap();
    let data = pattern(200 * KIB);
    let src = write_source(&root.path().join("out"), "doc.pdf", &data);

    let (sender_side, mut peer) = tokio::io::duplex(64 * KIB);
    let fake_receiver = tokio::spawn(async move {
        let meta: FileMetadata = read_frame(&mut peer).await.unwrap().parse(MessageKind::Metadata).unwrap();
        let mut received = 0i64;
        loop {
            let frame = read_frame(&mut peer).await.unwrap();
            if frame.kind == MessageKind::Complete {
                break;
            }
            let chunk: FileChunk = frame.parse(MessageKind::Chunk).unwrap();
            received += chunk.size;
        }
        let receipt = TransferReceipt::rejected(meta.transfer_id, received, Some("deadbeef".into()), "hash mismatch");
        write_frame(&mut peer, &Frame::receipt(&receipt).unwrap()).await.unwrap();
    });

    let sender = manager_with(&root.path().join("sender"), 64 * KIB, DuplexConnector::new(sender_side));
    let err = sender.send_file(&src, &Endpoint::new("peer", 1)).await.unwrap_err();
    fake_receiver.await.unwrap();

    match err {
        TransferError::IntegrityCheckFailed { actual, .. } => assert_eq!(actual, "deadbeef"),
        other => panic!("expected integrity failure, got {other:?}"),
    }
    let history = sender.history();
    let failed = &history[0];
    assert_eq!(failed.status, TransferStatus::Failed);
    assert!(failed.error.as_deref().unwrap().contains("integrity"));
}

#[tokio::test]
async fn scenario_c_real_receiver_sends_failed_receipt() {
    let root = tempfile::tempdir().unwrap();
    let data = pattern(100 * KIB);
    let receiver = manager_with(root.path(), 64 * KIB, Arc::new(TcpConnector::default()));

    let (mut peer, receiver_side) = tokio::io::duplex(256 * KIB);
    let recv_task = {
        let receiver = receiver.clone();
        tokio::spawn(async move { receiver.receive_file(Box::new(receiver_side), None).await })
    };

    let meta = FileMetadata {
        transfer_id: "t-corrupt".into(),
        file_name: "data.bin".into(),
        file_size: data.len() as i64,
        file_hash: sha256_hex(b"something else"),
        chunk_size: 64 * KIB as i64,
        compression: Compression::None,
        sender_id: Some("fake".into()),
        sender_name: Some("Fake Sender".into()),
        sender_platform: None,
        sender_os_version: None,
        sender_model: None,
        sender_chip: None,
    };
    write_frame(&mut peer, &Frame::metadata(&meta).unwrap()).await.unwrap();
    for (i, part) in data.chunks(64 * KIB).enumerate() {
        let chunk = FileChunk {
            index: i as i64,
            data: part.to_vec(),
            size: part.len() as i64,
        };
        write_frame(&mut peer, &Frame::chunk(&chunk).unwrap()).await.unwrap();
    }
    write_frame(&mut peer, &Frame::complete()).await.unwrap();

    let receipt: TransferReceipt = read_frame(&mut peer).await.unwrap().parse(MessageKind::Receipt).unwrap();
    assert!(!receipt.success);
    assert_eq!(receipt.file_hash.as_deref(), Some(sha256_hex(&data).as_str()));

    let err = recv_task.await.unwrap().unwrap_err();
    assert!(matches!(err, TransferError::IntegrityCheckFailed { .. }));
    let history = receiver.history();
    let rec = &history[0];
    assert_eq!(rec.status, TransferStatus::Failed);
    assert_eq!(rec.device_name, "Fake Sender");
}

#[tokio::test]
async fn scenario_d_drop_without_pause() {
    let root = tempfile::tempdir().unwrap();
    let data = pattern(2 * MIB);
    let src = write_source(&root.path().join("out"), "big.iso", &data);

    let (sender_side, mut peer) = tokio::io::duplex(64 * KIB);
    let fake_receiver = tokio::spawn(async move {
        read_frame(&mut peer).await.unwrap();
        read_frame(&mut peer).await.unwrap();
        drop(peer);
    });

    let sender = manager_with(&root.path().join("sender"), 64 * KIB, DuplexConnector::new(sender_side));
    let err = sender.send_file(&src, &Endpoint::new("peer", 1)).await.unwrap_err();
    fake_receiver.await.unwrap();

    assert!(matches!(err, TransferError::ConnectionClosed), "got {err:?}");
    assert_eq!(sender.history()[0].status, TransferStatus::Failed);
    assert!(sender.pending_resumes().unwrap().is_empty());
}

#[tokio::test]
async fn receipt_timeout_fails_the_transfer() {
    let root = tempfile::tempdir().unwrap();
    let src = write_source(&root.path().join("out"), "tiny.txt", b"hello");

    let (sender_side, mut peer) = tokio::io::duplex(64 * KIB);
    let silent_receiver = tokio::spawn(async move {
        loop {
            match read_frame(&mut peer).await {
                Ok(f) if f.kind == MessageKind::Complete => break,
                Ok(_) => continue,
                Err(e) => panic!("{e}"),
            }
        }
        // Hold the connection open without answering.
        tokio::time::sleep(Duration::from_secs(3)).await;
        drop(peer);
    });

    let mut cfg = config(&root.path().join("sender"), 64 * KIB);
    cfg.receipt_timeout_secs = 1;
    let sender = TransferManager::new(
        cfg,
        DeviceIdentity::default(),
        ResumeStore::new(root.path().join("sender").join("resume")),
        DuplexConnector::new(sender_side),
    );
    let err = sender.send_file(&src, &Endpoint::new("peer", 1)).await.unwrap_err();
    assert!(matches!(err, TransferError::Timeout("receipt")));
    silent_receiver.await.unwrap();
}

#[tokio::test]
async fn empty_file_roundtrip() {
    let root = tempfile::tempdir().unwrap();
    let src = write_source(&root.path().join("out"), "empty.txt", b"");

    let (sender_side, receiver_side) = tokio::io::duplex(64 * KIB);
    let receiver = manager_with(&root.path().join("receiver"), 64 * KIB, Arc::new(TcpConnector::default()));
    let recv_task = {
        let receiver = receiver.clone();
        tokio::spawn(async move { receiver.receive_file(Box::new(receiver_side), None).await })
    };

    let sender = manager_with(&root.path().join("sender"), 64 * KIB, DuplexConnector::new(sender_side));
    let sent = sender.send_file(&src, &Endpoint::new("peer", 1)).await.unwrap();
    assert_eq!(sent.progress(), 1.0);

    let received = recv_task.await.unwrap().unwrap();
    assert_eq!(std::fs::metadata(&received.local_path).unwrap().len(), 0);
}
