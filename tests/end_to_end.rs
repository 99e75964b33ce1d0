//! End-to-end scenarios driving the real server and client against real
//! loopback sockets, one engine at a time.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use arq_xfer::client;
use arq_xfer::error::ProtocolError;
use arq_xfer::server::{self, ServerConfig};
use arq_xfer::session::Protocol;
use tokio::sync::watch;

/// Start the server on an OS-assigned port and return the address.
async fn start_server(storage_dir: PathBuf, protocol: Protocol) -> (SocketAddr, watch::Sender<bool>) {
    let probe = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = probe.local_addr().unwrap();
    drop(probe);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let config = ServerConfig { listen_addr: addr, storage_dir, protocol };
    tokio::spawn(async move {
        let _ = server::run(config, shutdown_rx).await;
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    (addr, shutdown_tx)
}

#[tokio::test]
async fn download_of_nonexistent_file_reports_not_found() {
    let storage = tempfile::tempdir().unwrap();
    let (addr, _shutdown) = start_server(storage.path().to_path_buf(), Protocol::StopAndWait).await;

    let dst = tempfile::tempdir().unwrap();
    let result = client::download(addr, "missing.bin", dst.path(), Protocol::StopAndWait, true).await;
    assert!(matches!(result, Err(ProtocolError::FileNotFound)));
}

#[tokio::test]
async fn upload_then_download_round_trip_stop_and_wait() {
    let storage = tempfile::tempdir().unwrap();
    let (addr, _shutdown) = start_server(storage.path().to_path_buf(), Protocol::StopAndWait).await;

    let src_dir = tempfile::tempdir().unwrap();
    let src_path = src_dir.path().join("report.bin");
    let content: Vec<u8> = (0..9_000u32).map(|i| (i % 256) as u8).collect();
    tokio::fs::write(&src_path, &content).await.unwrap();

    client::upload(addr, "report.bin", &src_path, Protocol::StopAndWait, true)
        .await
        .expect("upload should succeed");

    let dst_dir = tempfile::tempdir().unwrap();
    client::download(addr, "report.bin", dst_dir.path(), Protocol::StopAndWait, true)
        .await
        .expect("download should succeed");

    let roundtripped = tokio::fs::read(dst_dir.path().join("report.bin")).await.unwrap();
    assert_eq!(roundtripped, content);
}

#[tokio::test]
async fn upload_then_download_round_trip_selective_repeat() {
    let storage = tempfile::tempdir().unwrap();
    let (addr, _shutdown) = start_server(storage.path().to_path_buf(), Protocol::SelectiveRepeat).await;

    let src_dir = tempfile::tempdir().unwrap();
    let src_path = src_dir.path().join("archive.bin");
    // Large enough to span several selective-repeat windows.
    let content: Vec<u8> = (0..400_000u32).map(|i| (i % 256) as u8).collect();
    tokio::fs::write(&src_path, &content).await.unwrap();

    client::upload(addr, "archive.bin", &src_path, Protocol::SelectiveRepeat, true)
        .await
        .expect("upload should succeed");

    let dst_dir = tempfile::tempdir().unwrap();
    client::download(addr, "archive.bin", dst_dir.path(), Protocol::SelectiveRepeat, true)
        .await
        .expect("download should succeed");

    let roundtripped = tokio::fs::read(dst_dir.path().join("archive.bin")).await.unwrap();
    assert_eq!(roundtripped, content);
}

#[tokio::test]
async fn empty_file_round_trip_still_verifies() {
    let storage = tempfile::tempdir().unwrap();
    let (addr, _shutdown) = start_server(storage.path().to_path_buf(), Protocol::StopAndWait).await;

    let src_dir = tempfile::tempdir().unwrap();
    let src_path = src_dir.path().join("empty.bin");
    tokio::fs::write(&src_path, b"").await.unwrap();

    client::upload(addr, "empty.bin", &src_path, Protocol::StopAndWait, true)
        .await
        .expect("empty upload should still succeed");

    let dst_dir = tempfile::tempdir().unwrap();
    client::download(addr, "empty.bin", dst_dir.path(), Protocol::StopAndWait, true)
        .await
        .expect("empty download should still succeed");

    let roundtripped = tokio::fs::read(dst_dir.path().join("empty.bin")).await.unwrap();
    assert!(roundtripped.is_empty());
}

#[tokio::test]
async fn two_concurrent_uploads_both_succeed() {
    let storage = tempfile::tempdir().unwrap();
    let (addr, _shutdown) = start_server(storage.path().to_path_buf(), Protocol::SelectiveRepeat).await;

    let src_dir = tempfile::tempdir().unwrap();
    let a_path = src_dir.path().join("a.bin");
    let b_path = src_dir.path().join("b.bin");
    tokio::fs::write(&a_path, vec![0xAAu8; 6_000]).await.unwrap();
    tokio::fs::write(&b_path, vec![0xBBu8; 6_000]).await.unwrap();

    let (result_a, result_b) = tokio::join!(
        client::upload(addr, "a.bin", &a_path, Protocol::SelectiveRepeat, true),
        client::upload(addr, "b.bin", &b_path, Protocol::SelectiveRepeat, true),
    );
    result_a.expect("upload a should succeed");
    result_b.expect("upload b should succeed");

    assert_eq!(tokio::fs::read(storage.path().join("a.bin")).await.unwrap(), vec![0xAAu8; 6_000]);
    assert_eq!(tokio::fs::read(storage.path().join("b.bin")).await.unwrap(), vec![0xBBu8; 6_000]);
}

#[tokio::test]
async fn download_rejects_path_traversal_in_filename() {
    let storage = tempfile::tempdir().unwrap();
    tokio::fs::write(storage.path().join("secret.txt"), b"top secret").await.unwrap();
    let (addr, _shutdown) = start_server(storage.path().to_path_buf(), Protocol::StopAndWait).await;

    let dst = tempfile::tempdir().unwrap();
    let result = client::download(addr, "../secret.txt", dst.path(), Protocol::StopAndWait, true).await;
    assert!(matches!(result, Err(ProtocolError::FileNotFound)));
}
