//! Drives both ARQ engines over a deliberately unreliable transport: a
//! small relay sits between sender and receiver and drops, duplicates,
//! and reorders datagrams on a fixed schedule. Neither engine is aware
//! of the relay — it just behaves like a lossy link.

use std::net::SocketAddr;

use arq_xfer::frame::{Frame, Kind};
use arq_xfer::{selective_repeat, stop_and_wait};
use tokio::net::UdpSocket;

/// Forward datagrams between `peer_a` and `peer_b`, dropping every 7th,
/// reordering every 5th by holding it back one step, and duplicating
/// every 11th. The counters are shared across both directions, so ACKs
/// and data frames are both subject to the same schedule.
async fn run_lossy_relay(relay_sock: UdpSocket, peer_a: SocketAddr, peer_b: SocketAddr) {
    let mut buf = vec![0u8; 4096];
    let mut count = 0u32;
    let mut held: Option<(Vec<u8>, SocketAddr)> = None;

    loop {
        let (n, from) = match relay_sock.recv_from(&mut buf).await {
            Ok(v) => v,
            Err(_) => return,
        };
        count += 1;
        let dest = if from == peer_a { peer_b } else { peer_a };
        let data = buf[..n].to_vec();

        if count % 7 == 0 {
            continue; // simulated loss
        }

        if count % 5 == 0 && held.is_none() {
            held = Some((data, dest)); // simulated reorder: delay one step
            continue;
        }

        if relay_sock.send_to(&data, dest).await.is_err() {
            return;
        }
        if let Some((held_data, held_dest)) = held.take() {
            let _ = relay_sock.send_to(&held_data, held_dest).await;
        }

        if count % 11 == 0 {
            let _ = relay_sock.send_to(&data, dest).await; // simulated duplicate
        }
    }
}

/// Bind a sender/receiver pair that can only reach each other through a
/// lossy relay, mirroring the `pair()` helper each engine's own unit
/// tests use for a clean loopback pair.
async fn lossy_pair() -> (UdpSocket, UdpSocket) {
    let a = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let b = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let relay = UdpSocket::bind("127.0.0.1:0").await.unwrap();

    let a_addr = a.local_addr().unwrap();
    let b_addr = b.local_addr().unwrap();
    let relay_addr = relay.local_addr().unwrap();

    a.connect(relay_addr).await.unwrap();
    b.connect(relay_addr).await.unwrap();

    tokio::spawn(run_lossy_relay(relay, a_addr, b_addr));
    (a, b)
}

#[tokio::test]
async fn stop_and_wait_survives_loss_duplication_and_reorder() {
    let (sender_sock, receiver_sock) = lossy_pair().await;
    let dir = tempfile::tempdir().unwrap();
    let src_path = dir.path().join("src.bin");
    let dst_path = dir.path().join("dst.bin");
    let content: Vec<u8> = (0..20_000u32).map(|i| (i % 256) as u8).collect();
    tokio::fs::write(&src_path, &content).await.unwrap();

    let mut src_file = tokio::fs::File::open(&src_path).await.unwrap();
    let mut dst_file = tokio::fs::File::create(&dst_path).await.unwrap();

    let recv_task = tokio::spawn(async move {
        stop_and_wait::receive_file(&receiver_sock, &mut dst_file, 0).await.unwrap()
    });

    let last_pos = stop_and_wait::send_file(&sender_sock, &mut src_file, 0, None).await.unwrap();
    let digest = arq_xfer::digest::digest(&src_path).await.unwrap();
    let fin = Frame::new(Kind::Fin, last_pos.wrapping_add(1), digest.as_bytes().to_vec());
    send_fin_until_relay_lets_one_through(&sender_sock, &fin).await;

    let received = recv_task.await.unwrap();
    assert_eq!(received.fin_pos, last_pos.wrapping_add(1));
    assert_eq!(received.remote_digest, digest.as_bytes().to_vec());

    let written = tokio::fs::read(&dst_path).await.unwrap();
    assert_eq!(written, content);
}

/// The relay drops roughly one packet in seven; a single unretried FIN
/// send (unlike the engines' own data frames, which the relay treats no
/// differently) could land on a dropped slot. Resend a handful of times
/// so the test isn't flaky — the receiver already ignores a FIN it's
/// already returned on, since `receive_file` exits after the first one.
async fn send_fin_until_relay_lets_one_through(sock: &UdpSocket, fin: &Frame) {
    let encoded = fin.encode();
    for _ in 0..5 {
        let _ = sock.send(&encoded).await;
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn selective_repeat_survives_loss_duplication_and_reorder() {
    let (sender_sock, receiver_sock) = lossy_pair().await;
    let dir = tempfile::tempdir().unwrap();
    let src_path = dir.path().join("src.bin");
    let dst_path = dir.path().join("dst.bin");
    let content: Vec<u8> = (0..150_000u32).map(|i| (i % 256) as u8).collect();
    tokio::fs::write(&src_path, &content).await.unwrap();

    let mut src_file = tokio::fs::File::open(&src_path).await.unwrap();
    let mut dst_file = tokio::fs::File::create(&dst_path).await.unwrap();

    let recv_task = tokio::spawn(async move {
        selective_repeat::receive_file(&receiver_sock, &mut dst_file, 0).await.unwrap()
    });

    let last_pos = selective_repeat::send_file(&sender_sock, &mut src_file, 0, None).await.unwrap();
    let digest = arq_xfer::digest::digest(&src_path).await.unwrap();
    let fin = Frame::new(Kind::Fin, last_pos.wrapping_add(1), digest.as_bytes().to_vec());
    send_fin_until_relay_lets_one_through(&sender_sock, &fin).await;

    let received = recv_task.await.unwrap();
    assert_eq!(received.fin_pos, last_pos.wrapping_add(1));
    assert_eq!(received.remote_digest, digest.as_bytes().to_vec());

    let written = tokio::fs::read(&dst_path).await.unwrap();
    assert_eq!(written, content);
}
