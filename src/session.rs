//! Session state machine (component C4): handshake and termination
//! choreography shared by both ARQ engines and by both client and server.
//!
//! The bulk-transfer phase itself is engine-specific (`stop_and_wait.rs`,
//! `selective_repeat.rs`); this module only implements the parts of the
//! state machine (§4.4) that are identical regardless of which engine
//! drives the middle phase.

use std::fmt;
use std::net::SocketAddr;
use std::path::Path;
use std::str::FromStr;

use rand::Rng;
use tokio::net::UdpSocket;
use tokio::time::timeout;

use crate::constants::{INITIAL_SEQ_MAX, LINGER_TIMEOUT, MAX_CONSECUTIVE_LOSTS, SOCKET_TIMEOUT};
use crate::error::{ProtocolError, Result};
use crate::frame::{Frame, Kind, FILE_NOT_FOUND_ERROR, INVALID_FILE_HASHING};

/// Which ARQ engine drives the bulk-transfer phase of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    StopAndWait,
    SelectiveRepeat,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::StopAndWait => write!(f, "stop-and-wait"),
            Protocol::SelectiveRepeat => write!(f, "selective-repeat"),
        }
    }
}

impl FromStr for Protocol {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "stop-and-wait" | "saw" => Ok(Protocol::StopAndWait),
            "selective-repeat" | "sr" => Ok(Protocol::SelectiveRepeat),
            other => Err(format!("unknown protocol \"{other}\" (expected stop-and-wait or selective-repeat)")),
        }
    }
}

/// Receive one datagram (or time out) and decode it. A malformed frame is
/// indistinguishable from a lost one at this layer — both are reported as
/// `Ok(None)` so callers apply the same `consecutive_losts` bookkeeping to
/// either case (§7: `MalformedFrame` is "dropped silently; treated as
/// loss").
pub async fn recv_frame(sock: &UdpSocket, buf: &mut [u8], wait: std::time::Duration) -> std::io::Result<Option<Frame>> {
    match timeout(wait, sock.recv(buf)).await {
        Ok(Ok(n)) => Ok(Frame::decode(&buf[..n]).ok()),
        Ok(Err(e)) => Err(e),
        Err(_elapsed) => Ok(None),
    }
}

fn random_initial_seq() -> u32 {
    rand::thread_rng().gen_range(0..=INITIAL_SEQ_MAX)
}

/// Big-endian encoding of `n` with leading zero bytes stripped, matching
/// `original_source/src/lib/server.py`'s `handle_download_handshake`
/// (`n.to_bytes((n.bit_length() + 7) // 8, "big")`). Zero encodes as no
/// bytes at all, same as the original's zero-length-bytes case.
fn encode_minimal_be(n: u64) -> Vec<u8> {
    let full = n.to_be_bytes();
    let first_nonzero = full.iter().position(|&b| b != 0).unwrap_or(full.len());
    full[first_nonzero..].to_vec()
}

// ---------------------------------------------------------------------------
// Server-side handshakes
// ---------------------------------------------------------------------------

/// Server's half of the DOWNLOAD handshake (§4.4). `sock` is the fresh
/// per-session socket, already connected to `peer`. `path` has already
/// been resolved and validated by the caller (path-traversal guard lives
/// at the filename-resolution boundary, not here). Returns the negotiated
/// initial `pos` and the file size.
pub async fn server_download_handshake(sock: &UdpSocket, path: &Path) -> Result<(u32, u64)> {
    let metadata = match tokio::fs::metadata(path).await {
        Ok(m) => m,
        Err(_) => {
            let err = Frame::error(0, Some(FILE_NOT_FOUND_ERROR));
            let _ = sock.send(&err.encode()).await;
            return Err(ProtocolError::FileNotFound);
        }
    };
    let file_size = metadata.len();
    let pos = random_initial_seq();
    let reply = Frame::new(Kind::Ok, pos, encode_minimal_be(file_size));

    let mut buf = crate::net::new_recv_buffer();
    let mut losses = 0u32;
    loop {
        sock.send(&reply.encode()).await?;
        match recv_frame(sock, &mut buf, SOCKET_TIMEOUT).await? {
            Some(Frame { kind: Kind::Ack, pos: p, .. }) if p == pos => return Ok((pos, file_size)),
            Some(Frame { kind: Kind::Error, payload, .. }) => {
                return Err(ProtocolError::PeerError(payload.first().copied()));
            }
            _ => {
                losses += 1;
                if losses >= MAX_CONSECUTIVE_LOSTS {
                    return Err(ProtocolError::ConnectionAborted("download handshake"));
                }
            }
        }
    }
}

/// Server's half of the UPLOAD handshake. `handshake_pos` is the `r` the
/// client chose. Returns once the client's first data/FIN frame arrives —
/// that frame is returned to the caller so the bulk-transfer loop can
/// treat it as its first input instead of re-receiving it.
pub async fn server_upload_handshake(sock: &UdpSocket, handshake_pos: u32) -> Result<Frame> {
    let ack = Frame::ack(handshake_pos);
    let mut buf = crate::net::new_recv_buffer();
    let mut losses = 0u32;
    loop {
        sock.send(&ack.encode()).await?;
        match recv_frame(sock, &mut buf, SOCKET_TIMEOUT).await? {
            Some(frame) => return Ok(frame),
            None => {
                losses += 1;
                if losses >= MAX_CONSECUTIVE_LOSTS {
                    return Err(ProtocolError::ConnectionAborted("upload handshake"));
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Client-side handshakes
// ---------------------------------------------------------------------------

/// Client's half of the DOWNLOAD handshake, run on the client's main
/// socket against the server's well-known endpoint. The server's reply
/// arrives from a fresh per-session port (§4.2), not `server_addr` itself,
/// so the learned peer address is returned alongside the session's
/// initial `pos` and the announced file size — the caller must `connect()`
/// its socket to it before entering bulk transfer.
pub async fn client_download_handshake(
    sock: &UdpSocket,
    server_addr: SocketAddr,
    filename: &str,
) -> Result<(SocketAddr, u32, u64)> {
    let req = Frame::new(Kind::Download, 0, filename.as_bytes().to_vec());
    let mut buf = crate::net::new_recv_buffer();
    let mut losses = 0u32;

    let (reply, peer) = loop {
        sock.send_to(&req.encode(), server_addr).await?;
        match timeout(SOCKET_TIMEOUT, sock.recv_from(&mut buf)).await {
            Ok(Ok((n, from))) => match Frame::decode(&buf[..n]) {
                Ok(f) => break (f, from),
                Err(_) => {
                    losses += 1;
                    if losses >= MAX_CONSECUTIVE_LOSTS {
                        return Err(ProtocolError::ConnectionAborted("download handshake"));
                    }
                }
            },
            Ok(Err(e)) => return Err(e.into()),
            Err(_elapsed) => {
                losses += 1;
                if losses >= MAX_CONSECUTIVE_LOSTS {
                    return Err(ProtocolError::ConnectionAborted("download handshake"));
                }
            }
        }
    };

    match reply.kind {
        Kind::Error => {
            if reply.payload.first().copied() == Some(FILE_NOT_FOUND_ERROR) {
                Err(ProtocolError::FileNotFound)
            } else {
                Err(ProtocolError::PeerError(reply.payload.first().copied()))
            }
        }
        Kind::Ok => {
            let mut size_bytes = [0u8; 8];
            let start = 8usize.saturating_sub(reply.payload.len());
            size_bytes[start..].copy_from_slice(&reply.payload);
            let file_size = u64::from_be_bytes(size_bytes);

            let ack = Frame::ack(reply.pos);
            sock.send_to(&ack.encode(), peer).await?;
            Ok((peer, reply.pos, file_size))
        }
        _ => Err(ProtocolError::ConnectionAborted("unexpected handshake reply")),
    }
}

/// Client's half of the UPLOAD handshake. Returns the learned per-session
/// peer address (see [`client_download_handshake`]) and the initial `pos`
/// the client chose (`r`), which both sides use as the base sequence
/// number.
pub async fn client_upload_handshake(sock: &UdpSocket, server_addr: SocketAddr, filename: &str) -> Result<(SocketAddr, u32)> {
    let pos = random_initial_seq();
    let req = Frame::new(Kind::Upload, pos, filename.as_bytes().to_vec());
    let mut buf = crate::net::new_recv_buffer();
    let mut losses = 0u32;

    loop {
        sock.send_to(&req.encode(), server_addr).await?;
        match timeout(SOCKET_TIMEOUT, sock.recv_from(&mut buf)).await {
            Ok(Ok((n, from))) => match Frame::decode(&buf[..n]) {
                Ok(Frame { kind: Kind::Ack, pos: p, .. }) if p == pos => return Ok((from, pos)),
                Ok(Frame { kind: Kind::Error, payload, .. }) => {
                    return Err(ProtocolError::PeerError(payload.first().copied()));
                }
                _ => {
                    losses += 1;
                    if losses >= MAX_CONSECUTIVE_LOSTS {
                        return Err(ProtocolError::ConnectionAborted("upload handshake"));
                    }
                }
            },
            Ok(Err(e)) => return Err(e.into()),
            Err(_elapsed) => {
                losses += 1;
                if losses >= MAX_CONSECUTIVE_LOSTS {
                    return Err(ProtocolError::ConnectionAborted("upload handshake"));
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Termination (§4.4) — identical choreography for both engines
// ---------------------------------------------------------------------------

/// Sender side of termination: transmit FIN, retry on silence, and
/// interpret the receiver's verdict.
pub async fn send_fin_and_await_verdict(sock: &UdpSocket, fin: &Frame) -> Result<()> {
    let mut buf = crate::net::new_recv_buffer();
    let mut losses = 0u32;
    loop {
        sock.send(&fin.encode()).await?;
        match recv_frame(sock, &mut buf, SOCKET_TIMEOUT).await? {
            Some(Frame { kind: Kind::Ack, pos, .. }) if pos == fin.pos => return Ok(()),
            Some(Frame { kind: Kind::Error, pos, payload }) if pos == fin.pos => {
                if payload.first().copied() == Some(INVALID_FILE_HASHING) {
                    return Err(ProtocolError::InvalidHash);
                }
                return Err(ProtocolError::PeerError(payload.first().copied()));
            }
            _ => {
                losses += 1;
                if losses >= MAX_CONSECUTIVE_LOSTS {
                    return Err(ProtocolError::ConnectionAborted("FIN retry exhausted"));
                }
            }
        }
    }
}

/// Receiver side of termination: having already computed `verdict`
/// (ACK on hash match, ERROR on mismatch), resend it on every datagram
/// that arrives until `LINGER_TIMEOUT` of silence elapses. Per §9's open
/// question, silence is treated as "peer is gone" regardless of whether
/// the sender ever actually saw the verdict.
pub async fn linger_and_resend_verdict(sock: &UdpSocket, verdict: &Frame) {
    let mut buf = crate::net::new_recv_buffer();
    loop {
        if sock.send(&verdict.encode()).await.is_err() {
            return;
        }
        match timeout(LINGER_TIMEOUT, sock.recv(&mut buf)).await {
            Ok(Ok(_)) => continue,
            _ => return,
        }
    }
}

/// Build the receiver's termination verdict by comparing the digest the
/// sender announced in FIN against the just-written file's own digest.
pub fn build_verdict(fin_pos: u32, local: crate::digest::Digest, remote_bytes: &[u8]) -> Frame {
    match crate::digest::Digest::from_slice(remote_bytes) {
        Some(remote) if remote == local => Frame::ack(fin_pos),
        _ => Frame::error(fin_pos, Some(INVALID_FILE_HASHING)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_round_trips_through_display_and_parse() {
        for p in [Protocol::StopAndWait, Protocol::SelectiveRepeat] {
            let s = p.to_string();
            assert_eq!(s.parse::<Protocol>().unwrap(), p);
        }
    }

    #[test]
    fn protocol_rejects_unknown_string() {
        assert!("tcp".parse::<Protocol>().is_err());
    }

    #[test]
    fn encode_minimal_be_strips_leading_zero_bytes() {
        assert_eq!(encode_minimal_be(0), Vec::<u8>::new());
        assert_eq!(encode_minimal_be(255), vec![0xFF]);
        assert_eq!(encode_minimal_be(256), vec![0x01, 0x00]);
        assert_eq!(encode_minimal_be(u64::MAX), vec![0xFF; 8]);
    }

    #[test]
    fn verdict_is_ack_on_matching_digest() {
        let d = crate::digest::Digest([7u8; 16]);
        let v = build_verdict(5, d, &d.0);
        assert_eq!(v.kind, Kind::Ack);
        assert_eq!(v.pos, 5);
    }

    #[test]
    fn verdict_is_error_on_mismatched_digest() {
        let d = crate::digest::Digest([7u8; 16]);
        let other = [8u8; 16];
        let v = build_verdict(5, d, &other);
        assert_eq!(v.kind, Kind::Error);
        assert_eq!(v.payload, vec![INVALID_FILE_HASHING]);
    }
}
