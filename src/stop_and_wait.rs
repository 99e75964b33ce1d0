//! Stop-and-Wait ARQ engine (component C5).
//!
//! At most one outstanding data frame: each chunk is sent and the sender
//! blocks until the matching ACK (or a timeout, or an explicit ERROR).
//! The receiver writes strictly in increasing `pos` order and re-ACKs
//! duplicates without writing them again.

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UdpSocket;

use crate::constants::{MAX_CONSECUTIVE_LOSTS, PAYLOAD_SIZE, SOCKET_TIMEOUT};
use crate::error::{ProtocolError, Result};
use crate::frame::{Frame, Kind};
use crate::session::recv_frame;

/// Send `file`'s remaining contents starting from `pos`, one frame per
/// round trip. Returns the `pos` of the last data frame actually sent
/// (the caller builds and sends FIN at `pos + 1`). `progress`, if given,
/// is advanced by each chunk's byte count as it is acknowledged.
pub async fn send_file(
    sock: &UdpSocket,
    file: &mut tokio::fs::File,
    mut pos: u32,
    progress: Option<&indicatif::ProgressBar>,
) -> Result<u32> {
    let mut chunk = vec![0u8; PAYLOAD_SIZE];
    let mut buf = crate::net::new_recv_buffer();

    loop {
        let n = file.read(&mut chunk).await?;
        if n == 0 {
            return Ok(pos);
        }
        pos = pos.wrapping_add(1);
        let frame = Frame::new(Kind::Ok, pos, chunk[..n].to_vec());

        let mut losses = 0u32;
        loop {
            sock.send(&frame.encode()).await?;
            match recv_frame(sock, &mut buf, SOCKET_TIMEOUT).await? {
                Some(Frame { kind: Kind::Ack, pos: p, .. }) if p == pos => {
                    if let Some(bar) = progress {
                        bar.inc(n as u64);
                    }
                    break;
                }
                Some(Frame { kind: Kind::Error, payload, .. }) => {
                    return Err(ProtocolError::PeerError(payload.first().copied()));
                }
                // Any other reply (wrong pos, or none at all) is loss —
                // including a duplicate ACK of an *earlier* pos, which
                // the Open Questions resolution (SPEC_FULL.md §4.4)
                // treats the same as silence: just resend.
                _ => {
                    losses += 1;
                    if losses >= MAX_CONSECUTIVE_LOSTS {
                        return Err(ProtocolError::ConnectionAborted("stop-and-wait send"));
                    }
                }
            }
        }
    }
}

/// Outcome of the stop-and-wait receive loop: either the FIN frame that
/// ends bulk transfer, or a peer-initiated abort.
pub struct Received {
    pub fin_pos: u32,
    pub remote_digest: Vec<u8>,
}

impl From<crate::selective_repeat::Received> for Received {
    fn from(r: crate::selective_repeat::Received) -> Self {
        Received {
            fin_pos: r.fin_pos,
            remote_digest: r.remote_digest,
        }
    }
}

/// Receive into `file` until FIN arrives. `handshake_pos` is both the
/// initial delivery frontier and the sequence number the handshake itself
/// used — a duplicate of that specific frame, repeated
/// `MAX_CONSECUTIVE_LOSTS` times, means the peer never saw any of our
/// ACKs and we give up (§4.5).
pub async fn receive_file(sock: &UdpSocket, file: &mut tokio::fs::File, handshake_pos: u32) -> Result<Received> {
    receive_file_seeded(sock, file, handshake_pos, None, None).await
}

/// Same as [`receive_file`], but the caller has already pulled one frame
/// off the wire (the server's upload handshake consumes the peer's first
/// data/FIN frame to know the handshake is acknowledged) and hands it in
/// here instead of it being lost, and optionally advances `progress` per
/// byte written.
pub async fn receive_file_seeded(
    sock: &UdpSocket,
    file: &mut tokio::fs::File,
    handshake_pos: u32,
    mut pending: Option<Frame>,
    progress: Option<&indicatif::ProgressBar>,
) -> Result<Received> {
    let mut last_pos = handshake_pos;
    let mut handshake_dup_losses = 0u32;
    let mut buf = crate::net::new_recv_buffer();

    loop {
        let frame = match pending.take() {
            Some(f) => f,
            None => {
                let n = sock.recv(&mut buf).await?;
                match Frame::decode(&buf[..n]) {
                    Ok(f) => f,
                    Err(_) => continue, // malformed frame: treated as loss, dropped silently
                }
            }
        };

        if frame.kind == Kind::Fin {
            return Ok(Received { fin_pos: frame.pos, remote_digest: frame.payload });
        }

        if frame.kind == Kind::Error {
            return Err(ProtocolError::PeerError(frame.payload.first().copied()));
        }

        if frame.pos <= last_pos {
            let ack = Frame::ack(frame.pos);
            sock.send(&ack.encode()).await?;
            if frame.pos == handshake_pos {
                handshake_dup_losses += 1;
                if handshake_dup_losses >= MAX_CONSECUTIVE_LOSTS {
                    return Err(ProtocolError::ConnectionAborted("peer never saw our handshake ACK"));
                }
            }
            continue;
        }

        file.write_all(&frame.payload).await?;
        if let Some(bar) = progress {
            bar.inc(frame.payload.len() as u64);
        }
        last_pos = frame.pos;
        handshake_dup_losses = 0;
        let ack = Frame::ack(last_pos);
        sock.send(&ack.encode()).await?;
    }
}
