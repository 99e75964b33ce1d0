//! Socket setup helpers shared by client and server.
//!
//! Grounded on `bind_transfer_socket` in the teacher's `server.rs`: build
//! the socket via `socket2` so buffer sizes can be set before the socket
//! is handed to Tokio, then convert std -> tokio.

use std::net::SocketAddr;

use tokio::net::UdpSocket;

use crate::constants::RECV_BUFFER_SIZE;
use crate::frame::HEADER_SIZE;

/// Receive buffer sized for the header plus the largest payload the engine
/// ever produces during bulk transfer (§4.1: PAYLOAD_SIZE, not MAX_LENGTH).
pub fn new_recv_buffer() -> Vec<u8> {
    vec![0u8; RECV_BUFFER_SIZE]
}

/// Bind a fresh ephemeral UDP socket dedicated to one session, with
/// send/receive buffers generously sized for the header + bulk payload,
/// and `connect()` it to `peer` so `send`/`recv` (rather than `_to`/`_from`)
/// can be used for the remainder of the session.
pub async fn bind_session_socket(peer: SocketAddr) -> std::io::Result<UdpSocket> {
    let domain = if peer.is_ipv6() {
        socket2::Domain::IPV6
    } else {
        socket2::Domain::IPV4
    };
    let raw = socket2::Socket::new(domain, socket2::Type::DGRAM, Some(socket2::Protocol::UDP))?;

    let buf_size = RECV_BUFFER_SIZE * 4;
    let _ = raw.set_send_buffer_size(buf_size);
    let _ = raw.set_recv_buffer_size(buf_size);

    let bind_addr: SocketAddr = if peer.is_ipv6() {
        "[::]:0".parse().unwrap()
    } else {
        "0.0.0.0:0".parse().unwrap()
    };
    raw.bind(&bind_addr.into())?;
    raw.set_nonblocking(true)?;

    let std_sock: std::net::UdpSocket = raw.into();
    let sock = UdpSocket::from_std(std_sock)?;
    sock.connect(peer).await?;
    Ok(sock)
}

const _: () = assert!(HEADER_SIZE == 6);
