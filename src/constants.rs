//! Protocol constants shared by every engine and by both binaries.
//!
//! Values come straight from `original_source/src/lib/constants.py`; they
//! are not tunable via CLI flags because the spec treats the window size
//! and timeouts as fixed protocol parameters, not congestion-control
//! knobs (§1 Non-goals).

use std::time::Duration;

use crate::frame::HEADER_SIZE;

/// Chunk size read from disk per data frame during bulk transfer.
pub const PAYLOAD_SIZE: usize = 2000;

/// Receive buffer sized for the header plus the largest payload the engine
/// ever produces during bulk transfer (not the wire format's MAX_LENGTH).
pub const RECV_BUFFER_SIZE: usize = HEADER_SIZE + PAYLOAD_SIZE;

/// Consecutive timeouts/NAKs tolerated before a session aborts.
pub const MAX_CONSECUTIVE_LOSTS: u32 = 30;

/// Per-datagram receive timeout during handshake and stop-and-wait transfer.
pub const SOCKET_TIMEOUT: Duration = Duration::from_millis(500);

/// Receive timeout used by the selective-repeat main loop, which blocks
/// on an ACK rather than a response to each individual frame.
pub const SR_TRANSFER_TIMEOUT: Duration = Duration::from_millis(
    SOCKET_TIMEOUT.as_millis() as u64 * MAX_CONSECUTIVE_LOSTS as u64,
);

/// Silence timeout during the post-FIN linger phase.
pub const LINGER_TIMEOUT: Duration = Duration::from_millis(SOCKET_TIMEOUT.as_millis() as u64 * 7);

/// Soft cap on concurrently active server sessions.
pub const MAX_CONNECTIONS: usize = 10;

/// Sliding window size for the selective-repeat engine.
pub const WINDOW_SIZE: usize = 500;

/// Initial sequence number is drawn uniformly from `[0, INITIAL_SEQ_MAX]`.
pub const INITIAL_SEQ_MAX: u32 = 10_000;

/// Streaming block size for the integrity digest (≈500 MiB).
pub const DIGEST_BLOCK_SIZE: usize = 524_288_000;
