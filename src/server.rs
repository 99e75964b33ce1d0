//! Server entry-point (component C7).
//!
//! A single well-known socket accepts handshakes (`UPLOAD`/`DOWNLOAD`
//! frames); each accepted peer gets a fresh per-session socket and a
//! dedicated task, following the same "negotiate on the well-known port,
//! transfer on an ephemeral one" shape the teacher's TFTP server uses for
//! RRQ/WRQ versus DATA/ACK.
//!
//! The server runs a single ARQ engine for its whole lifetime — the
//! protocol is a deployment choice, not something negotiated per session
//! (mirroring the two separate server programs in the system this was
//! distilled from).

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use tokio::net::UdpSocket;
use tokio::sync::{Semaphore, watch};

use crate::constants::MAX_CONNECTIONS;
use crate::frame::{FILE_NOT_FOUND_ERROR, Frame, Kind};
use crate::registry::ConnectionRegistry;
use crate::session::{self, Protocol};
use crate::{net, selective_repeat, stop_and_wait};

pub struct ServerConfig {
    pub listen_addr: std::net::SocketAddr,
    pub storage_dir: PathBuf,
    pub protocol: Protocol,
}

/// Run the server until `shutdown` is signalled.
pub async fn run(config: ServerConfig, mut shutdown: watch::Receiver<bool>) -> Result<()> {
    let listen_sock = UdpSocket::bind(config.listen_addr)
        .await
        .with_context(|| format!("binding {}", config.listen_addr))?;
    tracing::info!(addr = %config.listen_addr, protocol = %config.protocol, storage_dir = %config.storage_dir.display(), "server listening");

    let registry = Arc::new(ConnectionRegistry::new());
    let storage_dir = Arc::new(config.storage_dir);
    let semaphore = Arc::new(Semaphore::new(MAX_CONNECTIONS));
    let protocol = config.protocol;
    let mut buf = net::new_recv_buffer();

    loop {
        tokio::select! {
            result = listen_sock.recv_from(&mut buf) => {
                let (n, peer) = result?;
                let frame = match Frame::decode(&buf[..n]) {
                    Ok(f) => f,
                    Err(e) => {
                        tracing::debug!(%peer, error = %e, "malformed handshake frame, dropping");
                        continue;
                    }
                };

                if !matches!(frame.kind, Kind::Download | Kind::Upload) {
                    tracing::debug!(%peer, kind = ?frame.kind, "unexpected frame on listen socket");
                    continue;
                }

                if registry.is_open(peer).await {
                    tracing::debug!(%peer, "peer already has an active session, ignoring duplicate handshake");
                    continue;
                }

                let permit = match Arc::clone(&semaphore).try_acquire_owned() {
                    Ok(permit) => permit,
                    Err(_) => {
                        tracing::warn!(%peer, "connection limit reached, rejecting");
                        continue;
                    }
                };

                let registry = Arc::clone(&registry);
                let storage_dir = Arc::clone(&storage_dir);
                tokio::spawn(async move {
                    let _permit = permit;
                    let id = registry.open(peer).await;
                    tracing::info!(%peer, id, kind = ?frame.kind, "session opened");
                    if let Err(e) = handle_session(frame, peer, protocol, &storage_dir).await {
                        tracing::warn!(%peer, id, error = %e, "session ended with error");
                    } else {
                        tracing::info!(%peer, id, "session completed");
                    }
                    registry.close(peer).await;
                });
            }
            _ = shutdown.changed() => {
                tracing::info!("server shutting down");
                break;
            }
        }
    }
    Ok(())
}

async fn handle_session(frame: Frame, peer: std::net::SocketAddr, protocol: Protocol, storage_dir: &Path) -> Result<()> {
    let sock = net::bind_session_socket(peer).await?;
    match frame.kind {
        Kind::Download => handle_download(&sock, &frame, storage_dir, protocol).await,
        Kind::Upload => handle_upload(&sock, &frame, storage_dir, protocol).await,
        other => Err(anyhow!("unreachable handshake kind {other:?}")),
    }
}

async fn handle_download(sock: &UdpSocket, request: &Frame, storage_dir: &Path, protocol: Protocol) -> Result<()> {
    let filename = String::from_utf8_lossy(&request.payload).into_owned();
    let path = match sanitize_path(storage_dir, &filename) {
        Ok(path) => path,
        Err(e) => {
            tracing::debug!(%filename, error = %e, "rejecting download with unsafe filename");
            let reply = Frame::error(0, Some(FILE_NOT_FOUND_ERROR));
            sock.send(&reply.encode()).await?;
            return Err(e);
        }
    };
    let (pos, _file_size) = session::server_download_handshake(sock, &path).await?;

    let mut file = tokio::fs::File::open(&path).await?;
    let last_pos = match protocol {
        Protocol::StopAndWait => stop_and_wait::send_file(sock, &mut file, pos, None).await?,
        Protocol::SelectiveRepeat => selective_repeat::send_file(sock, &mut file, pos, None).await?,
    };

    let digest = crate::digest::digest(&path).await?;
    let fin = Frame::new(Kind::Fin, last_pos.wrapping_add(1), digest.as_bytes().to_vec());
    session::send_fin_and_await_verdict(sock, &fin).await?;
    Ok(())
}

async fn handle_upload(sock: &UdpSocket, request: &Frame, storage_dir: &Path, protocol: Protocol) -> Result<()> {
    let filename = String::from_utf8_lossy(&request.payload).into_owned();
    let path = sanitize_path(storage_dir, &filename)?;
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let first = session::server_upload_handshake(sock, request.pos).await?;
    let mut file = tokio::fs::File::create(&path).await?;

    let received = match protocol {
        Protocol::StopAndWait => stop_and_wait::receive_file_seeded(sock, &mut file, request.pos, Some(first), None).await?,
        Protocol::SelectiveRepeat => selective_repeat::receive_file_seeded(sock, &mut file, request.pos, Some(first), None).await?.into(),
    };
    use tokio::io::AsyncWriteExt;
    file.flush().await?;
    file.sync_all().await?;

    let local_digest = crate::digest::digest(&path).await?;
    let verdict = session::build_verdict(received.fin_pos, local_digest, &received.remote_digest);
    session::linger_and_resend_verdict(sock, &verdict).await;

    if verdict.kind == Kind::Error {
        let _ = tokio::fs::remove_file(&path).await;
        return Err(anyhow!("uploaded file failed integrity check"));
    }
    Ok(())
}

/// Ensure the requested filename stays inside the storage directory.
/// Supports subdirectory paths while rejecting any traversal attempt
/// (`..`) or absolute paths.
pub(crate) fn sanitize_path(dir: &Path, filename: &str) -> Result<PathBuf> {
    let normalized = filename.replace('\\', "/");

    if normalized.starts_with('/') {
        return Err(anyhow!("absolute paths are not allowed"));
    }

    for component in normalized.split('/') {
        if component == ".." {
            return Err(anyhow!("path traversal is not allowed"));
        }
    }

    let clean: PathBuf = normalized.split('/').filter(|c| !c.is_empty() && *c != ".").collect();
    if clean.as_os_str().is_empty() {
        return Err(anyhow!("invalid filename"));
    }

    Ok(dir.join(clean))
}
