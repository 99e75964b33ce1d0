//! Client driver (component C8): handshake, disk-space preflight, engine
//! dispatch, progress reporting, and interrupt handling for both transfer
//! directions.

use std::net::SocketAddr;
use std::path::Path;

use indicatif::{ProgressBar, ProgressStyle};
use tokio::net::UdpSocket;

use crate::error::{ProtocolError, Result};
use crate::frame::{Frame, Kind};
use crate::session::{self, Protocol};
use crate::{digest, selective_repeat, stop_and_wait};

fn progress_bar(total: u64, quiet: bool) -> ProgressBar {
    if quiet {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new(total);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})")
    {
        bar.set_style(style.progress_chars("=>-"));
    }
    bar
}

/// Retrieve `filename` from the server at `server_addr` into `destination_dir`.
pub async fn download(
    server_addr: SocketAddr,
    filename: &str,
    destination_dir: &Path,
    protocol: Protocol,
    quiet: bool,
) -> Result<()> {
    tokio::fs::create_dir_all(destination_dir).await?;
    let main_sock = UdpSocket::bind("0.0.0.0:0").await?;

    let (peer, pos, file_size) = session::client_download_handshake(&main_sock, server_addr, filename).await?;
    main_sock.connect(peer).await?;

    let available = fs4::available_space(destination_dir)?;
    if available < file_size {
        let _ = main_sock.send(&Frame::error(0, None).encode()).await;
        return Err(ProtocolError::InsufficientSpace);
    }

    let dest_path = destination_dir.join(filename);
    let mut file = tokio::fs::File::create(&dest_path).await?;
    let bar = progress_bar(file_size, quiet);

    let transfer = async {
        match protocol {
            Protocol::StopAndWait => stop_and_wait::receive_file_seeded(&main_sock, &mut file, pos, None, Some(&bar)).await,
            Protocol::SelectiveRepeat => selective_repeat::receive_file_seeded(&main_sock, &mut file, pos, None, Some(&bar)).await.map(Into::into),
        }
    };

    let received = tokio::select! {
        result = transfer => result,
        _ = tokio::signal::ctrl_c() => {
            bar.finish_and_clear();
            let _ = tokio::fs::remove_file(&dest_path).await;
            return Err(ProtocolError::UserInterrupt);
        }
    };

    let received = match received {
        Ok(r) => r,
        Err(e) => {
            bar.finish_and_clear();
            let _ = tokio::fs::remove_file(&dest_path).await;
            return Err(e);
        }
    };

    let local_digest = digest::digest(&dest_path).await?;
    let verdict = session::build_verdict(received.fin_pos, local_digest, &received.remote_digest);
    session::linger_and_resend_verdict(&main_sock, &verdict).await;
    bar.finish_and_clear();

    if verdict.kind == Kind::Error {
        let _ = tokio::fs::remove_file(&dest_path).await;
        return Err(ProtocolError::InvalidHash);
    }
    Ok(())
}

/// Push `source_path` to the server at `server_addr` under `filename`.
pub async fn upload(
    server_addr: SocketAddr,
    filename: &str,
    source_path: &Path,
    protocol: Protocol,
    quiet: bool,
) -> Result<()> {
    if tokio::fs::metadata(source_path).await.is_err() {
        return Err(ProtocolError::FileNotFound);
    }
    let file_size = tokio::fs::metadata(source_path).await?.len();

    let main_sock = UdpSocket::bind("0.0.0.0:0").await?;
    let (peer, pos) = session::client_upload_handshake(&main_sock, server_addr, filename).await?;
    main_sock.connect(peer).await?;

    let mut file = tokio::fs::File::open(source_path).await?;
    let bar = progress_bar(file_size, quiet);

    let transfer = async {
        match protocol {
            Protocol::StopAndWait => stop_and_wait::send_file(&main_sock, &mut file, pos, Some(&bar)).await,
            Protocol::SelectiveRepeat => selective_repeat::send_file(&main_sock, &mut file, pos, Some(&bar)).await,
        }
    };

    let last_pos = tokio::select! {
        result = transfer => result,
        _ = tokio::signal::ctrl_c() => {
            bar.finish_and_clear();
            let interrupt = Frame::error(pos, None);
            let _ = main_sock.send(&interrupt.encode()).await;
            return Err(ProtocolError::UserInterrupt);
        }
    };

    let last_pos = match last_pos {
        Ok(p) => p,
        Err(e) => {
            bar.finish_and_clear();
            return Err(e);
        }
    };

    let local_digest = digest::digest(source_path).await?;
    let fin = Frame::new(Kind::Fin, last_pos.wrapping_add(1), local_digest.as_bytes().to_vec());
    let result = session::send_fin_and_await_verdict(&main_sock, &fin).await;
    bar.finish_and_clear();
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quiet_progress_bar_is_hidden() {
        assert!(progress_bar(100, true).is_hidden());
    }

    #[test]
    fn verbose_progress_bar_is_not_hidden() {
        assert!(!progress_bar(100, false).is_hidden());
    }
}
