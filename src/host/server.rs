//! Unix-socket front end for a [`SharedHost`].
//!
//! Each connection is served by its own task: read a frame, execute it,
//! write the reply. Execution happens on the blocking pool under the host
//! lock, so a slow remote callable never stalls the reactor and requests
//! from all connections are applied one at a time.

use std::future::Future;
use std::path::Path;
use std::sync::{Arc, PoisonError};

use anyhow::{Context, Result};
use tokio::io::BufReader;
use tokio::net::{UnixListener, UnixStream};

use crate::host::SharedHost;
use crate::ipc::{read_message, write_message};

/// Bind a listener at `path`, replacing a stale socket file.
///
/// Must be called from within a tokio runtime.
pub fn bind(path: &Path) -> Result<UnixListener> {
    if path.exists() {
        std::fs::remove_file(path)
            .with_context(|| format!("Failed to remove stale socket {}", path.display()))?;
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    UnixListener::bind(path).with_context(|| format!("Failed to bind {}", path.display()))
}

/// Accept connections until `shutdown` resolves.
pub async fn serve_until<F>(listener: UnixListener, host: SharedHost, shutdown: F) -> Result<()>
where
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                tracing::info!("Shutting down host server");
                return Ok(());
            }
            accepted = listener.accept() => {
                let (stream, _) = accepted.context("Failed to accept connection")?;
                tracing::debug!("Client connected");
                let host = Arc::clone(&host);
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, host).await {
                        tracing::warn!("Connection ended with error: {:#}", e);
                    }
                });
            }
        }
    }
}

/// Bind `path` and serve until `shutdown` resolves, removing the socket after.
pub async fn serve_path<F>(path: &Path, host: SharedHost, shutdown: F) -> Result<()>
where
    F: Future<Output = ()>,
{
    let listener = bind(path)?;
    tracing::info!("Serving on {}", path.display());
    let result = serve_until(listener, host, shutdown).await;
    if let Err(e) = std::fs::remove_file(path) {
        tracing::debug!("Could not remove socket {}: {}", path.display(), e);
    }
    result
}

async fn handle_connection(stream: UnixStream, host: SharedHost) -> Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    while let Some(body) = read_message(&mut reader).await? {
        let host = Arc::clone(&host);
        let reply = tokio::task::spawn_blocking(move || {
            host.lock()
                .unwrap_or_else(PoisonError::into_inner)
                .handle_bytes(&body)
        })
        .await
        .context("Request handler task failed")?;

        write_message(&mut write_half, &reply).await?;
    }

    tracing::debug!("Client disconnected");
    Ok(())
}
