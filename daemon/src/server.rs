//! Unix socket accept loop.
//!
//! One request per connection: read a single line, dispatch, write a
//! single line, close. A connection that sends nothing before EOF or the
//! idle timeout is closed silently with no response. On shutdown the
//! accept loop stops first and in-flight connections are drained, so an
//! accepted request always gets its response line.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::signal::unix::{signal, SignalKind};
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use crate::{handlers, DaemonState};

/// Per-connection read/write timeout.
const SOCKET_TIMEOUT: Duration = Duration::from_secs(10);

/// Run the accept loop until SIGINT or SIGTERM.
pub async fn run(listener: UnixListener, state: Arc<DaemonState>) -> Result<()> {
    let mut sigterm = signal(SignalKind::terminate())?;
    let shutdown = async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("received SIGINT, shutting down"),
            _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
        }
    };
    serve(listener, state, shutdown).await
}

/// Accept connections until `shutdown` resolves, then drain in-flight
/// connections before removing the lifecycle files.
pub async fn serve(
    listener: UnixListener,
    state: Arc<DaemonState>,
    shutdown: impl Future<Output = ()>,
) -> Result<()> {
    info!(socket = %state.socket_path().display(), "listening");
    tokio::pin!(shutdown);

    let mut connections = JoinSet::new();
    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let state = Arc::clone(&state);
                        connections.spawn(async move {
                            if let Err(e) = handle_client(stream, state).await {
                                error!(error = %e, "client error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "accept error");
                    }
                }
            }
            _ = &mut shutdown => {
                break;
            }
        }
    }

    // No new connections past this point; finish the accepted ones.
    drop(listener);
    while let Some(joined) = connections.join_next().await {
        if let Err(e) = joined {
            error!(error = %e, "connection task failed");
        }
    }

    cleanup(&state);
    info!("daemon stopped");
    Ok(())
}

/// Remove the socket and pidfile. Safe to call when they are already gone.
pub fn cleanup(state: &DaemonState) {
    if state.socket_path().exists() {
        let _ = std::fs::remove_file(state.socket_path());
    }
    if state.pid_path().exists() {
        let _ = std::fs::remove_file(state.pid_path());
    }
}

async fn handle_client(mut stream: UnixStream, state: Arc<DaemonState>) -> Result<()> {
    let (reader, mut writer) = stream.split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    let read = tokio::time::timeout(SOCKET_TIMEOUT, reader.read_line(&mut line)).await;
    let bytes = match read {
        Ok(result) => result?,
        Err(_) => {
            debug!("client idle timeout");
            return Ok(());
        }
    };
    if bytes == 0 {
        // EOF before any request.
        return Ok(());
    }

    let service = Arc::clone(state.service());
    let response =
        tokio::task::spawn_blocking(move || handlers::dispatch(&line, &service)).await?;

    let response_json = serde_json::to_string(&response)? + "\n";
    tokio::time::timeout(SOCKET_TIMEOUT, writer.write_all(response_json.as_bytes())).await??;
    writer.flush().await?;

    Ok(())
}
