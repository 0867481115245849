//! warmchatd entry point.
//!
//! Binds the Unix socket (owner-only permissions), writes the pidfile,
//! and runs the accept loop until SIGINT/SIGTERM. A stale socket left by
//! a crashed instance is removed only after a connect probe confirms
//! nothing is listening on it.

use std::os::unix::fs::PermissionsExt;
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tokio::net::UnixListener;
use tracing::{info, warn};

use warmchat_core::ipc::{default_pid_path, default_socket_path, default_store_path};
use warmchatd::{server, DaemonState, StoreService};

#[derive(Parser, Debug)]
#[command(name = "warmchatd", about = "Warm local query daemon for the Messages store", version)]
struct Args {
    /// Unix socket to listen on
    #[arg(long)]
    socket: Option<PathBuf>,

    /// Pidfile location
    #[arg(long)]
    pidfile: Option<PathBuf>,

    /// Path to the Messages store (chat.db)
    #[arg(long)]
    store: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("warmchatd=info".parse()?),
        )
        .init();

    let args = Args::parse();
    let socket_path = args.socket.unwrap_or_else(default_socket_path);
    let pid_path = args.pidfile.unwrap_or_else(default_pid_path);
    let store_path = args.store.unwrap_or_else(default_store_path);

    info!(version = env!("CARGO_PKG_VERSION"), "starting warmchatd");

    if let Some(dir) = socket_path.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("creating state dir {}", dir.display()))?;
    }

    if socket_path.exists() {
        if UnixStream::connect(&socket_path).is_ok() {
            bail!(
                "another instance is already listening on {}",
                socket_path.display()
            );
        }
        warn!(socket = %socket_path.display(), "removing stale socket");
        std::fs::remove_file(&socket_path)?;
    }

    let listener = UnixListener::bind(&socket_path)
        .with_context(|| format!("binding {}", socket_path.display()))?;

    // Owner-only: message content must not leak to other local users.
    std::fs::set_permissions(&socket_path, std::fs::Permissions::from_mode(0o600))?;

    std::fs::write(&pid_path, format!("{}\n", std::process::id()))
        .with_context(|| format!("writing pidfile {}", pid_path.display()))?;

    let service = Arc::new(StoreService::new(store_path, socket_path.clone()));
    let state = Arc::new(DaemonState::new(socket_path, pid_path, service));

    let result = server::run(listener, Arc::clone(&state)).await;
    server::cleanup(&state);
    result
}
