//! warmchatd: warm local query daemon for the Messages store.
//!
//! Holds a read-only handle to the Messages database and answers NDJSON
//! requests over a Unix socket. One request per connection; the process
//! stays warm so repeated queries skip cold-start cost.

use std::path::PathBuf;
use std::sync::Arc;

pub mod handlers;
pub mod server;
pub mod service;

pub use service::{QueryService, StoreService};

/// Shared daemon state.
pub struct DaemonState {
    socket_path: PathBuf,
    pid_path: PathBuf,
    service: Arc<dyn QueryService>,
}

impl DaemonState {
    pub fn new(socket_path: PathBuf, pid_path: PathBuf, service: Arc<dyn QueryService>) -> Self {
        Self {
            socket_path,
            pid_path,
            service,
        }
    }

    pub fn socket_path(&self) -> &PathBuf {
        &self.socket_path
    }

    pub fn pid_path(&self) -> &PathBuf {
        &self.pid_path
    }

    pub fn service(&self) -> &Arc<dyn QueryService> {
        &self.service
    }
}
