//! IPC client for talking to the warmchat daemon.
//!
//! Synchronous, one request per connection: connect, write one JSON line,
//! read one JSON line, close. The CLI uses this directly; the connect
//! probe doubles as the daemon liveness check.

use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::time::Duration;

use serde_json::{json, Value};
use thiserror::Error;

use crate::protocol::{Request, Response, PROTOCOL_VERSION};

/// State directory holding the socket, pidfile, and logs.
pub fn default_state_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join(".warmchat")
}

/// Default socket path.
pub fn default_socket_path() -> PathBuf {
    default_state_dir().join("daemon.sock")
}

/// Default pidfile path.
pub fn default_pid_path() -> PathBuf {
    default_state_dir().join("daemon.pid")
}

/// Default location of the Messages store.
pub fn default_store_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("Library")
        .join("Messages")
        .join("chat.db")
}

/// Error type for IPC operations.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Socket missing or connection refused.
    #[error("daemon not running")]
    DaemonNotRunning,
    #[error("connection failed: {0}")]
    ConnectionFailed(std::io::Error),
    #[error("send failed: {0}")]
    SendFailed(std::io::Error),
    #[error("receive failed: {0}")]
    ReceiveFailed(std::io::Error),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// Client for one-shot request/response exchanges with the daemon.
pub struct DaemonClient {
    socket_path: PathBuf,
    timeout: Duration,
}

impl Default for DaemonClient {
    fn default() -> Self {
        Self::new()
    }
}

impl DaemonClient {
    pub fn new() -> Self {
        Self {
            socket_path: default_socket_path(),
            timeout: Duration::from_secs(5),
        }
    }

    pub fn with_socket_path(socket_path: PathBuf) -> Self {
        Self {
            socket_path,
            timeout: Duration::from_secs(5),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Liveness probe: the daemon is alive if the socket accepts a
    /// connection. A stale socket file alone does not count.
    pub fn daemon_available(&self) -> bool {
        self.socket_path.exists() && UnixStream::connect(&self.socket_path).is_ok()
    }

    /// Send one request and wait for the response line.
    pub fn call(&self, method: &str, params: Value) -> Result<Response, ClientError> {
        let request = Request {
            id: json!(format!("cli-{}", std::process::id())),
            v: PROTOCOL_VERSION,
            method: method.to_string(),
            params,
        };
        self.send(&request)
    }

    pub fn send(&self, request: &Request) -> Result<Response, ClientError> {
        if !self.socket_path.exists() {
            return Err(ClientError::DaemonNotRunning);
        }

        let mut stream = UnixStream::connect(&self.socket_path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::ConnectionRefused
                || e.kind() == std::io::ErrorKind::NotFound
            {
                ClientError::DaemonNotRunning
            } else {
                ClientError::ConnectionFailed(e)
            }
        })?;

        stream.set_read_timeout(Some(self.timeout)).ok();
        stream.set_write_timeout(Some(self.timeout)).ok();

        let line = serde_json::to_string(request).map_err(|e| {
            ClientError::SendFailed(std::io::Error::new(std::io::ErrorKind::InvalidData, e))
        })?;
        writeln!(stream, "{}", line).map_err(ClientError::SendFailed)?;
        stream.flush().map_err(ClientError::SendFailed)?;

        let mut reader = BufReader::new(stream);
        let mut response_line = String::new();
        reader
            .read_line(&mut response_line)
            .map_err(ClientError::ReceiveFailed)?;
        if response_line.trim().is_empty() {
            return Err(ClientError::InvalidResponse(
                "connection closed without a response".into(),
            ));
        }

        serde_json::from_str(&response_line)
            .map_err(|e| ClientError::InvalidResponse(e.to_string()))
    }
}
