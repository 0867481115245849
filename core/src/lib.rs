//! warmchat core - shared types and read-only store access
//!
//! This crate provides:
//! - The NDJSON wire protocol envelope (requests, responses, error codes)
//! - The binary message-body decoder (keyed archive / streamtyped blobs)
//! - Read-only queries over the Messages store
//! - Response shaping (field selection, truncation, compact/minimal)
//! - A synchronous IPC client for daemon communication

pub mod decode;
pub mod error;
pub mod ipc;
pub mod protocol;
pub mod shape;
pub mod store;

pub use decode::decode_message_body;
pub use error::{Error, Result};
pub use ipc::{default_pid_path, default_socket_path, default_store_path, ClientError, DaemonClient};
pub use protocol::{ErrorBody, ErrorCode, Meta, Method, Request, Response, PROTOCOL_VERSION};
pub use shape::{apply_output_controls, OutputControls};
pub use store::{Message, MessageStore, MAX_LIMIT, TEXT_UNAVAILABLE};
