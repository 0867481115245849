//! Error types for warmchat

use thiserror::Error;

/// Core error type for warmchat operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Messages store not found: {path}")]
    StoreMissing { path: String },
}

/// Result alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
