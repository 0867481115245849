//! Query service backing the daemon's method surface.
//!
//! `StoreService` wraps the read-only Messages store. Store failures are
//! absorbed here (logged, empty results returned) so a transient database
//! problem never takes the daemon down; only protocol-level failures reach
//! the client as errors.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tracing::warn;

use warmchat_core::{Message, MessageStore};

/// The daemon's query surface. Implementations must be cheap to call
/// repeatedly; results are plain JSON records ready for shaping.
pub trait QueryService: Send + Sync {
    fn health(&self) -> Value;
    fn unread_count(&self) -> u64;
    fn unread_messages(&self, limit: usize) -> Vec<Value>;
    fn recent(&self, limit: usize) -> Vec<Value>;
    fn text_search(&self, query: &str, limit: usize, since: Option<DateTime<Utc>>) -> Vec<Value>;
    fn messages_by_phone(&self, phone: &str, limit: usize) -> Vec<Value>;
}

/// Production service over the Messages store.
pub struct StoreService {
    store: MessageStore,
    socket_path: PathBuf,
    started_at: DateTime<Utc>,
}

impl StoreService {
    pub fn new(store_path: PathBuf, socket_path: PathBuf) -> Self {
        Self {
            store: MessageStore::new(store_path),
            socket_path,
            started_at: Utc::now(),
        }
    }

    fn to_records(messages: Vec<Message>) -> Vec<Value> {
        messages
            .into_iter()
            .filter_map(|m| serde_json::to_value(m).ok())
            .collect()
    }
}

impl QueryService for StoreService {
    fn health(&self) -> Value {
        // Lightweight read that exercises store access.
        let can_read_store = self.store.unread_count().is_ok();
        json!({
            "pid": std::process::id(),
            "started_at": self.started_at.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string(),
            "version": env!("CARGO_PKG_VERSION"),
            "socket": self.socket_path.display().to_string(),
            "store_path": self.store.path().display().to_string(),
            "can_read_store": can_read_store,
        })
    }

    fn unread_count(&self) -> u64 {
        match self.store.unread_count() {
            Ok(count) => count,
            Err(e) => {
                warn!(error = %e, "unread count failed");
                0
            }
        }
    }

    fn unread_messages(&self, limit: usize) -> Vec<Value> {
        match self.store.unread_messages(limit) {
            Ok(messages) => Self::to_records(messages),
            Err(e) => {
                warn!(error = %e, "unread messages failed");
                Vec::new()
            }
        }
    }

    fn recent(&self, limit: usize) -> Vec<Value> {
        match self.store.recent_conversations(limit) {
            Ok(messages) => Self::to_records(messages),
            Err(e) => {
                warn!(error = %e, "recent conversations failed");
                Vec::new()
            }
        }
    }

    fn text_search(&self, query: &str, limit: usize, since: Option<DateTime<Utc>>) -> Vec<Value> {
        match self.store.text_search(query, limit, since) {
            Ok(messages) => Self::to_records(messages),
            Err(e) => {
                warn!(error = %e, query, "text search failed");
                Vec::new()
            }
        }
    }

    fn messages_by_phone(&self, phone: &str, limit: usize) -> Vec<Value> {
        match self.store.messages_by_handle(phone, limit) {
            Ok(messages) => Self::to_records(messages),
            Err(e) => {
                warn!(error = %e, "messages by phone failed");
                Vec::new()
            }
        }
    }
}
