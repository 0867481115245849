//! Read-only queries over the Messages store.
//!
//! The store is a SQLite file owned by another process. Every query opens
//! a fresh read-only connection; the file tolerates concurrent independent
//! readers, so no serialization between callers is needed.
//!
//! Timestamps in the `date` column are nanosecond offsets from the store's
//! reference instant (2001-01-01T00:00:00Z).

use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, TimeZone, Utc};
use rusqlite::{Connection, OpenFlags};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::decode::decode_message_body;
use crate::error::{Error, Result};

/// Hard ceiling applied to every query limit.
pub const MAX_LIMIT: usize = 500;

/// Sentinel returned when a message body cannot be decoded.
pub const TEXT_UNAVAILABLE: &str = "[message content not available]";

/// A single shaped message row.
///
/// `text` is always decoded plain text or [`TEXT_UNAVAILABLE`], never the
/// raw body blob. `days_old` and `match_snippet` are operation-specific
/// and omitted from serialization when absent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    pub text: String,
    pub date: Option<String>,
    pub is_from_me: bool,
    pub phone: String,
    pub sender_handle: Option<String>,
    pub is_group_chat: bool,
    pub group_id: Option<String>,
    pub group_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub days_old: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_snippet: Option<String>,
}

/// The store's reference instant: 2001-01-01T00:00:00Z.
pub fn store_epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2001, 1, 1, 0, 0, 0).unwrap()
}

/// Convert a store timestamp (nanoseconds since the reference instant)
/// to an absolute instant. Returns `None` on overflow.
pub fn timestamp_from_store(ns: i64) -> Option<DateTime<Utc>> {
    store_epoch().checked_add_signed(Duration::nanoseconds(ns))
}

/// Convert an absolute instant to a store timestamp.
pub fn timestamp_to_store(instant: DateTime<Utc>) -> i64 {
    (instant - store_epoch()).num_nanoseconds().unwrap_or(i64::MAX)
}

/// Best-effort group-chat classification.
///
/// The store has no boolean group flag on message rows; a room identifier
/// of the form `chat` + digits, or one listing multiple comma-separated
/// handles, is treated as a group. Inferred from observed data, not a
/// documented schema invariant.
pub fn is_group_identifier(identifier: Option<&str>) -> bool {
    let Some(id) = identifier else {
        return false;
    };
    if let Some(rest) = id.strip_prefix("chat") {
        if !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_digit()) {
            return true;
        }
    }
    id.contains(',')
}

/// Escape `LIKE` wildcards so user input matches literally.
pub fn escape_like_pattern(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

/// Read-only handle to the Messages store.
pub struct MessageStore {
    path: PathBuf,
}

impl MessageStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open a fresh read-only connection (connections are not shared
    /// across requests).
    fn conn(&self) -> Result<Connection> {
        if !self.path.exists() {
            return Err(Error::StoreMissing {
                path: self.path.display().to_string(),
            });
        }
        let conn = Connection::open_with_flags(
            &self.path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        Ok(conn)
    }

    /// Count unread incoming messages.
    pub fn unread_count(&self) -> Result<u64> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*)
             FROM message m
             WHERE m.is_read = 0
               AND m.is_from_me = 0
               AND m.is_finished = 1
               AND m.is_system_message = 0
               AND m.item_type = 0",
            [],
            |row| row.get(0),
        )?;
        Ok(count.max(0) as u64)
    }

    /// Unread incoming messages, newest first, with chat display names.
    pub fn unread_messages(&self, limit: usize) -> Result<Vec<Message>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT m.ROWID, m.text, m.attributedBody, m.date, h.id,
                    m.cache_roomnames, c.display_name
             FROM message m
             LEFT JOIN handle h ON m.handle_id = h.ROWID
             LEFT JOIN chat_message_join cmj ON m.ROWID = cmj.message_id
             LEFT JOIN chat c ON cmj.chat_id = c.ROWID
             WHERE m.is_read = 0
               AND m.is_from_me = 0
               AND m.is_finished = 1
               AND m.is_system_message = 0
               AND m.item_type = 0
             ORDER BY m.date DESC
             LIMIT ?1",
        )?;

        let now = Utc::now();
        let rows = stmt.query_map([effective_limit(limit) as i64], |row| {
            Ok(RawRow {
                id: row.get(0)?,
                text: row.get(1)?,
                body: row.get(2)?,
                date_ns: row.get(3)?,
                is_from_me: false,
                handle: row.get(4)?,
                room: row.get(5)?,
                display_name: row.get(6)?,
            })
        })?;

        let mut messages = Vec::new();
        for raw in rows {
            let mut msg = shape_row(raw?);
            if let Some(date) = msg_date(&msg) {
                msg.days_old = Some((now - date).num_days());
            } else {
                msg.days_old = Some(0);
            }
            messages.push(msg);
        }
        debug!(count = messages.len(), "unread messages");
        Ok(messages)
    }

    /// Latest messages across all conversations, newest first.
    pub fn recent_conversations(&self, limit: usize) -> Result<Vec<Message>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT m.ROWID, m.text, m.attributedBody, m.date, m.is_from_me,
                    h.id, m.cache_roomnames
             FROM message m
             LEFT JOIN handle h ON m.handle_id = h.ROWID
             ORDER BY m.date DESC
             LIMIT ?1",
        )?;

        let rows = stmt.query_map([effective_limit(limit) as i64], map_plain_row)?;
        let messages = rows
            .collect::<rusqlite::Result<Vec<_>>>()?
            .into_iter()
            .map(shape_row)
            .collect();
        Ok(messages)
    }

    /// Substring search over message text, newest first.
    ///
    /// Rows whose plain-text column is NULL but carry a binary body are
    /// decoded and re-checked, since SQL cannot match inside the blob.
    pub fn text_search(
        &self,
        query: &str,
        limit: usize,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Message>> {
        let conn = self.conn()?;

        let mut sql = String::from(
            "SELECT m.ROWID, m.text, m.attributedBody, m.date, m.is_from_me,
                    h.id, m.cache_roomnames
             FROM message m
             LEFT JOIN handle h ON m.handle_id = h.ROWID
             WHERE (m.text LIKE ?1 ESCAPE '\\'
                    OR (m.text IS NULL AND m.attributedBody IS NOT NULL))",
        );
        let pattern = format!("%{}%", escape_like_pattern(query));
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(pattern)];

        if let Some(since) = since {
            sql.push_str(" AND m.date >= ?2");
            params.push(Box::new(timestamp_to_store(since)));
        }
        sql.push_str(" ORDER BY m.date DESC LIMIT ?");
        params.push(Box::new(effective_limit(limit) as i64));

        let mut stmt = conn.prepare(&sql)?;
        let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();
        let rows = stmt.query_map(param_refs.as_slice(), map_plain_row)?;

        let needle = query.to_lowercase();
        let mut results = Vec::new();
        for raw in rows {
            let raw = raw?;
            let Some(text) = resolve_text(&raw) else {
                // Attachment-only or undecodable body.
                continue;
            };
            if !text.to_lowercase().contains(&needle) {
                continue;
            }
            let mut msg = shape_row(raw);
            msg.text = text.clone();
            msg.match_snippet = Some(create_snippet(&text, query, 50));
            results.push(msg);
        }
        debug!(count = results.len(), query, "text search");
        Ok(results)
    }

    /// Message history with one handle, newest first. Tapback rows are
    /// excluded so reactions don't pad conversation reads.
    pub fn messages_by_handle(&self, handle: &str, limit: usize) -> Result<Vec<Message>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT m.ROWID, m.text, m.attributedBody, m.date, m.is_from_me,
                    h.id, m.cache_roomnames
             FROM message m
             JOIN handle h ON m.handle_id = h.ROWID
             WHERE h.id LIKE ?1 ESCAPE '\\'
               AND (m.associated_message_type IS NULL OR m.associated_message_type = 0)
               AND m.item_type = 0
             ORDER BY m.date DESC
             LIMIT ?2",
        )?;

        let pattern = format!("%{}%", escape_like_pattern(handle));
        let rows = stmt.query_map(
            rusqlite::params![pattern, effective_limit(limit) as i64],
            map_plain_row,
        )?;
        let messages = rows
            .collect::<rusqlite::Result<Vec<_>>>()?
            .into_iter()
            .map(shape_row)
            .collect();
        Ok(messages)
    }
}

struct RawRow {
    id: i64,
    text: Option<String>,
    body: Option<Vec<u8>>,
    date_ns: Option<i64>,
    is_from_me: bool,
    handle: Option<String>,
    room: Option<String>,
    display_name: Option<String>,
}

fn map_plain_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawRow> {
    Ok(RawRow {
        id: row.get(0)?,
        text: row.get(1)?,
        body: row.get(2)?,
        date_ns: row.get(3)?,
        is_from_me: row.get::<_, i64>(4)? != 0,
        handle: row.get(5)?,
        room: row.get(6)?,
        display_name: None,
    })
}

fn effective_limit(limit: usize) -> usize {
    limit.min(MAX_LIMIT)
}

/// Plain-text column wins; otherwise decode the binary body.
fn resolve_text(raw: &RawRow) -> Option<String> {
    match &raw.text {
        Some(t) if !t.is_empty() => Some(t.clone()),
        _ => raw.body.as_deref().and_then(decode_message_body),
    }
}

fn shape_row(raw: RawRow) -> Message {
    let text = resolve_text(&raw).unwrap_or_else(|| TEXT_UNAVAILABLE.to_string());
    let date = raw
        .date_ns
        .and_then(timestamp_from_store)
        .map(|d| d.format("%Y-%m-%dT%H:%M:%S").to_string());
    let is_group = is_group_identifier(raw.room.as_deref());

    Message {
        id: raw.id,
        text,
        date,
        is_from_me: raw.is_from_me,
        phone: raw.handle.clone().unwrap_or_else(|| "unknown".to_string()),
        sender_handle: raw.handle,
        is_group_chat: is_group,
        group_id: if is_group { raw.room } else { None },
        group_name: if is_group { raw.display_name } else { None },
        days_old: None,
        match_snippet: None,
    }
}

fn msg_date(msg: &Message) -> Option<DateTime<Utc>> {
    let date = msg.date.as_deref()?;
    chrono::NaiveDateTime::parse_from_str(date, "%Y-%m-%dT%H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Show the match in context: up to `context` characters either side,
/// ellipsised when truncated. Operates on characters, never raw bytes.
fn create_snippet(text: &str, query: &str, context: usize) -> String {
    let chars: Vec<char> = text.chars().collect();
    let lowered: Vec<char> = chars
        .iter()
        .map(|c| c.to_lowercase().next().unwrap_or(*c))
        .collect();
    let needle: Vec<char> = query
        .chars()
        .map(|c| c.to_lowercase().next().unwrap_or(c))
        .collect();

    if needle.is_empty() || needle.len() > lowered.len() {
        return head_of(&chars, 100);
    }
    let Some(pos) = lowered.windows(needle.len()).position(|w| w == needle) else {
        return head_of(&chars, 100);
    };

    let start = pos.saturating_sub(context);
    let end = (pos + needle.len() + context).min(chars.len());
    let mut snippet: String = chars[start..end].iter().collect();
    if start > 0 {
        snippet = format!("...{snippet}");
    }
    if end < chars.len() {
        snippet.push_str("...");
    }
    snippet
}

fn head_of(chars: &[char], max: usize) -> String {
    if chars.len() <= max {
        chars.iter().collect()
    } else {
        let mut s: String = chars[..max].iter().collect();
        s.push_str("...");
        s
    }
}
