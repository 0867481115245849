//! NDJSON wire protocol between clients and the daemon.
//!
//! One JSON object per line, one request per connection. The request
//! carries an opaque `id` that is echoed back verbatim; the response
//! carries exactly one of `result`/`error` plus timing metadata.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::shape::OutputControls;

/// Current protocol version, reported in every response `meta`.
pub const PROTOCOL_VERSION: u32 = 1;

/// A request line. `id` is an opaque client token (any JSON value).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    #[serde(default)]
    pub id: Value,
    #[serde(default = "default_version")]
    pub v: u32,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

fn default_version() -> u32 {
    PROTOCOL_VERSION
}

/// A response line. Exactly one of `result`/`error` is non-null.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub id: Value,
    pub ok: bool,
    pub result: Option<Value>,
    pub error: Option<ErrorBody>,
    pub meta: Meta,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: ErrorCode,
    pub message: String,
    pub details: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Meta {
    /// Dispatch time only, in milliseconds; excludes socket/queueing time.
    pub server_ms: f64,
    pub protocol_v: u32,
}

/// Protocol-level error taxonomy. All three are terminal for the
/// connection and always produce exactly one response line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    #[serde(rename = "INVALID_JSON")]
    InvalidJson,
    #[serde(rename = "UNKNOWN_METHOD")]
    UnknownMethod,
    #[serde(rename = "ERROR")]
    Error,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidJson => "INVALID_JSON",
            Self::UnknownMethod => "UNKNOWN_METHOD",
            Self::Error => "ERROR",
        }
    }
}

impl Response {
    pub fn success(id: Value, result: Value, server_ms: f64, protocol_v: u32) -> Self {
        Self {
            id,
            ok: true,
            result: Some(result),
            error: None,
            meta: Meta {
                server_ms,
                protocol_v,
            },
        }
    }

    pub fn failure(
        id: Value,
        code: ErrorCode,
        message: impl Into<String>,
        server_ms: f64,
        protocol_v: u32,
    ) -> Self {
        Self {
            id,
            ok: false,
            result: None,
            error: Some(ErrorBody {
                code,
                message: message.into(),
                details: None,
            }),
            meta: Meta {
                server_ms,
                protocol_v,
            },
        }
    }
}

/// The daemon's method surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Health,
    UnreadCount,
    UnreadMessages,
    Recent,
    TextSearch,
    MessagesByPhone,
    Bundle,
}

impl Method {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "health" => Some(Self::Health),
            "unread_count" => Some(Self::UnreadCount),
            "unread_messages" => Some(Self::UnreadMessages),
            "recent" => Some(Self::Recent),
            "text_search" => Some(Self::TextSearch),
            "messages_by_phone" => Some(Self::MessagesByPhone),
            "bundle" => Some(Self::Bundle),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Health => "health",
            Self::UnreadCount => "unread_count",
            Self::UnreadMessages => "unread_messages",
            Self::Recent => "recent",
            Self::TextSearch => "text_search",
            Self::MessagesByPhone => "messages_by_phone",
            Self::Bundle => "bundle",
        }
    }
}

fn default_limit_20() -> usize {
    20
}

fn default_limit_10() -> usize {
    10
}

#[derive(Debug, Clone, Deserialize)]
pub struct UnreadMessagesParams {
    #[serde(default = "default_limit_20")]
    pub limit: usize,
    #[serde(flatten)]
    pub output: OutputControls,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecentParams {
    #[serde(default = "default_limit_10")]
    pub limit: usize,
    #[serde(flatten)]
    pub output: OutputControls,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TextSearchParams {
    pub query: Option<String>,
    #[serde(default = "default_limit_20")]
    pub limit: usize,
    pub since: Option<String>,
    #[serde(flatten)]
    pub output: OutputControls,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessagesByPhoneParams {
    pub phone: Option<String>,
    #[serde(default = "default_limit_20")]
    pub limit: usize,
    #[serde(flatten)]
    pub output: OutputControls,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BundleParams {
    #[serde(default = "default_limit_20")]
    pub unread_limit: usize,
    #[serde(default = "default_limit_10")]
    pub recent_limit: usize,
    #[serde(default = "default_limit_20")]
    pub search_limit: usize,
    #[serde(default = "default_limit_20")]
    pub messages_limit: usize,
    pub query: Option<String>,
    pub phone: Option<String>,
    #[serde(default)]
    pub include: Option<IncludeSpec>,
    #[serde(flatten)]
    pub output: OutputControls,
}

/// Bundle section selection: comma-separated string or array.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum IncludeSpec {
    Csv(String),
    List(Vec<String>),
}

impl IncludeSpec {
    /// The selected section names, with `meta` always present.
    /// Returns `None` when the selection is empty (= include everything).
    pub fn sections(&self) -> Option<std::collections::BTreeSet<String>> {
        let items: Vec<String> = match self {
            Self::Csv(csv) => csv.split(',').map(str::to_string).collect(),
            Self::List(list) => list.clone(),
        };
        let mut set: std::collections::BTreeSet<String> = items
            .into_iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if set.is_empty() {
            return None;
        }
        set.insert("meta".to_string());
        Some(set)
    }
}

/// Parse a `since` parameter: RFC 3339, a bare `YYYY-MM-DDTHH:MM:SS`,
/// or a bare date (midnight UTC).
pub fn parse_since(value: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f") {
        return Ok(naive.and_utc());
    }
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        if let Some(naive) = date.and_hms_opt(0, 0, 0) {
            return Ok(naive.and_utc());
        }
    }
    Err(format!("invalid since timestamp: {value}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn method_names_round_trip() {
        for method in [
            Method::Health,
            Method::UnreadCount,
            Method::UnreadMessages,
            Method::Recent,
            Method::TextSearch,
            Method::MessagesByPhone,
            Method::Bundle,
        ] {
            assert_eq!(Method::parse(method.name()), Some(method));
        }
        assert_eq!(Method::parse("nope"), None);
    }

    #[test]
    fn request_defaults() {
        let req: Request = serde_json::from_str(r#"{"method":"health"}"#).unwrap();
        assert_eq!(req.v, PROTOCOL_VERSION);
        assert!(req.id.is_null());
        assert!(req.params.is_null());
    }

    #[test]
    fn response_envelope_shape() {
        let resp = Response::success(json!("t1"), json!({"count": 3}), 0.42, 1);
        let wire = serde_json::to_value(&resp).unwrap();
        assert_eq!(wire["id"], "t1");
        assert_eq!(wire["ok"], true);
        assert_eq!(wire["result"]["count"], 3);
        assert_eq!(wire["error"], Value::Null);
        assert_eq!(wire["meta"]["protocol_v"], 1);
    }

    #[test]
    fn error_codes_serialize_screaming() {
        let resp = Response::failure(Value::Null, ErrorCode::InvalidJson, "bad", 0.1, 1);
        let wire = serde_json::to_value(&resp).unwrap();
        assert_eq!(wire["error"]["code"], "INVALID_JSON");
        assert_eq!(wire["result"], Value::Null);
    }

    #[test]
    fn bundle_include_parsing() {
        let spec = IncludeSpec::Csv("unread_count, recent".into());
        let sections = spec.sections().unwrap();
        assert!(sections.contains("meta"));
        assert!(sections.contains("unread_count"));
        assert!(sections.contains("recent"));

        let spec = IncludeSpec::List(vec!["search".into()]);
        assert!(spec.sections().unwrap().contains("search"));

        let spec = IncludeSpec::Csv("  ".into());
        assert!(spec.sections().is_none());
    }

    #[test]
    fn search_params_with_controls() {
        let params: TextSearchParams = serde_json::from_value(json!({
            "query": "dinner",
            "limit": 5,
            "compact": true,
            "fields": "date,text",
        }))
        .unwrap();
        assert_eq!(params.query.as_deref(), Some("dinner"));
        assert_eq!(params.limit, 5);
        assert!(params.output.compact);
        assert_eq!(
            params.output.fields,
            Some(vec!["date".to_string(), "text".to_string()])
        );
    }

    #[test]
    fn since_parsing() {
        assert!(parse_since("2026-01-05T10:00:00Z").is_ok());
        assert!(parse_since("2026-01-05T10:00:00").is_ok());
        assert!(parse_since("2026-01-05").is_ok());
        assert!(parse_since("yesterday-ish").is_err());
    }
}
