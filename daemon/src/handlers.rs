//! Request dispatch: one NDJSON line in, one response out.
//!
//! Error taxonomy is deliberately small: INVALID_JSON when the line does
//! not parse, UNKNOWN_METHOD for an unrecognized method name, ERROR for
//! everything else (bad params, missing required fields). Store failures
//! never surface here; the service absorbs them.

use std::sync::Arc;
use std::time::Instant;

use serde_json::{json, Map, Value};
use tracing::debug;

use warmchat_core::protocol::{
    parse_since, BundleParams, ErrorCode, MessagesByPhoneParams, Method, RecentParams, Response,
    TextSearchParams, UnreadMessagesParams, PROTOCOL_VERSION,
};
use warmchat_core::apply_output_controls;

use crate::service::QueryService;

/// Default field sets applied by `compact` shaping, per method.
const UNREAD_FIELDS: &[&str] = &["date", "phone", "text", "days_old", "group_id", "group_name"];
const RECENT_FIELDS: &[&str] = &["date", "is_from_me", "phone", "text", "group_id"];
const SEARCH_FIELDS: &[&str] = &["date", "is_from_me", "phone", "text", "match_snippet", "group_id"];
const CONTACT_FIELDS: &[&str] = &["date", "is_from_me", "text", "group_id"];

/// Handle one request line and produce the single response line.
pub fn dispatch(line: &str, service: &Arc<dyn QueryService>) -> Response {
    let started = Instant::now();

    let request: Value = match serde_json::from_str(line) {
        Ok(value) => value,
        Err(e) => {
            return Response::failure(
                Value::Null,
                ErrorCode::InvalidJson,
                e.to_string(),
                elapsed_ms(started),
                PROTOCOL_VERSION,
            );
        }
    };

    let id = request.get("id").cloned().unwrap_or(Value::Null);
    let protocol_v = request
        .get("v")
        .and_then(Value::as_u64)
        .map(|v| v as u32)
        .unwrap_or(PROTOCOL_VERSION);

    match route(&request, service) {
        Ok(result) => Response::success(id, result, elapsed_ms(started), protocol_v),
        Err(RouteError::UnknownMethod(name)) => Response::failure(
            id,
            ErrorCode::UnknownMethod,
            name,
            elapsed_ms(started),
            protocol_v,
        ),
        Err(RouteError::Invalid(message)) => Response::failure(
            id,
            ErrorCode::Error,
            message,
            elapsed_ms(started),
            protocol_v,
        ),
    }
}

enum RouteError {
    UnknownMethod(String),
    Invalid(String),
}

fn route(request: &Value, service: &Arc<dyn QueryService>) -> Result<Value, RouteError> {
    let method_name = request
        .get("method")
        .and_then(Value::as_str)
        .filter(|m| !m.is_empty())
        .ok_or_else(|| RouteError::Invalid("missing method".to_string()))?;

    let method = Method::parse(method_name)
        .ok_or_else(|| RouteError::UnknownMethod(method_name.to_string()))?;

    let params = match request.get("params") {
        None | Some(Value::Null) => json!({}),
        Some(Value::Object(map)) => Value::Object(map.clone()),
        Some(_) => return Err(RouteError::Invalid("params must be an object".to_string())),
    };

    debug!(method = method.name(), "dispatch");

    match method {
        Method::Health => Ok(service.health()),

        Method::UnreadCount => Ok(json!({ "count": service.unread_count() })),

        Method::UnreadMessages => {
            let params: UnreadMessagesParams = parse_params(params)?;
            let rows = service.unread_messages(params.limit);
            let shaped = apply_output_controls(rows, &params.output, UNREAD_FIELDS);
            Ok(json!({ "messages": shaped }))
        }

        Method::Recent => {
            let params: RecentParams = parse_params(params)?;
            let rows = service.recent(params.limit);
            let shaped = apply_output_controls(rows, &params.output, RECENT_FIELDS);
            Ok(json!({ "messages": shaped }))
        }

        Method::TextSearch => {
            let params: TextSearchParams = parse_params(params)?;
            let query = params
                .query
                .as_deref()
                .filter(|q| !q.is_empty())
                .ok_or_else(|| RouteError::Invalid("query is required".to_string()))?;
            let since = match &params.since {
                Some(raw) => Some(parse_since(raw).map_err(RouteError::Invalid)?),
                None => None,
            };
            let rows = service.text_search(query, params.limit, since);
            let shaped = apply_output_controls(rows, &params.output, SEARCH_FIELDS);
            Ok(json!({ "results": shaped }))
        }

        Method::MessagesByPhone => {
            let params: MessagesByPhoneParams = parse_params(params)?;
            let phone = params
                .phone
                .as_deref()
                .filter(|p| !p.is_empty())
                .ok_or_else(|| RouteError::Invalid("phone is required".to_string()))?;
            let rows = service.messages_by_phone(phone, params.limit);
            let shaped = apply_output_controls(rows, &params.output, CONTACT_FIELDS);
            Ok(json!({ "messages": shaped }))
        }

        Method::Bundle => {
            let params: BundleParams = parse_params(params)?;
            Ok(build_bundle(&params, service))
        }
    }
}

fn parse_params<T: serde::de::DeserializeOwned>(params: Value) -> Result<T, RouteError> {
    serde_json::from_value(params).map_err(|e| RouteError::Invalid(e.to_string()))
}

/// Assemble the bundle payload. `include` narrows the sections; `meta` is
/// always present. Search and contact sections only appear when their
/// driving parameter (`query` / `phone`) was given.
fn build_bundle(params: &BundleParams, service: &Arc<dyn QueryService>) -> Value {
    let sections = params.include.as_ref().and_then(|spec| spec.sections());
    let wants = |name: &str| sections.as_ref().map_or(true, |s| s.contains(name));

    let mut payload = Map::new();
    payload.insert(
        "meta".to_string(),
        json!({
            "generated_at": chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string(),
            "query": params.query,
            "limits": {
                "unread_limit": params.unread_limit,
                "recent_limit": params.recent_limit,
                "search_limit": params.search_limit,
                "messages_limit": params.messages_limit,
            },
        }),
    );

    if wants("unread_count") || wants("unread_messages") {
        let mut unread = Map::new();
        if wants("unread_count") {
            unread.insert("count".to_string(), json!(service.unread_count()));
        }
        if wants("unread_messages") {
            let rows = service.unread_messages(params.unread_limit);
            let shaped = apply_output_controls(rows, &params.output, UNREAD_FIELDS);
            unread.insert("messages".to_string(), json!(shaped));
        }
        payload.insert("unread".to_string(), Value::Object(unread));
    }

    if wants("recent") {
        let rows = service.recent(params.recent_limit);
        let shaped = apply_output_controls(rows, &params.output, RECENT_FIELDS);
        payload.insert("recent".to_string(), json!(shaped));
    }

    if let Some(query) = params.query.as_deref().filter(|q| !q.is_empty()) {
        if wants("search") {
            let rows = service.text_search(query, params.search_limit, None);
            let shaped = apply_output_controls(rows, &params.output, SEARCH_FIELDS);
            payload.insert("search".to_string(), json!({ "results": shaped }));
        }
    }

    if let Some(phone) = params.phone.as_deref().filter(|p| !p.is_empty()) {
        if params.messages_limit > 0 && wants("contact_messages") {
            let rows = service.messages_by_phone(phone, params.messages_limit);
            let shaped = apply_output_controls(rows, &params.output, CONTACT_FIELDS);
            payload.insert("contact_messages".to_string(), json!({ "messages": shaped }));
        }
    }

    Value::Object(payload)
}

fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}
