//! Output shaping for list-of-message results.
//!
//! Clients (usually LLM tool calls) pay per token, so every list-returning
//! method accepts the same controls: a field subset, a text-length clamp,
//! and compact/minimal presets. Shaping is a pure function over JSON
//! records so identical inputs always produce identical output.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Keys holding free text that the length clamp applies to.
pub const TRUNCATE_KEYS: &[&str] = &[
    "text",
    "match_snippet",
    "last_message",
    "message_preview",
    "conversation_text",
];

/// Field set used by `minimal` regardless of any requested fields.
const MINIMAL_FIELDS: &[&str] = &["date", "phone", "is_from_me", "text"];

/// Default text clamps implied by the presets.
const COMPACT_MAX_CHARS: usize = 200;
const MINIMAL_MAX_CHARS: usize = 120;

/// Per-request output controls, parsed from method params.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutputControls {
    #[serde(default)]
    pub compact: bool,
    #[serde(default)]
    pub minimal: bool,
    #[serde(default, deserialize_with = "deserialize_fields")]
    pub fields: Option<Vec<String>>,
    #[serde(default)]
    pub max_text_chars: Option<usize>,
}

/// `fields` accepts either a JSON array or a comma-separated string.
fn deserialize_fields<'de, D>(deserializer: D) -> Result<Option<Vec<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        List(Vec<String>),
        Csv(String),
    }

    let raw = Option::<Raw>::deserialize(deserializer)?;
    Ok(raw.and_then(|r| {
        let items: Vec<String> = match r {
            Raw::List(list) => list,
            Raw::Csv(csv) => csv.split(',').map(str::to_string).collect(),
        };
        let items: Vec<String> = items
            .into_iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if items.is_empty() {
            None
        } else {
            Some(items)
        }
    }))
}

/// Clamp `value` to at most `max_chars` characters, appending `...` when
/// anything was cut and the budget has room for the marker. Never splits
/// a code point; applying the same clamp twice is a no-op.
pub fn truncate_text(value: &str, max_chars: usize) -> String {
    let count = value.chars().count();
    if count <= max_chars {
        return value.to_string();
    }
    // Budgets too small for the marker get a bare prefix.
    if max_chars <= 3 {
        return value.chars().take(max_chars).collect();
    }
    let mut out: String = value.chars().take(max_chars - 3).collect();
    out.truncate(out.trim_end().len());
    out.push_str("...");
    out
}

/// Shape a list of records: select fields, clamp text, drop empty values.
///
/// - No `fields` and not `compact`: all fields pass through.
/// - `compact`: `default_fields` selection plus empty/falsy removal, with
///   a 200-char text clamp unless one was given.
/// - `minimal`: the fixed minimal subset (plus `match_snippet` when the
///   defaults carry it), 120-char clamp unless one was given.
pub fn apply_output_controls(
    rows: Vec<Value>,
    controls: &OutputControls,
    default_fields: &[&str],
) -> Vec<Value> {
    let max_text_chars = controls.max_text_chars.or(if controls.compact {
        Some(COMPACT_MAX_CHARS)
    } else if controls.minimal {
        Some(MINIMAL_MAX_CHARS)
    } else {
        None
    });

    let effective: Option<Vec<String>> = if controls.minimal {
        let mut base: Vec<String> = MINIMAL_FIELDS.iter().map(|s| s.to_string()).collect();
        if default_fields.contains(&"match_snippet") {
            base.push("match_snippet".to_string());
        }
        Some(base)
    } else if let Some(fields) = &controls.fields {
        Some(fields.clone())
    } else if controls.compact {
        Some(default_fields.iter().map(|s| s.to_string()).collect())
    } else {
        None
    };

    rows.into_iter()
        .map(|row| match row {
            Value::Object(map) => Value::Object(shape_record(
                map,
                effective.as_deref(),
                max_text_chars,
                controls.compact,
            )),
            other => other,
        })
        .collect()
}

fn shape_record(
    record: Map<String, Value>,
    fields: Option<&[String]>,
    max_text_chars: Option<usize>,
    compact: bool,
) -> Map<String, Value> {
    let mut out = match fields {
        Some(keys) => {
            let mut selected = Map::new();
            for key in keys {
                if let Some(value) = record.get(key) {
                    selected.insert(key.clone(), value.clone());
                }
            }
            selected
        }
        None => record,
    };

    if let Some(max) = max_text_chars {
        for key in TRUNCATE_KEYS {
            if let Some(Value::String(s)) = out.get(*key) {
                let truncated = truncate_text(s, max);
                out.insert((*key).to_string(), Value::String(truncated));
            }
        }
    }

    if compact {
        out.retain(|_, v| !is_falsy(v));
    }

    out
}

fn is_falsy(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::String(s) => s.is_empty(),
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
    }
}
