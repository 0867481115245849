//! Decoder for binary message-body blobs.
//!
//! The Messages store keeps text in two places:
//! - `text` column: plain text (older rows)
//! - `attributedBody` column: binary blob (newer rows)
//!
//! The blob is either a keyed archive (binary property list with an
//! `$objects` reference table) or the older "streamtyped" serialization.
//! Neither format announces itself reliably, so decoding sniffs for both
//! and falls back to a printable-run heuristic. Partial or garbled text is
//! preferred over an empty result for a read-mostly search workload.

use plist::Value;

/// Class/metadata tokens that must never be mistaken for message text.
const METADATA_TOKENS: &[&str] = &[
    "NSString",
    "NSObject",
    "NSMutable",
    "NSDictionary",
    "NSAttributed",
    "streamtyped",
    "__kIM",
    "NSNumber",
    "NSValue",
];

/// Extract plain text from a message-body blob.
///
/// Tries the keyed-archive format first, then the streamtyped format,
/// then a permissive printable-run heuristic. Returns `None` only when
/// nothing plausible can be recovered; never panics on garbage input.
pub fn decode_message_body(blob: &[u8]) -> Option<String> {
    if blob.is_empty() {
        return None;
    }

    if let Some(start) = find(blob, b"bplist") {
        if let Some(text) = decode_keyed_archive(&blob[start..]) {
            return Some(text);
        }
    }

    if let Some(text) = decode_streamtyped(blob) {
        return Some(text);
    }

    decode_printable_runs(blob)
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Keyed-archive format: a binary plist whose `$objects` array holds the
/// serialized object graph. Message text appears either as a bare string
/// entry or inside a small dictionary under `NS.string` / `NS.bytes`.
fn decode_keyed_archive(blob: &[u8]) -> Option<String> {
    let plist: Value = plist::from_bytes(blob).ok()?;
    let dict = plist.as_dictionary()?;

    if let Some(Value::Array(objects)) = dict.get("$objects") {
        for obj in objects {
            match obj {
                Value::String(s) => {
                    // Class names and archiver markers live in the same table.
                    if !s.starts_with("NS") && !s.starts_with('$') && !s.trim().is_empty() {
                        return Some(s.trim().to_string());
                    }
                }
                Value::Dictionary(d) => {
                    if let Some(Value::String(s)) = d.get("NS.string") {
                        if !s.trim().is_empty() {
                            return Some(s.trim().to_string());
                        }
                    }
                    if let Some(Value::Data(bytes)) = d.get("NS.bytes") {
                        if let Ok(s) = std::str::from_utf8(bytes) {
                            if !s.trim().is_empty() {
                                return Some(s.trim().to_string());
                            }
                        }
                    }
                }
                _ => {}
            }
        }
    }

    // Some archives skip the object table; scan top-level values.
    for (_, value) in dict {
        if let Value::String(s) = value {
            if !s.is_empty() && !s.starts_with("NS") {
                return Some(s.clone());
            }
        }
    }

    None
}

/// Streamtyped format: after an `NSString`/`NSMutableString` class token, a
/// short run of control bytes ends with a `+` marker and a length byte,
/// then the text itself, terminated by 0x86/0x84/0x00 or the next class
/// token.
fn decode_streamtyped(blob: &[u8]) -> Option<String> {
    for marker in [&b"NSMutableString"[..], &b"NSString"[..]] {
        let Some(marker_idx) = find(blob, marker) else {
            continue;
        };
        let tail = &blob[marker_idx..];
        let Some(plus_offset) = find(tail, b"+") else {
            continue;
        };
        if plus_offset >= 20 {
            continue;
        }
        // Skip the '+' and the length byte.
        let text_start = marker_idx + plus_offset + 2;
        if text_start >= blob.len() {
            continue;
        }
        let run = take_until_terminator(&blob[text_start..]);
        let text = String::from_utf8_lossy(run);
        let trimmed = text.trim();
        if !trimmed.is_empty() {
            return Some(trimmed.to_string());
        }
    }
    None
}

fn take_until_terminator(bytes: &[u8]) -> &[u8] {
    let mut end = 0;
    while end < bytes.len() {
        let b = bytes[end];
        if b == 0x86 || b == 0x84 || b == 0x00 {
            break;
        }
        // 'i' followed by 'I' or 'N' marks the start of the next class token.
        if b == b'i' && end + 1 < bytes.len() {
            let next = bytes[end + 1];
            if next == b'I' || next == b'N' {
                break;
            }
        }
        end += 1;
    }
    &bytes[..end]
}

/// Last resort: decode lossily and keep the longest printable run that is
/// not an archiver metadata token.
fn decode_printable_runs(blob: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(blob);
    let mut best: Option<String> = None;

    let mut consider = |run: &str| {
        if run.len() < 3 {
            return;
        }
        if METADATA_TOKENS.iter().any(|t| run.contains(t)) {
            return;
        }
        let cleaned = run.trim_matches('+').trim();
        if cleaned.len() >= 2 && best.as_ref().map_or(true, |b| cleaned.len() > b.len()) {
            best = Some(cleaned.to_string());
        }
    };

    let mut current = String::new();
    for ch in text.chars() {
        if ch.is_ascii_graphic() || ch == ' ' {
            current.push(ch);
        } else if !current.is_empty() {
            consider(&current);
            current.clear();
        }
    }
    consider(&current);

    best
}
