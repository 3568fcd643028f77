//! Reduction of webhook response bodies to a single [`ParsedResponse`].
//!
//! Upstream workflows frame their output inconsistently: a single object, a
//! JSON array, objects concatenated without separators, newline-delimited
//! objects, SSE `data:` lines, or plain text. Everything here is tolerant;
//! only a body that looks like JSON but yields no object at all is an error.

use serde_json::Value;
use wland_core::{DEFAULT_REDIRECT_DELAY_MS, ParsedResponse};
use wland_errors::ChatError;

/// Text fields searched, in priority order, on every fragment.
pub const TEXT_ALIASES: [&str; 5] = ["content", "text", "output", "message", "response"];

const CONTROL_TYPES: [&str; 3] = ["begin", "end", "metadata"];
const CONTENT_TYPES: [&str; 3] = ["message", "chunk", "text"];

/// Strict single-object parse. Anything without a string `message` field is
/// displayed verbatim.
pub fn parse_response(raw: &str) -> ParsedResponse {
    let Ok(value) = serde_json::from_str::<Value>(raw) else {
        return ParsedResponse::plain(raw);
    };
    let Some(message) = value.get("message").and_then(Value::as_str) else {
        return ParsedResponse::plain(raw);
    };
    let mut parsed = ParsedResponse::plain(message);
    parsed.is_structured = true;
    apply_directives(&mut parsed, &value);
    parsed
}

/// Tolerant multi-object path used for buffered bodies.
pub fn extract_reply(raw: &str) -> Result<ParsedResponse, ChatError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ChatError::Format("empty response body".to_string()));
    }

    let fragments = match serde_json::from_str::<Value>(trimmed) {
        Ok(Value::Object(map)) => vec![Value::Object(map)],
        Ok(Value::Array(items)) => items.into_iter().filter(Value::is_object).collect(),
        Ok(Value::String(text)) => return Ok(ParsedResponse::plain(text)),
        Ok(_) => return Ok(ParsedResponse::plain(raw)),
        Err(_) => split_json_objects(trimmed),
    };

    if fragments.is_empty() {
        if trimmed.starts_with('{') || trimmed.starts_with('[') {
            return Err(ChatError::Format(
                "no JSON object could be parsed from the response".to_string(),
            ));
        }
        return Ok(ParsedResponse::plain(raw));
    }

    Ok(merge_fragments(&fragments))
}

/// Concatenates the text of every fragment that has one; directives come
/// from the last fragment only.
pub fn merge_fragments(fragments: &[Value]) -> ParsedResponse {
    let mut text = String::new();
    let mut found_text = false;
    for fragment in fragments {
        if let Some(piece) = extract_text(fragment) {
            text.push_str(&piece);
            found_text = true;
        }
    }

    let message = if found_text {
        text
    } else {
        fragments
            .last()
            .map(Value::to_string)
            .unwrap_or_default()
    };

    let mut parsed = ParsedResponse::plain(message);
    parsed.is_structured = true;
    if let Some(last) = fragments.last() {
        apply_directives(&mut parsed, last);
    }
    parsed
}

/// First non-empty text payload found through the alias list.
pub fn extract_text(value: &Value) -> Option<String> {
    for alias in TEXT_ALIASES {
        if let Some(text) = value.get(alias).and_then(Value::as_str)
            && !text.is_empty()
        {
            return Some(text.to_string());
        }
    }
    match value.get("data") {
        Some(Value::String(text)) if !text.is_empty() => Some(text.clone()),
        Some(data @ Value::Object(_)) => ["text", "content"].iter().find_map(|key| {
            data.get(*key)
                .and_then(Value::as_str)
                .filter(|text| !text.is_empty())
                .map(ToString::to_string)
        }),
        _ => None,
    }
}

pub fn has_directive_fields(value: &Value) -> bool {
    let non_empty = |key: &str| {
        value
            .get(key)
            .and_then(Value::as_str)
            .is_some_and(|s| !s.trim().is_empty())
    };
    non_empty("redirect") || non_empty("action")
}

/// Copies `redirect`/`delay`/`action`/`data` onto `parsed`, shallowly.
pub fn apply_directives(parsed: &mut ParsedResponse, value: &Value) {
    if let Some(url) = value
        .get("redirect")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|url| !url.is_empty())
    {
        parsed.has_redirect = true;
        parsed.redirect_url = Some(url.to_string());
        parsed.redirect_delay_ms = value
            .get("delay")
            .and_then(parse_delay)
            .unwrap_or(DEFAULT_REDIRECT_DELAY_MS);
    }
    if let Some(action) = value
        .get("action")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|action| !action.is_empty())
    {
        parsed.has_action = true;
        parsed.action_type = Some(action.to_string());
        parsed.action_data = value.get("data").filter(|data| !data.is_null()).cloned();
    }
}

fn parse_delay(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64)),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    }
}

/// Extracts every brace-balanced `{...}` span and keeps those that parse.
///
/// Braces inside JSON strings do not count towards the depth.
pub fn split_json_objects(raw: &str) -> Vec<Value> {
    let mut objects = Vec::new();
    let mut depth: usize = 0;
    let mut start: Option<usize> = None;
    let mut in_string = false;
    let mut escaped = false;

    for (idx, ch) in raw.char_indices() {
        if depth > 0 && in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' if depth > 0 => in_string = true,
            '{' => {
                if depth == 0 {
                    start = Some(idx);
                }
                depth += 1;
            }
            '}' if depth > 0 => {
                depth -= 1;
                if depth == 0
                    && let Some(begin) = start.take()
                    && let Ok(value) = serde_json::from_str::<Value>(&raw[begin..=idx])
                {
                    objects.push(value);
                }
            }
            _ => {}
        }
    }
    objects
}

/// Classification of one line of a streamed body.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamLine {
    /// Blank line.
    Empty,
    /// Not valid JSON; dropped without carry-over.
    Unparsed,
    /// `begin` / `end` / `metadata`, or an SSE `[DONE]` marker.
    Control(Value),
    Content { text: String, value: Value },
    /// Valid JSON without displayable text.
    Other(Value),
}

pub fn decode_stream_line(line: &str) -> StreamLine {
    let mut trimmed = line.trim();
    if let Some(rest) = trimmed.strip_prefix("data:") {
        trimmed = rest.trim();
    }
    if trimmed.is_empty() {
        return StreamLine::Empty;
    }
    if trimmed == "[DONE]" {
        return StreamLine::Control(Value::Null);
    }
    let Ok(value) = serde_json::from_str::<Value>(trimmed) else {
        return StreamLine::Unparsed;
    };
    if !value.is_object() {
        return StreamLine::Other(value);
    }

    let kind = value.get("type").and_then(Value::as_str);
    if let Some(kind) = kind {
        if CONTROL_TYPES.contains(&kind) {
            return StreamLine::Control(value);
        }
        if !CONTENT_TYPES.contains(&kind) {
            return StreamLine::Other(value);
        }
    }
    match extract_text(&value) {
        Some(text) => StreamLine::Content { text, value },
        None => StreamLine::Other(value),
    }
}
