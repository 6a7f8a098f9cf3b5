//! Defensive cleanup and validation of user-supplied string fields.
//!
//! Nothing in here fails: invalid input is coerced to an empty string or `false`.

use regex::Regex;
use serde_json::{Map, Value};
use std::sync::LazyLock;

/// Maximum length of a sanitized string, in characters
pub const MAX_STRING_CHARS: usize = 10_000;

/// Maximum length of an email address
pub const MAX_EMAIL_LEN: usize = 254;

static SCRIPT_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<script\b[^>]*>.*?</script\s*>").expect("script block pattern")
});

static TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>").expect("tag pattern"));

static JAVASCRIPT_SCHEME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)javascript\s*:").expect("javascript scheme pattern"));

static EVENT_HANDLER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bon\w+\s*=").expect("event handler pattern"));

static EMAIL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email pattern"));

static UUID_V4: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^[0-9a-f]{8}-[0-9a-f]{4}-4[0-9a-f]{3}-[89ab][0-9a-f]{3}-[0-9a-f]{12}$")
        .expect("uuid v4 pattern")
});

/// Strip markup and script vectors, trim, and cap the length.
///
/// Passes repeat until nothing more is removed, so fragments that join into
/// a new match once the inner one is gone are stripped too.
pub fn sanitize_string(input: &str) -> String {
    let mut cleaned = strip_pass(input);
    // Every pass only deletes, so this terminates
    loop {
        let next = strip_pass(&cleaned);
        if next == cleaned {
            break;
        }
        cleaned = next;
    }

    cleaned.trim().chars().take(MAX_STRING_CHARS).collect()
}

fn strip_pass(input: &str) -> String {
    let cleaned = SCRIPT_BLOCK.replace_all(input, "");
    let cleaned = TAG.replace_all(&cleaned, "");
    let cleaned = JAVASCRIPT_SCHEME.replace_all(&cleaned, "");
    EVENT_HANDLER.replace_all(&cleaned, "").into_owned()
}

/// Sanitize a JSON field; non-string values become the empty string
pub fn sanitize_value(value: &Value) -> String {
    match value {
        Value::String(s) => sanitize_string(s),
        _ => String::new(),
    }
}

/// Conservative `local@domain.tld` check
pub fn is_valid_email(input: &str) -> bool {
    input.len() <= MAX_EMAIL_LEN && EMAIL.is_match(input)
}

pub fn is_valid_email_value(value: &Value) -> bool {
    value.as_str().is_some_and(is_valid_email)
}

/// Hyphenated version-4 UUID layout
pub fn is_valid_uuid(input: &str) -> bool {
    UUID_V4.is_match(input)
}

pub fn is_valid_uuid_value(value: &Value) -> bool {
    value.as_str().is_some_and(is_valid_uuid)
}

/// Shallow copy with every string value sanitized; other values pass through unchanged
pub fn sanitize_object(fields: &Map<String, Value>) -> Map<String, Value> {
    fields
        .iter()
        .map(|(key, value)| {
            let value = match value {
                Value::String(s) => Value::String(sanitize_string(s)),
                other => other.clone(),
            };
            (key.clone(), value)
        })
        .collect()
}
