//! Wire format for batch requests.
//!
//! A batch travels to the chat model as a JSON object whose keys are positional
//! (`line_0`, `line_1`, ...) and whose values are the source strings with their
//! control characters escaped. The model answers with an object using the same
//! keys. Order is carried by the key index, never by map iteration order.

use serde_json::{Map, Value};

pub const LINE_KEY_PREFIX: &str = "line_";

/// Escapes backslash, newline, tab and double quote so they reach the model as
/// visible two-character sequences.
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 8);
    for ch in text.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '"' => out.push_str("\\\""),
            _ => out.push(ch),
        }
    }
    out
}

/// Inverse of [`escape`]. Single pass, so `\\n` decodes to a backslash followed
/// by `n` rather than a newline. Unknown sequences are kept as-is.
pub fn unescape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('"') => out.push('"'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

pub fn line_key(idx: usize) -> String {
    format!("{LINE_KEY_PREFIX}{idx}")
}

pub fn parse_line_key(key: &str) -> Option<usize> {
    let digits = key.strip_prefix(LINE_KEY_PREFIX)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Renders the request object with keys in positional order, one pair per line.
pub fn encode_payload(texts: &[String]) -> String {
    if texts.is_empty() {
        return "{}".to_string();
    }
    let mut out = String::from("{\n");
    for (idx, text) in texts.iter().enumerate() {
        let key = Value::String(line_key(idx));
        let val = Value::String(escape(text));
        out.push_str(&format!("  {key}: {val}"));
        if idx + 1 < texts.len() {
            out.push(',');
        }
        out.push('\n');
    }
    out.push('}');
    out
}

/// Example of the expected answer shape for the prompt.
pub fn example_response(len: usize) -> String {
    let mut out = String::from("{\n");
    for idx in 0..len.min(2) {
        out.push_str(&format!("  \"{}\": \"...\",\n", line_key(idx)));
    }
    out.push_str("  ...\n}");
    out
}

/// Maps a response object back onto `originals`. Keys that are missing, not
/// strings, or blank fall back to the original text at that position.
pub fn decode_payload(obj: &Map<String, Value>, originals: &[String]) -> Vec<String> {
    originals
        .iter()
        .enumerate()
        .map(|(idx, original)| {
            match obj.get(&line_key(idx)).and_then(Value::as_str) {
                Some(s) if !s.trim().is_empty() => unescape(s),
                _ => original.clone(),
            }
        })
        .collect()
}

/// Count of keys in `obj` that follow the positional format but fall outside
/// `0..expected`.
pub fn stray_keys(obj: &Map<String, Value>, expected: usize) -> usize {
    obj.keys()
        .filter_map(|k| parse_line_key(k))
        .filter(|idx| *idx >= expected)
        .count()
}
