use once_cell::sync::Lazy;
use regex::Regex;

static LATIN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[A-Za-z]").expect("latin"));

/// True when `text` has at least one ASCII Latin letter. Strings without one
/// (digits, punctuation, already-translated text) are never judged for echo.
pub fn has_latin_letters(text: &str) -> bool {
    LATIN_RE.is_match(text)
}

/// Shortens `text` to `max_chars` characters for log lines, marking the cut.
/// Newlines are shown as `\n` so each log entry stays on one line.
pub fn clip_for_log(text: &str, max_chars: usize) -> String {
    let flat = text.replace('\n', "\\n");
    if max_chars == 0 || flat.chars().count() <= max_chars {
        return flat;
    }
    let mut out: String = flat.chars().take(max_chars).collect();
    out.push('…');
    out
}
