//! Gettext `.po` catalogs, edited in place.
//!
//! The file is kept as its original lines. Only the `msgstr` block of entries
//! that were assigned a new translation is re-emitted on save; comments,
//! headers, plural forms, obsolete entries and line endings pass through
//! byte-for-byte.

use std::collections::BTreeMap;
use std::ops::Range;
use std::path::Path;

use anyhow::{anyhow, Context};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CatalogEntry {
    pub msgctxt: Option<String>,
    pub msgid: String,
    pub msgid_plural: Option<String>,
    pub msgstr: String,
    pub flags: Vec<String>,
    pub obsolete: bool,
    msgstr_lines: Option<Range<usize>>,
    rewritten: bool,
}

impl CatalogEntry {
    /// Has a source text and no translation yet.
    pub fn is_pending(&self) -> bool {
        !self.obsolete
            && self.msgid_plural.is_none()
            && !self.msgid.is_empty()
            && self.msgstr.is_empty()
            && self.msgstr_lines.is_some()
    }

    pub fn is_fuzzy(&self) -> bool {
        self.flags.iter().any(|f| f == "fuzzy")
    }
}

#[derive(Clone, Debug, Default)]
pub struct Catalog {
    lines: Vec<String>,
    entries: Vec<CatalogEntry>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Field {
    None,
    Ctxt,
    Id,
    IdPlural,
    Str,
    StrN,
}

#[derive(Default)]
struct EntryBuilder {
    entry: CatalogEntry,
    has_msgid: bool,
    has_msgstr: bool,
}

struct Parser {
    entries: Vec<CatalogEntry>,
    cur: EntryBuilder,
    field: Field,
}

impl Parser {
    fn finish(&mut self) {
        let done = std::mem::take(&mut self.cur);
        if done.has_msgid {
            self.entries.push(done.entry);
        }
        self.field = Field::None;
    }

    /// A comment or a new `msgctxt`/`msgid` after a `msgstr` starts the next entry,
    /// even without a separating blank line.
    fn finish_if_complete(&mut self) {
        if self.cur.has_msgstr {
            self.finish();
        }
    }

    fn line(&mut self, idx: usize, raw: &str) {
        let mut text = raw.trim_end_matches(['\n', '\r']).trim();
        if idx == 0 {
            text = text.trim_start_matches('\u{feff}');
        }
        if text.is_empty() {
            self.finish();
            return;
        }

        let mut obsolete = false;
        if let Some(rest) = text.strip_prefix("#~") {
            obsolete = true;
            text = rest.trim_start();
            if text.is_empty() {
                return;
            }
        } else if let Some(rest) = text.strip_prefix("#,") {
            self.finish_if_complete();
            self.cur.entry.flags.extend(
                rest.split(',')
                    .map(str::trim)
                    .filter(|f| !f.is_empty())
                    .map(str::to_string),
            );
            return;
        } else if text.starts_with('#') {
            self.finish_if_complete();
            return;
        }

        if text.starts_with('"') {
            let value = po_unquote(text);
            match self.field {
                Field::Ctxt => {
                    if let Some(c) = self.cur.entry.msgctxt.as_mut() {
                        c.push_str(&value);
                    }
                }
                Field::Id => self.cur.entry.msgid.push_str(&value),
                Field::IdPlural => {
                    if let Some(p) = self.cur.entry.msgid_plural.as_mut() {
                        p.push_str(&value);
                    }
                }
                Field::Str => {
                    self.cur.entry.msgstr.push_str(&value);
                    if let Some(span) = self.cur.entry.msgstr_lines.as_mut() {
                        span.end = idx + 1;
                    }
                }
                Field::StrN | Field::None => {}
            }
            return;
        }

        if let Some(rest) = keyword_arg(text, "msgctxt") {
            self.finish_if_complete();
            self.cur.entry.msgctxt = Some(po_unquote(rest));
            self.field = Field::Ctxt;
        } else if let Some(rest) = keyword_arg(text, "msgid_plural") {
            self.cur.entry.msgid_plural = Some(po_unquote(rest));
            self.field = Field::IdPlural;
        } else if let Some(rest) = keyword_arg(text, "msgid") {
            self.finish_if_complete();
            self.cur.entry.msgid = po_unquote(rest);
            self.cur.has_msgid = true;
            self.field = Field::Id;
        } else if let Some(rest) = keyword_arg(text, "msgstr") {
            self.cur.entry.msgstr = po_unquote(rest);
            self.cur.entry.msgstr_lines = Some(idx..idx + 1);
            self.cur.has_msgstr = true;
            self.field = Field::Str;
        } else if text.starts_with("msgstr[") {
            self.cur.has_msgstr = true;
            self.field = Field::StrN;
        } else {
            return;
        }
        if obsolete {
            self.cur.entry.obsolete = true;
        }
    }
}

fn keyword_arg<'a>(text: &'a str, keyword: &str) -> Option<&'a str> {
    let rest = text.strip_prefix(keyword)?;
    if !rest.starts_with([' ', '\t']) {
        return None;
    }
    Some(rest.trim())
}

impl Catalog {
    pub fn parse(text: &str) -> Self {
        let lines: Vec<String> = text.split_inclusive('\n').map(str::to_string).collect();
        let mut parser = Parser {
            entries: Vec::new(),
            cur: EntryBuilder::default(),
            field: Field::None,
        };
        for (idx, line) in lines.iter().enumerate() {
            parser.line(idx, line);
        }
        parser.finish();
        Self {
            lines,
            entries: parser.entries,
        }
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read catalog: {}", path.display()))?;
        Ok(Self::parse(&text))
    }

    /// Writes through a sibling temp file so an interrupted save leaves the old file intact.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let file_name = path
            .file_name()
            .and_then(|s| s.to_str())
            .ok_or_else(|| anyhow!("invalid catalog path: {}", path.display()))?;
        let tmp = path.with_file_name(format!(".{file_name}.tmp"));
        std::fs::write(&tmp, self.render())
            .with_context(|| format!("write catalog: {}", tmp.display()))?;
        std::fs::rename(&tmp, path)
            .with_context(|| format!("replace catalog: {}", path.display()))?;
        Ok(())
    }

    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    pub fn entry(&self, idx: usize) -> Option<&CatalogEntry> {
        self.entries.get(idx)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn pending_indices(&self) -> Vec<usize> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.is_pending())
            .map(|(i, _)| i)
            .collect()
    }

    pub fn is_modified(&self) -> bool {
        self.entries.iter().any(|e| e.rewritten)
    }

    pub fn set_msgstr(&mut self, idx: usize, value: &str) -> anyhow::Result<()> {
        let entry = self
            .entries
            .get_mut(idx)
            .ok_or_else(|| anyhow!("catalog entry out of range: {idx}"))?;
        if entry.obsolete || entry.msgid_plural.is_some() {
            return Err(anyhow!("entry {idx} has no singular msgstr to write"));
        }
        if entry.msgstr_lines.is_none() {
            return Err(anyhow!("entry {idx} has no msgstr line"));
        }
        entry.msgstr = value.to_string();
        entry.rewritten = true;
        Ok(())
    }

    pub fn render(&self) -> String {
        let mut replacements: BTreeMap<usize, (usize, String)> = BTreeMap::new();
        for entry in self.entries.iter().filter(|e| e.rewritten) {
            if let Some(span) = entry.msgstr_lines.clone() {
                let eol = line_ending(&self.lines[span.start]);
                let last_eol = line_ending(&self.lines[span.end - 1]);
                replacements.insert(
                    span.start,
                    (span.end, format_msgstr(&entry.msgstr, eol, last_eol)),
                );
            }
        }

        let mut out = String::new();
        let mut i = 0usize;
        while i < self.lines.len() {
            if let Some((end, text)) = replacements.get(&i) {
                out.push_str(text);
                i = *end;
                continue;
            }
            out.push_str(&self.lines[i]);
            i += 1;
        }
        out
    }
}

fn line_ending(line: &str) -> &'static str {
    if line.ends_with("\r\n") {
        "\r\n"
    } else if line.ends_with('\n') {
        "\n"
    } else {
        ""
    }
}

/// Single line for plain values; gettext's `msgstr ""` + one quoted line per
/// `\n` for multi-line values.
fn format_msgstr(value: &str, eol: &str, last_eol: &str) -> String {
    let inner_eol = if eol.is_empty() { "\n" } else { eol };
    let breaks = value.matches('\n').count();
    let multiline = breaks > 1 || (breaks == 1 && !value.ends_with('\n'));
    if !multiline {
        return format!("msgstr \"{}\"{last_eol}", po_quote(value));
    }
    let parts: Vec<&str> = value.split_inclusive('\n').collect();
    let mut out = format!("msgstr \"\"{inner_eol}");
    for (i, part) in parts.iter().enumerate() {
        let end = if i + 1 == parts.len() { last_eol } else { inner_eol };
        out.push_str(&format!("\"{}\"{end}", po_quote(part)));
    }
    out
}

pub fn po_quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    for ch in s.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            _ => out.push(ch),
        }
    }
    out
}

/// Strips the surrounding quotes and decodes C escapes in one pass.
pub fn po_unquote(s: &str) -> String {
    let s = s.trim();
    let s = s.strip_prefix('"').unwrap_or(s);
    let s = s.strip_suffix('"').unwrap_or(s);

    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('a') => out.push('\u{07}'),
            Some('b') => out.push('\u{08}'),
            Some('f') => out.push('\u{0c}'),
            Some('v') => out.push('\u{0b}'),
            Some('"') => out.push('"'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}
