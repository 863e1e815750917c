//! Fallback translator: a plain machine-translation endpoint, one string per call.

use std::time::Duration;

use anyhow::Context;
use serde_json::Value;

use crate::textutil::has_latin_letters;

use super::{truncate_body, TranslateError};

pub trait MachineTranslator {
    fn translate_text(&self, text: &str) -> Result<String, TranslateError>;
}

#[derive(Clone, Debug)]
pub struct GoogleWebSettings {
    pub endpoint: String,
    pub source_lang: String,
    pub target_lang: String,
    pub timeout: Duration,
}

/// Client for the keyless `translate_a/single?client=gtx` web endpoint.
pub struct GoogleWebTranslator {
    settings: GoogleWebSettings,
    http: reqwest::blocking::Client,
}

impl GoogleWebTranslator {
    pub fn new(settings: GoogleWebSettings) -> anyhow::Result<Self> {
        let http = reqwest::blocking::Client::builder()
            .timeout(settings.timeout)
            .build()
            .context("build fallback http client")?;
        Ok(Self { settings, http })
    }
}

impl MachineTranslator for GoogleWebTranslator {
    fn translate_text(&self, text: &str) -> Result<String, TranslateError> {
        let resp = self
            .http
            .get(&self.settings.endpoint)
            .query(&[
                ("client", "gtx"),
                ("sl", self.settings.source_lang.as_str()),
                ("tl", self.settings.target_lang.as_str()),
                ("dt", "t"),
                ("q", text),
            ])
            .send()?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().unwrap_or_default();
            return Err(TranslateError::Status {
                status: status.as_u16(),
                body: truncate_body(&body),
            });
        }
        let body: Value = resp.json()?;
        parse_gtx_response(&body)
    }
}

/// Stand-in used when the fallback tier is switched off.
pub struct DisabledTranslator;

impl MachineTranslator for DisabledTranslator {
    fn translate_text(&self, _text: &str) -> Result<String, TranslateError> {
        Err(TranslateError::Disabled)
    }
}

/// The gtx answer is `[[["译文", "source", ...], ["...", "...", ...]], ...]`;
/// the translation is the concatenation of the first field of every sentence.
pub fn parse_gtx_response(body: &Value) -> Result<String, TranslateError> {
    let sentences = body
        .get(0)
        .and_then(Value::as_array)
        .ok_or_else(|| TranslateError::UnexpectedShape("missing sentence list".to_string()))?;
    let mut out = String::new();
    for sentence in sentences {
        if let Some(part) = sentence.get(0).and_then(Value::as_str) {
            out.push_str(part);
        }
    }
    if out.trim().is_empty() {
        return Err(TranslateError::UnexpectedShape("empty translation".to_string()));
    }
    Ok(out)
}

#[derive(Debug)]
pub enum Fallback {
    Translated(String),
    /// Not worth a call: no Latin letters, or a single character.
    Skipped,
    Failed(TranslateError),
}

impl Fallback {
    pub fn text_or(self, original: &str) -> String {
        match self {
            Fallback::Translated(t) => t,
            Fallback::Skipped | Fallback::Failed(_) => original.to_string(),
        }
    }
}

pub fn skips_fallback(text: &str) -> bool {
    !has_latin_letters(text) || text.trim().chars().count() <= 1
}

/// Runs one string through the fallback tier. Never fails; see [`Fallback::text_or`].
pub fn translate_one(mt: &dyn MachineTranslator, text: &str) -> Fallback {
    if skips_fallback(text) {
        return Fallback::Skipped;
    }
    match mt.translate_text(text) {
        Ok(t) if !t.trim().is_empty() => Fallback::Translated(t),
        Ok(_) => Fallback::Failed(TranslateError::EmptyContent),
        Err(err) => Fallback::Failed(err),
    }
}
