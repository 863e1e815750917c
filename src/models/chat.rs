//! Primary translator: one OpenAI-compatible chat-completion call per batch.

use std::cell::Cell;
use std::time::Duration;

use anyhow::Context;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::codec::{decode_payload, encode_payload, example_response, stray_keys};
use crate::pipeline::prompts::{render_template, PromptSet};
use crate::pipeline::trace::TraceWriter;

use super::{truncate_body, TranslateError};

static THINK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<think>.*?</think>").expect("think regex"));

/// Translates an ordered batch of source strings.
///
/// `Ok` always has the same length and order as `texts`; positions the remote
/// side left out carry the original text.
pub trait BatchTranslator {
    fn translate_batch(&self, texts: &[String]) -> Result<Vec<String>, TranslateError>;
}

#[derive(Clone, Debug)]
pub struct ChatSettings {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub timeout: Duration,
    pub temperature: Option<f32>,
    pub json_mode: bool,
    pub target_lang: String,
    pub tone: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    stream: bool,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

pub struct ChatTranslator {
    settings: ChatSettings,
    prompts: PromptSet,
    http: reqwest::blocking::Client,
    trace: TraceWriter,
    calls: Cell<usize>,
}

impl ChatTranslator {
    pub fn new(settings: ChatSettings, prompts: PromptSet, trace: TraceWriter) -> anyhow::Result<Self> {
        let http = reqwest::blocking::Client::builder()
            .timeout(settings.timeout)
            .build()
            .context("build chat http client")?;
        Ok(Self {
            settings,
            prompts,
            http,
            trace,
            calls: Cell::new(0),
        })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/chat/completions",
            self.settings.base_url.trim_end_matches('/')
        )
    }

    /// System and user message for one batch.
    pub fn build_messages(&self, texts: &[String]) -> (String, String) {
        build_messages(&self.prompts, &self.settings, texts)
    }

    fn trace_text(&self, call_id: usize, kind: &str, ext: &str, text: &str) {
        if let Err(err) = self.trace.write_batch_text(call_id, kind, ext, text) {
            tracing::warn!(error = %format!("{err:#}"), "trace write failed");
        }
    }
}

impl BatchTranslator for ChatTranslator {
    fn translate_batch(&self, texts: &[String]) -> Result<Vec<String>, TranslateError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let call_id = self.calls.get() + 1;
        self.calls.set(call_id);

        let (system, user) = self.build_messages(texts);
        let request = ChatRequest {
            model: &self.settings.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: &system,
                },
                ChatMessage {
                    role: "user",
                    content: &user,
                },
            ],
            response_format: self
                .settings
                .json_mode
                .then_some(ResponseFormat { kind: "json_object" }),
            temperature: self.settings.temperature,
            stream: false,
        };
        if self.trace.enabled() {
            if let Ok(body) = serde_json::to_string_pretty(&request) {
                self.trace_text(call_id, "request", "json", &body);
            }
        }

        tracing::debug!(call_id, size = texts.len(), model = %self.settings.model, "chat request");
        let resp = self
            .http
            .post(self.endpoint())
            .bearer_auth(&self.settings.api_key)
            .json(&request)
            .send()?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().unwrap_or_default();
            return Err(TranslateError::Status {
                status: status.as_u16(),
                body: truncate_body(&body),
            });
        }
        let parsed: ChatResponse = resp.json()?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or(TranslateError::EmptyContent)?;
        self.trace_text(call_id, "response", "txt", &content);

        parse_batch_content(&content, texts)
    }
}

pub fn build_messages(prompts: &PromptSet, settings: &ChatSettings, texts: &[String]) -> (String, String) {
    let input_json = encode_payload(texts);
    let example_json = example_response(texts.len());
    let vars = [
        ("target_lang", settings.target_lang.as_str()),
        ("tone", settings.tone.as_str()),
        ("input_json", input_json.as_str()),
        ("example_json", example_json.as_str()),
    ];
    (
        render_template(&prompts.system, &vars),
        render_template(&prompts.user, &vars),
    )
}

/// Parses the model's message content into translations aligned with `originals`.
pub fn parse_batch_content(content: &str, originals: &[String]) -> Result<Vec<String>, TranslateError> {
    let obj = extract_json_object(content)?;
    let stray = stray_keys(&obj, originals.len());
    if stray > 0 {
        tracing::debug!(stray, expected = originals.len(), "response carried extra line keys");
    }
    Ok(decode_payload(&obj, originals))
}

fn extract_json_object(content: &str) -> Result<Map<String, Value>, TranslateError> {
    let cleaned = cleanup_model_text(content);
    if let Ok(v) = serde_json::from_str::<Value>(&cleaned) {
        return match v {
            Value::Object(obj) => Ok(obj),
            _ => Err(TranslateError::NotAnObject),
        };
    }
    let start = cleaned
        .find('{')
        .ok_or_else(|| TranslateError::UnexpectedShape("no json object in content".to_string()))?;
    let mut de = serde_json::Deserializer::from_str(&cleaned[start..]);
    let v = Value::deserialize(&mut de)?;
    match v {
        Value::Object(obj) => Ok(obj),
        _ => Err(TranslateError::NotAnObject),
    }
}

fn cleanup_model_text(text: &str) -> String {
    let stripped = THINK_RE.replace_all(text, "");
    let mut s = stripped.trim().to_string();
    if s.starts_with("```") {
        if let Some(i) = s.find('\n') {
            s = s[i + 1..].to_string();
        }
        if let Some(end) = s.rfind("```") {
            s = s[..end].to_string();
        }
    }
    s.trim().to_string()
}
