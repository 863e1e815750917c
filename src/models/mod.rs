pub mod chat;
pub mod mt;

use thiserror::Error;

/// Why a single remote translation call produced nothing usable.
#[derive(Debug, Error)]
pub enum TranslateError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("endpoint returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("response carried no message content")]
    EmptyContent,
    #[error("response is not valid json: {0}")]
    MalformedJson(#[from] serde_json::Error),
    #[error("response json is not an object")]
    NotAnObject,
    #[error("unexpected response shape: {0}")]
    UnexpectedShape(String),
    #[error("translator disabled")]
    Disabled,
}

/// Keeps error bodies short enough for a single log line.
pub(crate) fn truncate_body(body: &str) -> String {
    const MAX: usize = 400;
    if body.chars().count() <= MAX {
        return body.trim().to_string();
    }
    let head: String = body.chars().take(MAX).collect();
    format!("{}…", head.trim_end())
}
