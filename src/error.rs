use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde_json::json;
use thiserror::Error;

/// Startup configuration failures. The process exits on any of these.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} is not set")]
    Missing(&'static str),

    #[error("{0} is empty")]
    Empty(&'static str),

    #[error("{key} has an invalid value {value:?}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Failures of the streaming chat-completion call. Any of these ends the turn.
#[derive(Debug, Error)]
pub enum CompletionError {
    #[error("completion request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("completion API returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed completion stream event: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("completion API reported an error: {0}")]
    Remote(String),
}

/// An incoming chat request that cannot be served as sent.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("message must not be empty")]
    EmptyMessage,

    #[error("{field} must be between {min} and {max}, got {value}")]
    OutOfRange {
        field: &'static str,
        min: f64,
        max: f64,
        value: f64,
    },
}

impl ResponseError for RequestError {
    fn status_code(&self) -> StatusCode {
        StatusCode::BAD_REQUEST
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(json!({ "error": self.to_string() }))
    }
}

const MAX_ERROR_BODY_LEN: usize = 200;

/// Cut an error body down to something safe to put in a log line or a chat bubble.
pub fn truncate_body(body: &str) -> String {
    if body.chars().count() > MAX_ERROR_BODY_LEN {
        let head: String = body.chars().take(MAX_ERROR_BODY_LEN).collect();
        format!("{head}…[truncated]")
    } else {
        body.to_string()
    }
}
