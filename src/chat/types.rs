use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    #[serde(rename = "user")]
    User,
    #[serde(rename = "assistant")]
    Assistant,
    #[serde(rename = "system")]
    System,
}

/// One role-tagged entry of the completion request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// One exchange of the visible chat history, oldest first.
///
/// Serialized as a two-element array `[user, assistant]`, either side `null`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn(pub Option<String>, pub Option<String>);

impl Turn {
    #[cfg(test)]
    pub fn new(user: impl Into<String>, assistant: impl Into<String>) -> Self {
        Self(Some(user.into()), Some(assistant.into()))
    }

    pub fn user(&self) -> Option<&str> {
        self.0.as_deref()
    }

    pub fn assistant(&self) -> Option<&str> {
        self.1.as_deref()
    }
}

/// Sampling knobs forwarded to the completion API.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingParams {
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
}

/// Per-request generation settings, supplied fresh with every call.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationConfig {
    pub system_message: String,
    pub sampling: SamplingParams,
    pub search_kg: bool,
}

pub const MAX_TOKENS_RANGE: (u32, u32) = (1, 2048);
pub const TEMPERATURE_RANGE: (f32, f32) = (0.1, 4.0);
pub const TOP_P_RANGE: (f32, f32) = (0.1, 1.0);
