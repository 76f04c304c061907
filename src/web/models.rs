use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::chat::types::{
    GenerationConfig, SamplingParams, Turn, MAX_TOKENS_RANGE, TEMPERATURE_RANGE, TOP_P_RANGE,
};
use crate::config::GenerationDefaults;
use crate::error::RequestError;

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub history: Vec<Turn>,
    pub system_message: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    #[serde(default)]
    pub search_kg: bool,
    #[serde(default = "default_stream")]
    pub stream: bool,
}

fn default_stream() -> bool {
    true
}

impl ChatRequest {
    /// Fill unset fields from `defaults` and check every knob is in range.
    pub fn generation_config(
        &self,
        defaults: &GenerationDefaults,
    ) -> Result<GenerationConfig, RequestError> {
        if self.message.trim().is_empty() {
            return Err(RequestError::EmptyMessage);
        }

        let max_tokens = self.max_tokens.unwrap_or(defaults.sampling.max_tokens);
        let temperature = self.temperature.unwrap_or(defaults.sampling.temperature);
        let top_p = self.top_p.unwrap_or(defaults.sampling.top_p);

        let (min, max) = MAX_TOKENS_RANGE;
        check("max_tokens", max_tokens as f64, min as f64, max as f64)?;
        let (min, max) = TEMPERATURE_RANGE;
        check("temperature", temperature as f64, min as f64, max as f64)?;
        let (min, max) = TOP_P_RANGE;
        check("top_p", top_p as f64, min as f64, max as f64)?;

        Ok(GenerationConfig {
            system_message: self
                .system_message
                .clone()
                .unwrap_or_else(|| defaults.system_message.clone()),
            sampling: SamplingParams {
                max_tokens,
                temperature,
                top_p,
            },
            search_kg: self.search_kg,
        })
    }
}

// Both sides are widened from f32, so compare and report them rounded.
fn check(field: &'static str, value: f64, min: f64, max: f64) -> Result<(), RequestError> {
    if value.is_nan() || value < min || value > max {
        return Err(RequestError::OutOfRange {
            field,
            min: round(min),
            max: round(max),
            value: round(value),
        });
    }
    Ok(())
}

fn round(v: f64) -> f64 {
    (v * 1e6).round() / 1e6
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatResponse {
    pub response: String,
    pub request_id: Uuid,
}
