use crate::chat::types::{SamplingParams, MAX_TOKENS_RANGE, TEMPERATURE_RANGE, TOP_P_RANGE};
use crate::error::ConfigError;

pub const DEFAULT_KG_ENDPOINT: &str = "https://okcg-ockg.hypermode.app/graphql";
pub const DEFAULT_INFERENCE_BASE_URL: &str = "https://api-inference.huggingface.co";
pub const DEFAULT_MODEL_ID: &str = "HuggingFaceH4/zephyr-7b-beta";
pub const DEFAULT_SYSTEM_MESSAGE: &str =
    "You are a scientific Chatbot used to traverse an Ovarian Cancer Immunology Knowledge Graph";

/// Values a request falls back to for any generation field it leaves out.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationDefaults {
    pub system_message: String,
    pub sampling: SamplingParams,
}

impl Default for GenerationDefaults {
    fn default() -> Self {
        Self {
            system_message: DEFAULT_SYSTEM_MESSAGE.to_string(),
            sampling: SamplingParams {
                max_tokens: 512,
                temperature: 0.7,
                top_p: 0.95,
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    /// Bearer token for the knowledge-graph service (`API_KEY`).
    pub kg_api_key: String,
    pub kg_endpoint: String,
    pub inference_base_url: String,
    pub model_id: String,
    /// Optional bearer token for the inference API (`HF_TOKEN`).
    pub inference_token: Option<String>,
    pub bind_address: String,
    pub port: u16,
    pub defaults: GenerationDefaults,
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from any key lookup. Unset and empty optional values fall back to defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let kg_api_key = match lookup("API_KEY") {
            None => return Err(ConfigError::Missing("API_KEY")),
            Some(v) if v.trim().is_empty() => return Err(ConfigError::Empty("API_KEY")),
            Some(v) => v,
        };

        let kg_endpoint = http_url("KG_ENDPOINT", get("KG_ENDPOINT"), DEFAULT_KG_ENDPOINT)?;
        let inference_base_url = http_url(
            "INFERENCE_BASE_URL",
            get("INFERENCE_BASE_URL"),
            DEFAULT_INFERENCE_BASE_URL,
        )?;
        let model_id = get("MODEL_ID").unwrap_or_else(|| DEFAULT_MODEL_ID.to_string());
        let inference_token = get("HF_TOKEN");

        let bind_address = get("BIND_ADDRESS").unwrap_or_else(|| "127.0.0.1".to_string());
        let port = parse("PORT", get("PORT"), 8080u16)?;

        let fallback = GenerationDefaults::default();
        let max_tokens = parse("MAX_TOKENS", get("MAX_TOKENS"), fallback.sampling.max_tokens)?;
        let temperature = parse(
            "TEMPERATURE",
            get("TEMPERATURE"),
            fallback.sampling.temperature,
        )?;
        let top_p = parse("TOP_P", get("TOP_P"), fallback.sampling.top_p)?;

        in_range("MAX_TOKENS", max_tokens, MAX_TOKENS_RANGE)?;
        in_range("TEMPERATURE", temperature, TEMPERATURE_RANGE)?;
        in_range("TOP_P", top_p, TOP_P_RANGE)?;

        Ok(Self {
            kg_api_key,
            kg_endpoint,
            inference_base_url,
            model_id,
            inference_token,
            bind_address,
            port,
            defaults: GenerationDefaults {
                system_message: get("SYSTEM_MESSAGE").unwrap_or(fallback.system_message),
                sampling: SamplingParams {
                    max_tokens,
                    temperature,
                    top_p,
                },
            },
        })
    }
}

fn http_url(
    key: &'static str,
    value: Option<String>,
    default: &str,
) -> Result<String, ConfigError> {
    let url = value.unwrap_or_else(|| default.to_string());
    if !url.starts_with("http://") && !url.starts_with("https://") {
        return Err(ConfigError::Invalid {
            key,
            value: url,
            reason: "must start with http:// or https://".to_string(),
        });
    }
    Ok(url)
}

fn parse<T>(key: &'static str, value: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match value {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            key,
            value: raw.clone(),
            reason: e.to_string(),
        }),
    }
}

fn in_range<T>(key: &'static str, value: T, (min, max): (T, T)) -> Result<(), ConfigError>
where
    T: PartialOrd + std::fmt::Display,
{
    if value < min || value > max {
        return Err(ConfigError::Invalid {
            key,
            value: value.to_string(),
            reason: format!("must be between {min} and {max}"),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings(vars: &[(&str, &str)]) -> Result<Settings, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Settings::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn api_key_is_required() {
        assert!(matches!(settings(&[]), Err(ConfigError::Missing("API_KEY"))));
        assert!(matches!(
            settings(&[("API_KEY", "  ")]),
            Err(ConfigError::Empty("API_KEY"))
        ));
    }

    #[test]
    fn defaults_apply_when_only_key_is_set() {
        let s = settings(&[("API_KEY", "secret")]).unwrap();
        assert_eq!(s.kg_api_key, "secret");
        assert_eq!(s.kg_endpoint, DEFAULT_KG_ENDPOINT);
        assert_eq!(s.inference_base_url, DEFAULT_INFERENCE_BASE_URL);
        assert_eq!(s.model_id, DEFAULT_MODEL_ID);
        assert_eq!(s.inference_token, None);
        assert_eq!(s.bind_address, "127.0.0.1");
        assert_eq!(s.port, 8080);
        assert_eq!(s.defaults, GenerationDefaults::default());
    }

    #[test]
    fn overrides_are_read() {
        let s = settings(&[
            ("API_KEY", "secret"),
            ("KG_ENDPOINT", "http://localhost:4000/graphql"),
            ("MODEL_ID", "org/other"),
            ("HF_TOKEN", "hf_abc"),
            ("PORT", "9000"),
            ("MAX_TOKENS", "1024"),
            ("TEMPERATURE", "1.5"),
            ("TOP_P", "0.5"),
            ("SYSTEM_MESSAGE", "Be terse."),
        ])
        .unwrap();
        assert_eq!(s.kg_endpoint, "http://localhost:4000/graphql");
        assert_eq!(s.model_id, "org/other");
        assert_eq!(s.inference_token.as_deref(), Some("hf_abc"));
        assert_eq!(s.port, 9000);
        assert_eq!(s.defaults.system_message, "Be terse.");
        assert_eq!(
            s.defaults.sampling,
            SamplingParams {
                max_tokens: 1024,
                temperature: 1.5,
                top_p: 0.5,
            }
        );
    }

    #[test]
    fn bad_values_are_rejected() {
        let cases = [
            ("KG_ENDPOINT", "ftp://example.org"),
            ("PORT", "eighty"),
            ("MAX_TOKENS", "0"),
            ("MAX_TOKENS", "4096"),
            ("TEMPERATURE", "0.05"),
            ("TOP_P", "1.2"),
        ];
        for (key, value) in cases {
            match settings(&[("API_KEY", "k"), (key, value)]) {
                Err(ConfigError::Invalid { key: k, .. }) => assert_eq!(k, key),
                other => panic!("{key}={value} should be invalid, got {other:?}"),
            }
        }
    }
}
