// One best-effort POST per lookup. Every failure folds into `KgResult::Error`.

use anyhow::anyhow;
use async_trait::async_trait;
use log::{debug, info, warn};
use reqwest::Client;
use serde_json::{json, Value};

pub const NO_QUERY: &str = "No query found";
pub const NO_RESULT: &str = "No result found";

/// Outcome of one knowledge-graph lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KgResult {
    Error { error: String },
    Found { query: String, result: String },
}

/// Answers a natural-language prompt with a generated graph query and its result.
#[async_trait]
pub trait KnowledgeGraph: Send + Sync {
    async fn query(&self, prompt: &str) -> KgResult;
}

pub struct KgClient {
    endpoint: String,
    auth_token: String,
    client: Client,
}

impl KgClient {
    pub fn new(endpoint: impl Into<String>, auth_token: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            auth_token: auth_token.into(),
            client: Client::new(),
        }
    }

    async fn fetch(&self, prompt: &str) -> anyhow::Result<Value> {
        let payload = json!({ "query": build_query(prompt) });

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.auth_token)
            .json(&payload)
            .send()
            .await?
            .error_for_status()?;

        let body = response.text().await?;
        debug!("Raw knowledge graph response: {}", body);

        serde_json::from_str(&body)
            .map_err(|e| anyhow!("knowledge graph response is not valid JSON: {}", e))
    }
}

#[async_trait]
impl KnowledgeGraph for KgClient {
    async fn query(&self, prompt: &str) -> KgResult {
        info!("Querying knowledge graph at {}", self.endpoint);
        match self.fetch(prompt).await {
            Ok(body) => normalize(&body),
            Err(e) => {
                warn!("Knowledge graph request failed: {}", e);
                KgResult::Error {
                    error: e.to_string(),
                }
            }
        }
    }
}

/// GraphQL document asking the service to generate and run a query for `prompt`.
///
/// The prompt is spliced in verbatim; quotes or newlines in it are not escaped.
pub fn build_query(prompt: &str) -> String {
    format!(
        r#"
    query {{
        executeGeneratedQuery(prompt: "{prompt}") {{
            item1
            item2
        }}
    }}
    "#
    )
}

/// Pull `item1`/`item2` out of a GraphQL reply, substituting placeholders for anything missing.
///
/// A reply carrying a top-level `error` key is treated as a failed lookup.
pub fn normalize(body: &Value) -> KgResult {
    if let Some(error) = body.get("error") {
        warn!("Knowledge graph replied with an error: {}", error);
        return KgResult::Error {
            error: render(error),
        };
    }
    if let Some(errors) = body.get("errors") {
        warn!("Knowledge graph reported errors: {}", errors);
    }

    KgResult::Found {
        query: item(body, "item1", NO_QUERY),
        result: item(body, "item2", NO_RESULT),
    }
}

fn item(body: &Value, key: &str, placeholder: &str) -> String {
    match body
        .get("data")
        .and_then(|d| d.get("executeGeneratedQuery"))
        .and_then(|q| q.get(key))
    {
        None | Some(Value::Null) => placeholder.to_string(),
        Some(value) => render(value),
    }
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
