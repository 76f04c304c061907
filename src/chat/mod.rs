pub mod transcript;
pub mod types;

use std::pin::Pin;
use std::sync::Arc;

use futures_util::stream::{self, Stream, StreamExt};
use log::{debug, error, warn};

use crate::error::CompletionError;
use crate::kg::{KgResult, KnowledgeGraph};
use crate::model::{CompletionBackend, FragmentStream};
use transcript::build_messages;
use types::{GenerationConfig, Message, Turn};

/// Cumulative response text, one item per received fragment.
///
/// An `Err` item is terminal: nothing follows it.
pub type ResponseStream = Pin<Box<dyn Stream<Item = Result<String, CompletionError>> + Send>>;

pub const KG_ERROR_PREFIX: &str = "An error occurred while querying the knowledge graph: ";

/// Context block handed to the model as an extra system message and shown after the answer.
pub fn format_kg_context(query: &str, result: &str) -> String {
    format!(
        "The following information was retrieved from the knowledge graph:\n\n\
         **Query**:\n{query}\n\n**Result**:\n{result}\n\n"
    )
}

#[derive(Clone)]
pub struct ChatService {
    kg: Arc<dyn KnowledgeGraph>,
    model: Arc<dyn CompletionBackend>,
}

impl ChatService {
    pub fn new(kg: Arc<dyn KnowledgeGraph>, model: Arc<dyn CompletionBackend>) -> Self {
        Self { kg, model }
    }

    /// Lazily answer `message` given the visible `history`.
    ///
    /// Nothing happens until the returned stream is polled. A failed
    /// knowledge-graph lookup yields a single explanatory string and skips
    /// generation. Dropping the stream releases the completion connection.
    pub fn respond(
        &self,
        message: &str,
        history: &[Turn],
        config: GenerationConfig,
    ) -> ResponseStream {
        let messages = build_messages(&config.system_message, history, message);
        let start = Stage::Start {
            kg: Arc::clone(&self.kg),
            model: Arc::clone(&self.model),
            prompt: message.to_string(),
            messages,
            config,
        };

        Box::pin(stream::unfold(start, advance))
    }
}

enum Stage {
    Start {
        kg: Arc<dyn KnowledgeGraph>,
        model: Arc<dyn CompletionBackend>,
        prompt: String,
        messages: Vec<Message>,
        config: GenerationConfig,
    },
    Streaming {
        fragments: FragmentStream,
        response: String,
        kg_context: Option<String>,
    },
    Finished,
}

async fn advance(stage: Stage) -> Option<(Result<String, CompletionError>, Stage)> {
    let mut stage = stage;
    loop {
        stage = match stage {
            Stage::Start {
                kg,
                model,
                prompt,
                mut messages,
                config,
            } => {
                let mut kg_context = None;

                if config.search_kg {
                    match kg.query(&prompt).await {
                        KgResult::Error { error } => {
                            warn!("Skipping generation, knowledge graph lookup failed: {}", error);
                            let answer = format!("{KG_ERROR_PREFIX}{error}");
                            return Some((Ok(answer), Stage::Finished));
                        }
                        KgResult::Found { query, result } => {
                            let context = format_kg_context(&query, &result);
                            messages.push(Message::system(context.clone()));
                            kg_context = Some(context);
                        }
                    }
                }

                debug!("Requesting completion over {} messages", messages.len());
                Stage::Streaming {
                    fragments: model.stream_completion(messages, config.sampling),
                    response: String::new(),
                    kg_context,
                }
            }
            Stage::Streaming {
                mut fragments,
                mut response,
                kg_context,
            } => {
                return match fragments.next().await {
                    Some(Ok(fragment)) => {
                        response.push_str(&fragment);
                        let partial = response.clone();
                        let next = Stage::Streaming {
                            fragments,
                            response,
                            kg_context,
                        };
                        Some((Ok(partial), next))
                    }
                    Some(Err(e)) => {
                        error!(
                            "Completion stream failed after {} chars: {}",
                            response.len(),
                            e
                        );
                        Some((Err(e), Stage::Finished))
                    }
                    None => kg_context.map(|context| {
                        response.push_str(&context);
                        (Ok(response), Stage::Finished)
                    }),
                };
            }
            Stage::Finished => return None,
        };
    }
}
