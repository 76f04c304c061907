use std::collections::VecDeque;
use std::pin::Pin;

use futures_util::stream::{self, Stream, StreamExt, TryStreamExt};
use log::{debug, error, info};
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};

use crate::chat::types::{Message, SamplingParams};
use crate::error::{truncate_body, CompletionError};

/// Forward-only sequence of generated text fragments, in arrival order.
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String, CompletionError>> + Send>>;

/// A remote model that streams a chat completion.
pub trait CompletionBackend: Send + Sync {
    fn stream_completion(
        &self,
        messages: Vec<Message>,
        sampling: SamplingParams,
    ) -> FragmentStream;
}

pub struct HostedModel {
    url: String,
    model_id: String,
    api_token: Option<String>,
    client: Client,
}

impl HostedModel {
    pub fn new(base_url: &str, model_id: impl Into<String>, api_token: Option<String>) -> Self {
        let model_id = model_id.into();
        let url = format!(
            "{}/models/{}/v1/chat/completions",
            base_url.trim_end_matches('/'),
            model_id
        );
        Self {
            url,
            model_id,
            api_token,
            client: Client::new(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    max_tokens: u32,
    temperature: f32,
    top_p: f32,
    stream: bool,
}

impl CompletionBackend for HostedModel {
    fn stream_completion(
        &self,
        messages: Vec<Message>,
        sampling: SamplingParams,
    ) -> FragmentStream {
        let mut request = self.client.post(&self.url).json(&ChatCompletionRequest {
            model: &self.model_id,
            messages: &messages,
            max_tokens: sampling.max_tokens,
            temperature: sampling.temperature,
            top_p: sampling.top_p,
            stream: true,
        });
        if let Some(token) = &self.api_token {
            request = request.bearer_auth(token);
        }

        info!(
            "Streaming completion: {} messages, max_tokens={}, temperature={}, top_p={}",
            messages.len(),
            sampling.max_tokens,
            sampling.temperature,
            sampling.top_p
        );

        Box::pin(stream::once(open_stream(request)).try_flatten())
    }
}

async fn open_stream(
    request: RequestBuilder,
) -> Result<impl Stream<Item = Result<String, CompletionError>> + Send, CompletionError> {
    let response = request.send().await.map_err(|e| {
        error!("Completion request failed: {}", e);
        CompletionError::Transport(e)
    })?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        error!("Completion API returned {}: {}", status, body);
        return Err(CompletionError::Status {
            status: status.as_u16(),
            body: truncate_body(&body),
        });
    }

    Ok(decode_fragments(response.bytes_stream()))
}

/// One `data:` event of the completion stream, reduced to what we read.
#[derive(Debug, Deserialize)]
struct ChunkEvent {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    // TGI reports mid-generation failures as `{"error": ..., "error_type": ...}`.
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: Option<Delta>,
}

#[derive(Debug, Deserialize)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
}

enum Event {
    Fragment(String),
    Skip,
    Done,
}

fn parse_event(data: &str) -> Result<Event, CompletionError> {
    if data == "[DONE]" {
        return Ok(Event::Done);
    }
    let chunk: ChunkEvent = serde_json::from_str(data)?;
    if let Some(message) = chunk.error {
        error!("Completion stream reported an error: {}", message);
        return Err(CompletionError::Remote(message));
    }
    let content = chunk
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.delta)
        .and_then(|d| d.content)
        .filter(|s| !s.is_empty());

    Ok(content.map_or(Event::Skip, Event::Fragment))
}

/// Splits a byte stream into server-sent-event lines and hands back `data:` payloads.
#[derive(Debug, Default)]
struct SseLines {
    buf: Vec<u8>,
}

impl SseLines {
    fn feed(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(bytes);
        let mut payloads = Vec::new();
        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            payloads.extend(data_payload(&line[..pos]));
        }
        payloads
    }

    fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buf);
        data_payload(&rest)
    }
}

fn data_payload(line: &[u8]) -> Option<String> {
    let line = String::from_utf8_lossy(line);
    let line = line.trim_end_matches('\r');
    let data = line.strip_prefix("data:")?;
    Some(data.strip_prefix(' ').unwrap_or(data).to_string())
}

struct Decoder<S> {
    body: Pin<Box<S>>,
    lines: SseLines,
    pending: VecDeque<String>,
    // Held back until the fragments queued before it have been yielded.
    error: Option<CompletionError>,
    finished: bool,
}

impl<S> Decoder<S> {
    /// Queue fragments from `payloads` until the terminator or the first bad event.
    fn absorb(&mut self, payloads: Vec<String>) {
        for data in payloads {
            match parse_event(&data) {
                Ok(Event::Fragment(text)) => self.pending.push_back(text),
                Ok(Event::Skip) => {}
                Ok(Event::Done) => {
                    self.finished = true;
                    return;
                }
                Err(e) => {
                    self.error = Some(e);
                    self.finished = true;
                    return;
                }
            }
        }
    }
}

/// Turn a raw SSE body into the fragment sequence it carries.
///
/// Fragments are released as soon as their line is complete. The sequence
/// ends at `[DONE]` or at end of body, and after the first error.
pub fn decode_fragments<S, B, E>(
    body: S,
) -> impl Stream<Item = Result<String, CompletionError>> + Send
where
    S: Stream<Item = Result<B, E>> + Send,
    B: AsRef<[u8]> + Send,
    E: Into<CompletionError> + Send,
{
    let decoder = Decoder {
        body: Box::pin(body),
        lines: SseLines::default(),
        pending: VecDeque::new(),
        error: None,
        finished: false,
    };

    stream::try_unfold(decoder, |mut d| async move {
        loop {
            if let Some(fragment) = d.pending.pop_front() {
                return Ok::<_, CompletionError>(Some((fragment, d)));
            }
            if let Some(e) = d.error.take() {
                return Err(e);
            }
            if d.finished {
                return Ok::<_, CompletionError>(None);
            }
            match d.body.next().await {
                Some(chunk) => {
                    let chunk = chunk.map_err(Into::<CompletionError>::into)?;
                    let payloads = d.lines.feed(chunk.as_ref());
                    d.absorb(payloads);
                }
                None => {
                    debug!("Completion stream ended without [DONE]");
                    let tail = d.lines.finish().into_iter().collect();
                    d.absorb(tail);
                    d.finished = true;
                }
            }
        }
    })
}
