// Fakes for the two remote services and a one-shot HTTP server for the real clients.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures_util::stream;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use crate::chat::types::{Message, SamplingParams};
use crate::error::CompletionError;
use crate::kg::{KgResult, KnowledgeGraph};
use crate::model::{CompletionBackend, FragmentStream};

/// Knowledge graph that always gives the same reply and records every prompt.
pub struct FakeKg {
    pub reply: KgResult,
    pub prompts: Mutex<Vec<String>>,
}

impl FakeKg {
    pub fn new(reply: KgResult) -> Arc<Self> {
        Arc::new(Self {
            reply,
            prompts: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }
}

#[async_trait]
impl KnowledgeGraph for FakeKg {
    async fn query(&self, prompt: &str) -> KgResult {
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.reply.clone()
    }
}

/// Model that replays fixed fragments, optionally failing after the first `n`.
pub struct FakeModel {
    pub fragments: Vec<&'static str>,
    pub failure: Option<(usize, Failure)>,
    pub calls: AtomicUsize,
    pub seen: Mutex<Vec<Message>>,
    /// Set once the last fragment stream handed out has been dropped.
    pub released: Arc<AtomicBool>,
}

#[derive(Debug, Clone, Copy)]
pub enum Failure {
    /// The endpoint answers 502 mid-stream.
    Status,
    /// The endpoint sends an `{"error": ...}` event with this message.
    Remote(&'static str),
}

impl FakeModel {
    pub fn new(fragments: Vec<&'static str>) -> Arc<Self> {
        Self::build(fragments, None)
    }

    pub fn failing_after(fragments: Vec<&'static str>, n: usize) -> Arc<Self> {
        Self::build(fragments, Some((n, Failure::Status)))
    }

    pub fn reporting_after(
        fragments: Vec<&'static str>,
        n: usize,
        message: &'static str,
    ) -> Arc<Self> {
        Self::build(fragments, Some((n, Failure::Remote(message))))
    }

    fn build(fragments: Vec<&'static str>, failure: Option<(usize, Failure)>) -> Arc<Self> {
        Arc::new(Self {
            fragments,
            failure,
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
            released: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }
}

struct ReleaseOnDrop(Arc<AtomicBool>);

impl Drop for ReleaseOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

impl CompletionBackend for FakeModel {
    fn stream_completion(
        &self,
        messages: Vec<Message>,
        _sampling: SamplingParams,
    ) -> FragmentStream {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.seen.lock().unwrap() = messages;
        self.released.store(false, Ordering::SeqCst);

        let mut items: Vec<Result<String, CompletionError>> =
            self.fragments.iter().map(|f| Ok(f.to_string())).collect();
        if let Some((n, failure)) = self.failure {
            items.truncate(n);
            items.push(Err(match failure {
                Failure::Status => CompletionError::Status {
                    status: 502,
                    body: "upstream reset".into(),
                },
                Failure::Remote(message) => CompletionError::Remote(message.into()),
            }));
        }

        // The guard lives in the stream state, like a response body would.
        let guard = ReleaseOnDrop(Arc::clone(&self.released));
        Box::pin(stream::unfold(
            (items.into_iter(), guard),
            |(mut items, guard)| async move { items.next().map(|item| (item, (items, guard))) },
        ))
    }
}

/// Serve exactly one request with the given status line, content type and body.
///
/// Returns the server's base URL and a handle resolving to the raw request text.
pub async fn serve_once(
    status: &str,
    content_type: &str,
    body: &str,
) -> (String, JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let response = format!(
        "HTTP/1.1 {status}\r\nContent-Type: {content_type}\r\n\
         Content-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );

    let handle = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let request = read_request(&mut socket).await;
        socket.write_all(response.as_bytes()).await.unwrap();
        let _ = socket.shutdown().await;
        request
    });

    (format!("http://{addr}"), handle)
}

/// A base URL nothing is listening on.
pub async fn closed_port() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}")
}

async fn read_request(socket: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];

    let header_end = loop {
        let n = socket.read(&mut chunk).await.unwrap();
        if n == 0 {
            return String::from_utf8_lossy(&buf).into_owned();
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let headers = String::from_utf8_lossy(&buf[..header_end]).to_lowercase();
    let content_length = headers
        .lines()
        .find_map(|line| line.strip_prefix("content-length:"))
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(0);

    while buf.len() < header_end + content_length {
        let n = socket.read(&mut chunk).await.unwrap();
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }

    String::from_utf8_lossy(&buf).into_owned()
}
