//! A provider that replays scripted replies.
//!
//! Used by the test suites of the downstream crates and for running the
//! gateway without a model endpoint. Each call consumes the next reply;
//! streamed replies are cut into fixed-size chunks and end with a `done`
//! chunk, like a real SSE stream.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use domgate_core::error::ProviderError;
use domgate_core::message::Message;
use domgate_core::provider::{ChunkReceiver, Provider, ProviderRequest, ProviderResponse, StreamChunk};

pub struct ScriptedProvider {
    replies: Mutex<VecDeque<Result<String, ProviderError>>>,
    requests: Mutex<Vec<ProviderRequest>>,
    chunk_chars: usize,
}

impl ScriptedProvider {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            replies: Mutex::new(replies.into_iter().map(|r| Ok(r.into())).collect()),
            requests: Mutex::new(Vec::new()),
            chunk_chars: 7,
        }
    }

    /// A provider whose first call fails with `error`.
    pub fn failing(error: ProviderError) -> Self {
        let provider = Self::new(Vec::<String>::new());
        provider.push_error(error);
        provider
    }

    pub fn with_chunk_chars(mut self, chunk_chars: usize) -> Self {
        self.chunk_chars = chunk_chars.max(1);
        self
    }

    pub fn push_reply(&self, reply: impl Into<String>) {
        self.replies_lock().push_back(Ok(reply.into()));
    }

    pub fn push_error(&self, error: ProviderError) {
        self.replies_lock().push_back(Err(error));
    }

    /// Every request received so far, oldest first.
    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests().len()
    }

    fn replies_lock(&self) -> std::sync::MutexGuard<'_, VecDeque<Result<String, ProviderError>>> {
        self.replies.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn next_reply(&self, request: ProviderRequest) -> Result<String, ProviderError> {
        self.requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(request);
        self.replies_lock()
            .pop_front()
            .unwrap_or_else(|| Err(ProviderError::NotConfigured("scripted replies exhausted".into())))
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let model = request.model.clone();
        let text = self.next_reply(request)?;
        Ok(ProviderResponse {
            message: Message::assistant(text),
            usage: None,
            model,
        })
    }

    async fn stream(&self, request: ProviderRequest) -> Result<ChunkReceiver, ProviderError> {
        let text = self.next_reply(request)?;
        let chars: Vec<char> = text.chars().collect();
        let pieces: Vec<String> = chars
            .chunks(self.chunk_chars)
            .map(|c| c.iter().collect())
            .collect();

        // Sized to hold every chunk so nothing has to be spawned.
        let (tx, rx) = tokio::sync::mpsc::channel(pieces.len() + 1);
        for piece in pieces {
            let _ = tx
                .send(Ok(StreamChunk {
                    content: Some(piece),
                    done: false,
                    usage: None,
                }))
                .await;
        }
        let _ = tx
            .send(Ok(StreamChunk {
                content: None,
                done: true,
                usage: None,
            }))
            .await;
        Ok(rx)
    }
}
