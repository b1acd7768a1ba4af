use super::port::{ChatRequest, CompletionBackend, Fragment, FragmentStream};
use crate::error::BackendError;
use crate::history::Role;
use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};

/// Ollama `/api/chat` transport. Speaks NDJSON: one JSON object per line,
/// terminated by an object with `done: true`.
pub struct OllamaBackend {
    base_url: String,
    client: Client,
}

#[derive(Debug, Serialize)]
struct ApiChatRequest {
    model: String,
    messages: Vec<ApiMessage>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ApiMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ApiChatChunk {
    message: Option<ApiChunkMessage>,
    #[serde(default)]
    done: bool,
}

#[derive(Debug, Deserialize)]
struct ApiChunkMessage {
    role: Option<String>,
    content: String,
}

/// Reassembles NDJSON lines from arbitrarily-split byte chunks. Carries raw
/// bytes so a multi-byte character straddling a chunk boundary is only
/// decoded once its line is complete.
struct LineBuffer {
    carry: Vec<u8>,
}

impl LineBuffer {
    fn new() -> Self {
        Self { carry: Vec::new() }
    }

    fn push_chunk(&mut self, chunk: &[u8]) {
        self.carry.extend_from_slice(chunk);
    }

    fn next_line(&mut self) -> Option<String> {
        let newline = self.carry.iter().position(|&byte| byte == b'\n')?;
        let line = String::from_utf8_lossy(&self.carry[..newline]).into_owned();
        self.carry.drain(..=newline);
        Some(line)
    }

    /// Whatever is left once the byte stream ends. A non-streaming reply is
    /// a single JSON object with no trailing newline, so this matters.
    fn remainder(self) -> String {
        String::from_utf8_lossy(&self.carry).into_owned()
    }
}

impl OllamaBackend {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: Client::builder()
                .timeout(std::time::Duration::from_secs(300)) // local models can be slow
                .connect_timeout(std::time::Duration::from_secs(10))
                .pool_max_idle_per_host(10)
                .build()
                .unwrap_or_else(|_| Client::new()),
        }
    }

    fn build_request(request: &ChatRequest) -> ApiChatRequest {
        ApiChatRequest {
            model: request.model.clone(),
            messages: request
                .turns
                .iter()
                .map(|turn| ApiMessage {
                    role: turn.role.as_str(),
                    content: turn.content.clone(),
                })
                .collect(),
            stream: request.streaming,
        }
    }

    fn transport_error(error: &reqwest::Error) -> BackendError {
        BackendError::Transport {
            backend: "ollama".into(),
            message: error.to_string(),
        }
    }

    fn parse_line(line: &str) -> Result<Option<Fragment>, BackendError> {
        let chunk: ApiChatChunk =
            serde_json::from_str(line).map_err(|error| BackendError::Protocol {
                backend: "ollama".into(),
                message: format!("bad NDJSON line: {error}"),
            })?;

        let Some(message) = chunk.message else {
            return Ok(None);
        };
        if message.content.is_empty() {
            return Ok(None);
        }

        let role = message
            .role
            .as_deref()
            .map_or(Role::Assistant, Role::from_wire);
        Ok(Some(Fragment {
            role,
            text: message.content,
        }))
    }

    fn line_is_done(line: &str) -> bool {
        serde_json::from_str::<ApiChatChunk>(line)
            .map(|chunk| chunk.done)
            .unwrap_or(false)
    }
}

#[async_trait]
impl CompletionBackend for OllamaBackend {
    async fn stream_chat(&self, request: ChatRequest) -> Result<FragmentStream, BackendError> {
        let url = format!("{}/api/chat", self.base_url);
        let api_request = Self::build_request(&request);
        tracing::debug!(model = %request.model, turns = request.turns.len(), "ollama chat request");

        let response = self
            .client
            .post(&url)
            .json(&api_request)
            .send()
            .await
            .map_err(|error| Self::transport_error(&error))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Api {
                backend: "ollama".into(),
                status: status.as_u16(),
                message: body.chars().take(500).collect(),
            });
        }

        let mut byte_stream = response.bytes_stream();
        let stream = async_stream::try_stream! {
            let mut lines = LineBuffer::new();
            let mut done = false;

            'read: while let Some(chunk_result) = byte_stream.next().await {
                let chunk = chunk_result.map_err(|error| Self::transport_error(&error))?;
                lines.push_chunk(&chunk);

                while let Some(line) = lines.next_line() {
                    if line.trim().is_empty() {
                        continue;
                    }
                    if let Some(fragment) = Self::parse_line(&line)? {
                        yield fragment;
                    }
                    if Self::line_is_done(&line) {
                        done = true;
                        break 'read;
                    }
                }
            }

            if !done {
                let remainder = lines.remainder();
                if !remainder.trim().is_empty() {
                    if let Some(fragment) = Self::parse_line(remainder.trim())? {
                        yield fragment;
                    }
                }
            }
        };

        Ok(Box::pin(stream))
    }

    fn name(&self) -> &'static str {
        "ollama"
    }
}
