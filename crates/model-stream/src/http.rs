use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

use crate::process::Utf8Decoder;
use crate::stream::{TokenSource, TokenStream};
use crate::types::ChatMessage;
use crate::{ModelError, Result};

// ─── Wire types ───────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
}

/// One NDJSON line of an `/api/chat` streaming response.
#[derive(Debug, Deserialize)]
struct ChatChunk {
    #[serde(default)]
    message: Option<ChunkMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChunkMessage {
    #[serde(default)]
    content: String,
}

/// What a single response line means for the stream.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum LineEvent {
    Text(String),
    Done,
    Skip,
}

pub(crate) fn parse_line(line: &str) -> Result<LineEvent> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Ok(LineEvent::Skip);
    }
    let chunk: ChatChunk = serde_json::from_str(trimmed).map_err(|e| ModelError::Parse {
        line: trimmed.to_owned(),
        source: e,
    })?;
    if let Some(err) = chunk.error {
        return Err(ModelError::Upstream(err));
    }
    let text = chunk.message.map(|m| m.content).unwrap_or_default();
    match (text.is_empty(), chunk.done) {
        (false, _) => Ok(LineEvent::Text(text)),
        (true, true) => Ok(LineEvent::Done),
        (true, false) => Ok(LineEvent::Skip),
    }
}

/// Splits a byte stream into complete lines.
#[derive(Debug, Default)]
pub(crate) struct LineBuffer {
    decoder: Utf8Decoder,
    partial: String,
}

impl LineBuffer {
    pub(crate) fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.partial.push_str(&self.decoder.push(bytes));
        let mut lines = Vec::new();
        while let Some(idx) = self.partial.find('\n') {
            let line: String = self.partial.drain(..=idx).collect();
            lines.push(line.trim_end_matches(['\r', '\n']).to_string());
        }
        lines
    }

    /// Whatever is left after the last newline.
    pub(crate) fn finish(self) -> Option<String> {
        let mut rest = self.partial;
        rest.push_str(&self.decoder.finish());
        if rest.trim().is_empty() {
            None
        } else {
            Some(rest)
        }
    }
}

// ─── OllamaSource ─────────────────────────────────────────────────────────

/// Ollama-compatible chat endpoint (`POST {endpoint}/api/chat`, NDJSON).
#[derive(Debug, Clone)]
pub struct OllamaSource {
    client: reqwest::Client,
    endpoint: String,
    model: String,
}

impl OllamaSource {
    pub fn new(endpoint: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            model: model.into(),
        }
    }

    fn url(&self) -> String {
        format!("{}/api/chat", self.endpoint)
    }
}

impl TokenSource for OllamaSource {
    fn stream(&self, messages: Vec<ChatMessage>) -> TokenStream {
        let (tx, stream) = TokenStream::channel();
        let this = self.clone();
        tokio::spawn(async move {
            if let Err(e) = this.pump(messages, &tx).await {
                let _ = tx.send(Err(e)).await;
            }
        });
        stream
    }

    fn name(&self) -> &str {
        &self.model
    }
}

impl OllamaSource {
    async fn pump(&self, messages: Vec<ChatMessage>, tx: &mpsc::Sender<Result<String>>) -> Result<()> {
        let body = ChatRequest {
            model: &self.model,
            messages: &messages,
            stream: true,
        };
        debug!(url = %self.url(), model = %self.model, turns = messages.len(), "requesting chat stream");
        let resp = self.client.post(self.url()).json(&body).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(ModelError::Upstream(format!("HTTP {status}: {}", text.trim())));
        }

        let mut bytes = Box::pin(resp.bytes_stream());
        let mut lines = LineBuffer::default();
        loop {
            let chunk = tokio::select! {
                next = bytes.next() => match next {
                    Some(chunk) => chunk?,
                    None => break,
                },
                // Receiver dropped while the server is silent; dropping the
                // body closes the connection.
                _ = tx.closed() => return Ok(()),
            };
            for line in lines.push(&chunk) {
                match parse_line(&line)? {
                    LineEvent::Text(t) => {
                        if tx.send(Ok(t)).await.is_err() {
                            return Ok(());
                        }
                    }
                    LineEvent::Done => return Ok(()),
                    LineEvent::Skip => {}
                }
            }
        }
        if let Some(rest) = lines.finish() {
            if let LineEvent::Text(t) = parse_line(&rest)? {
                let _ = tx.send(Ok(t)).await;
            }
        }
        Ok(())
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────
