//! Model runtime client.
//!
//! [`Generator`] streams a completion for a prompt as text fragments.
//! [`OllamaGenerator`] talks to Ollama's `POST /api/generate`, which
//! answers with newline-delimited JSON frames:
//!
//! ```text
//! {"model":"llama3.1:8b","response":"Hel","done":false}
//! {"model":"llama3.1:8b","response":"lo","done":false}
//! {"model":"llama3.1:8b","response":"","done":true}
//! ```
//!
//! A stream that ends before the `done` frame yields a final
//! [`GenerationError::Incomplete`]. Calls are never retried.

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::Deserialize;
use std::time::Duration;

use crate::config::ModelRuntimeConfig;
use crate::error::GenerationError;

/// Incremental completion text. An `Err` item is always the last one.
pub type TextStream = BoxStream<'static, Result<String, GenerationError>>;

#[async_trait]
pub trait Generator: Send + Sync {
    /// Start generating. Failing to reach the runtime is reported here,
    /// before any fragment is produced.
    async fn generate(&self, model: &str, prompt: &str) -> Result<TextStream, GenerationError>;
}

pub struct OllamaGenerator {
    url: String,
    temperature: f32,
    client: reqwest::Client,
}

impl OllamaGenerator {
    pub fn new(config: &ModelRuntimeConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            url: config.url.trim_end_matches('/').to_string(),
            temperature: config.temperature,
            client,
        })
    }
}

#[async_trait]
impl Generator for OllamaGenerator {
    async fn generate(&self, model: &str, prompt: &str) -> Result<TextStream, GenerationError> {
        let body = serde_json::json!({
            "model": model,
            "prompt": prompt,
            "stream": true,
            "options": { "temperature": self.temperature },
        });

        tracing::debug!(model, prompt_chars = prompt.chars().count(), "sending generate request");
        let response = self
            .client
            .post(format!("{}/api/generate", self.url))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                GenerationError::Unavailable(format!(
                    "could not reach the model runtime at {} (is Ollama running?): {}",
                    self.url, e
                ))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(GenerationError::Unavailable(format!(
                "model runtime returned {}: {}",
                status,
                error_message(&body_text)
            )));
        }

        let byte_stream = response.bytes_stream();
        let stream = async_stream::stream! {
            let mut decoder = NdjsonDecoder::default();
            futures::pin_mut!(byte_stream);
            while let Some(chunk) = byte_stream.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        yield Err(GenerationError::Incomplete(format!("stream read error: {}", e)));
                        return;
                    }
                };
                for frame in decoder.push(&chunk) {
                    match frame {
                        Frame::Text(text) => yield Ok(text),
                        Frame::Done => return,
                        Frame::Error(message) => {
                            yield Err(GenerationError::Incomplete(message));
                            return;
                        }
                    }
                }
            }
            for frame in decoder.finish() {
                match frame {
                    Frame::Text(text) => yield Ok(text),
                    Frame::Done => return,
                    Frame::Error(message) => {
                        yield Err(GenerationError::Incomplete(message));
                        return;
                    }
                }
            }
            yield Err(GenerationError::Incomplete(
                "stream closed before the model finished".to_string(),
            ));
        };
        Ok(Box::pin(stream))
    }
}

/// Pull the `error` field out of an Ollama error body, if there is one.
fn error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(str::to_string))
        .unwrap_or_else(|| body.to_string())
}

#[derive(Debug, Deserialize)]
struct GenerateFrame {
    #[serde(default)]
    response: String,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, PartialEq)]
enum Frame {
    Text(String),
    Done,
    Error(String),
}

/// Splits a byte stream into NDJSON frames. Bytes are buffered until a
/// newline so multi-byte characters split across reads survive intact.
#[derive(Default)]
struct NdjsonDecoder {
    buffer: Vec<u8>,
}

impl NdjsonDecoder {
    fn push(&mut self, bytes: &[u8]) -> Vec<Frame> {
        self.buffer.extend_from_slice(bytes);
        let mut frames = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            decode_line(&line, &mut frames);
        }
        frames
    }

    fn finish(&mut self) -> Vec<Frame> {
        let line = std::mem::take(&mut self.buffer);
        let mut frames = Vec::new();
        decode_line(&line, &mut frames);
        frames
    }
}

fn decode_line(line: &[u8], frames: &mut Vec<Frame>) {
    let line = String::from_utf8_lossy(line);
    let line = line.trim();
    if line.is_empty() {
        return;
    }
    match serde_json::from_str::<GenerateFrame>(line) {
        Ok(frame) => {
            if let Some(error) = frame.error {
                frames.push(Frame::Error(error));
                return;
            }
            if !frame.response.is_empty() {
                frames.push(Frame::Text(frame.response));
            }
            if frame.done {
                frames.push(Frame::Done);
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "skipping malformed generate frame");
        }
    }
}
