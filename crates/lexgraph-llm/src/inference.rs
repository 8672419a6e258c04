//! Directly hosted inference server backend
//!
//! Blocking generation posts to `{chat_url}/api/v1/chat` and reads a single
//! `{"response": ..}` body. Streaming posts the same body to
//! `{stream_url}/api/v2/stream`, which answers with newline-delimited
//! events until a `stream_end` event arrives.

use async_trait::async_trait;
use futures::stream::{BoxStream, Stream, StreamExt};
use lexgraph_core::{CompletionBackend, CompletionRequest, LexError, LlmConfig, Result};
use reqwest::Client;
use serde::Deserialize;

use crate::{build_http_client, GenerationPayload};

/// Inference server client
pub struct InferenceServerBackend {
    client: Client,
    chat_url: String,
    stream_url: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    response: String,
}

/// One line of the streaming protocol
#[derive(Debug, Deserialize, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
enum StreamEvent {
    TextStream { text: String },
    StreamEnd,
}

impl InferenceServerBackend {
    /// Create a new inference server client
    pub fn new(chat_base: impl Into<String>, stream_base: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            chat_url: format!("{}/api/v1/chat", chat_base.into().trim_end_matches('/')),
            stream_url: format!("{}/api/v2/stream", stream_base.into().trim_end_matches('/')),
        }
    }

    /// Create from config
    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        let mut backend = Self::new(&config.inference_chat_url, &config.inference_stream_url);
        backend.client = build_http_client(config.timeout_secs)?;
        Ok(backend)
    }
}

#[async_trait]
impl CompletionBackend for InferenceServerBackend {
    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        let payload = GenerationPayload::from(request);

        let response = self
            .client
            .post(&self.chat_url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| LexError::Completion(format!("Inference request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(LexError::Completion(format!(
                "Inference server error ({status}): {error_text}"
            )));
        }

        let result: ChatResponse = response
            .json()
            .await
            .map_err(|e| LexError::Completion(format!("Failed to parse response: {e}")))?;

        Ok(result.response)
    }

    async fn complete_stream(
        &self,
        request: &CompletionRequest,
    ) -> Result<BoxStream<'static, Result<String>>> {
        let payload = GenerationPayload::from(request);

        let response = self
            .client
            .post(&self.stream_url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| LexError::Completion(format!("Stream request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(LexError::Completion(format!(
                "Inference stream error ({status}): {error_text}"
            )));
        }

        Ok(decode_event_stream(response.bytes_stream()))
    }

    fn name(&self) -> &str {
        "inference-server"
    }
}

/// Turn the raw NDJSON byte stream into text fragments.
///
/// The turn is only complete once `stream_end` arrives; a body that closes
/// before it yields a `Completion` error after the fragments read so far.
fn decode_event_stream<S, B, E>(bytes: S) -> BoxStream<'static, Result<String>>
where
    S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    // Lines can straddle network chunks, so buffer until a newline arrives.
    futures::stream::unfold(
        (bytes.boxed(), Vec::<u8>::new(), false),
        |(mut bytes, mut buffer, done)| async move {
            if done {
                return None;
            }
            loop {
                if let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                    let line: Vec<u8> = buffer.drain(..=pos).collect();
                    match parse_event_line(&line) {
                        Some(StreamEvent::TextStream { text }) if !text.is_empty() => {
                            return Some((Ok(text), (bytes, buffer, false)));
                        }
                        Some(StreamEvent::StreamEnd) => return None,
                        _ => continue,
                    }
                }

                match bytes.next().await {
                    Some(Ok(chunk)) => buffer.extend_from_slice(chunk.as_ref()),
                    Some(Err(e)) => {
                        let err = LexError::Completion(format!("Stream error: {e}"));
                        return Some((Err(err), (bytes, buffer, true)));
                    }
                    None => {
                        let rest = std::mem::take(&mut buffer);
                        if parse_event_line(&rest) == Some(StreamEvent::StreamEnd) {
                            return None;
                        }
                        let err =
                            LexError::Completion("stream closed before stream_end".to_string());
                        return Some((Err(err), (bytes, buffer, true)));
                    }
                }
            }
        },
    )
    .boxed()
}

fn parse_event_line(line: &[u8]) -> Option<StreamEvent> {
    let text = String::from_utf8_lossy(line);
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    match serde_json::from_str(trimmed) {
        Ok(event) => Some(event),
        Err(e) => {
            tracing::debug!("Skipping unrecognised stream line: {e}");
            None
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
