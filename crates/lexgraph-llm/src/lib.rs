//! lexgraph LLM - Completion backend implementations
//!
//! Provides the two `CompletionBackend` variants used to reach the hosted
//! legal language model:
//! - `InferenceServerBackend`: a directly hosted inference server
//! - `ServerlessBackend`: a queue-and-poll serverless endpoint
//!
//! Both accept either a chat history or a raw continuation prompt and
//! support blocking and streaming generation.

use std::sync::Arc;
use std::time::Duration;

use lexgraph_core::{
    BackendKind, ChatMessage, CompletionBackend, CompletionInput, CompletionRequest, ConfigError,
    GenerationOptions, LexError, LlmConfig, Result,
};
use serde::Serialize;

pub mod inference;
pub mod serverless;

pub use inference::InferenceServerBackend;
pub use lexgraph_core::collect_stream;
pub use serverless::ServerlessBackend;

// ============================================================================
// Shared request body
// ============================================================================

/// Generation request body shared by both backends
#[derive(Debug, Serialize)]
pub(crate) struct GenerationPayload {
    messages: Vec<ChatMessage>,
    /// Set only in raw continuation mode
    prompt: Option<String>,
    #[serde(flatten)]
    options: GenerationOptions,
}

impl From<&CompletionRequest> for GenerationPayload {
    fn from(request: &CompletionRequest) -> Self {
        let (messages, prompt) = match &request.input {
            CompletionInput::Messages(messages) => (messages.clone(), None),
            CompletionInput::Prompt(prompt) => (Vec::new(), Some(prompt.clone())),
        };

        Self {
            messages,
            prompt,
            options: request.options.clone(),
        }
    }
}

pub(crate) fn build_http_client(timeout_secs: u64) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| LexError::Completion(format!("Failed to build HTTP client: {e}")))
}

// ============================================================================
// Factory function
// ============================================================================

/// Create a completion backend from config
pub fn create_backend(config: &LlmConfig) -> Result<Arc<dyn CompletionBackend>> {
    match config.backend {
        BackendKind::Inference => Ok(Arc::new(InferenceServerBackend::from_config(config)?)),
        BackendKind::Serverless => {
            if config.serverless_token.is_none() {
                return Err(
                    ConfigError::MissingRequired("RUNPOD_BEARER_TOKEN".to_string()).into(),
                );
            }
            Ok(Arc::new(ServerlessBackend::from_config(config)?))
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[test]
    fn test_raw_payload_has_prompt_and_no_messages() {
        let request = CompletionRequest::raw("<s>[INST] x [/INST][", GenerationOptions::default());
        let json = serde_json::to_value(GenerationPayload::from(&request)).unwrap();

        assert_eq!(json["prompt"], "<s>[INST] x [/INST][");
        assert_eq!(json["messages"].as_array().unwrap().len(), 0);
        assert_eq!(json["seed"], 10);
        assert_eq!(json["top_k"], 30);
    }

    #[test]
    fn test_chat_payload_sends_null_prompt() {
        let request = CompletionRequest::chat(
            vec![ChatMessage::user("Who is the respondent?")],
            GenerationOptions::default().with_max_tokens(64),
        );
        let json = serde_json::to_value(GenerationPayload::from(&request)).unwrap();

        assert!(json["prompt"].is_null());
        assert_eq!(json["messages"][0]["role"], "user");
        assert_eq!(json["max_tokens"], 64);
    }

    #[test]
    fn test_serverless_requires_token() {
        let config = LlmConfig {
            backend: BackendKind::Serverless,
            ..Default::default()
        };
        assert!(matches!(
            create_backend(&config),
            Err(LexError::Config(ConfigError::MissingRequired(_)))
        ));
    }

    #[test]
    fn test_factory_selects_variant() {
        let backend = create_backend(&LlmConfig::default()).unwrap();
        assert_eq!(backend.name(), "inference-server");

        let config = LlmConfig {
            backend: BackendKind::Serverless,
            serverless_token: Some("token".to_string()),
            ..Default::default()
        };
        assert_eq!(create_backend(&config).unwrap().name(), "serverless");
    }

    #[tokio::test]
    async fn test_collect_stream_joins_fragments() {
        let fragments = vec![Ok("[{\"rel".to_string()), Ok("ation\"".to_string())];
        let stream = futures::stream::iter(fragments).boxed();
        assert_eq!(collect_stream(stream).await.unwrap(), "[{\"relation\"");
    }

    #[test]
    fn test_collect_stream_propagates_error() {
        let fragments = vec![
            Ok("partial".to_string()),
            Err(LexError::Completion("connection reset".to_string())),
        ];
        let stream = futures::stream::iter(fragments).boxed();
        assert!(tokio_test::block_on(collect_stream(stream)).is_err());
    }
}
