//! lexgraph Configuration Management
//!
//! Handles configuration from environment variables and TOML config files
//! with sensible defaults for a local inference server.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::template::ChatTemplate;
use crate::GenerationOptions;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Completion backend configuration
    pub llm: LlmConfig,

    /// Default sampling parameters
    pub generation: GenerationOptions,

    /// Relation graph builder configuration
    pub builder: BuilderConfig,

    /// Entity tagger configuration
    pub tagger: TaggerConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Load from a TOML file
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let content = std::fs::read_to_string(&path).map_err(|e| ConfigError::FileReadError {
            path: path.clone(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path,
            message: e.to_string(),
        })
    }

    /// Layer environment variables on top (env takes precedence)
    pub fn with_env_override(mut self) -> Result<Self, ConfigError> {
        self.apply_env()?;
        Ok(self)
    }

    fn apply_env(&mut self) -> Result<(), ConfigError> {
        // Backend selection
        if let Ok(kind) = std::env::var("LLM_BACKEND") {
            self.llm.backend = kind.parse()?;
        }
        if let Ok(url) = std::env::var("INFERENCE_CHAT_URI") {
            self.llm.inference_chat_url = url;
        }
        if let Ok(url) = std::env::var("INFERENCE_STREAM_URI") {
            self.llm.inference_stream_url = url;
        }
        if let Ok(url) = std::env::var("RUNPOD_BASE_URI") {
            self.llm.serverless_base_url = url;
        }
        if let Ok(token) = std::env::var("RUNPOD_BEARER_TOKEN") {
            self.llm.serverless_token = Some(token);
        }
        if let Ok(delay) = std::env::var("RUNPOD_STATUS_CHECK_DELAY_MS") {
            self.llm.status_check_delay_ms = parse_env("RUNPOD_STATUS_CHECK_DELAY_MS", delay)?;
        }
        if let Ok(delay) = std::env::var("RUNPOD_STREAM_DELAY_MS") {
            self.llm.stream_delay_ms = parse_env("RUNPOD_STREAM_DELAY_MS", delay)?;
        }
        if let Ok(template) = std::env::var("CHAT_TEMPLATE") {
            self.llm.chat_template = template.parse()?;
        }
        if let Ok(stream) = std::env::var("STREAM_CHAT") {
            self.llm.stream_chat = parse_bool("STREAM_CHAT", stream)?;
        }

        // Builder
        if let Ok(size) = std::env::var("MIN_CHUNK_CHARS") {
            self.builder.min_chunk_chars = parse_env("MIN_CHUNK_CHARS", size)?;
        }
        if let Ok(cap) = std::env::var("MAX_ITERATIONS_PER_CHUNK") {
            self.builder.max_iterations_per_chunk = parse_env("MAX_ITERATIONS_PER_CHUNK", cap)?;
        }

        // Tagger
        if let Ok(url) = std::env::var("NLP_API_CONNECTION_STRING") {
            self.tagger.url = url;
            self.tagger.use_remote = true;
        }

        // Logging
        if let Ok(level) = std::env::var("LOG_LEVEL") {
            self.logging.level = level;
        }

        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: String) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value,
    })
}

fn parse_bool(key: &str, value: String) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value,
        }),
    }
}

/// Completion backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Which backend variant to use
    pub backend: BackendKind,

    /// Blocking chat endpoint of the inference server
    pub inference_chat_url: String,

    /// Streaming endpoint of the inference server
    pub inference_stream_url: String,

    /// Serverless endpoint base URL
    pub serverless_base_url: String,

    /// Bearer token for the serverless endpoint
    pub serverless_token: Option<String>,

    /// Delay between job status polls
    pub status_check_delay_ms: u64,

    /// Delay between stream polls
    pub stream_delay_ms: u64,

    /// Prompt format of the served model
    pub chat_template: ChatTemplate,

    /// Stream chat replies instead of waiting for the full reply
    pub stream_chat: bool,

    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Inference,
            inference_chat_url: "http://127.0.0.1:2235".to_string(),
            inference_stream_url: "http://127.0.0.1:2234".to_string(),
            serverless_base_url: "https://api.runpod.ai/v2/hjxnt6qh1tc7mp".to_string(),
            serverless_token: None,
            status_check_delay_ms: 100,
            stream_delay_ms: 0,
            chat_template: ChatTemplate::Mistral,
            stream_chat: false,
            timeout_secs: 300,
        }
    }
}

/// Supported completion backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Directly hosted inference server
    Inference,
    /// Queue-and-poll serverless endpoint
    Serverless,
}

impl std::str::FromStr for BackendKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "inference" | "direct" => Ok(Self::Inference),
            "serverless" | "runpod" => Ok(Self::Serverless),
            _ => Err(ConfigError::InvalidValue {
                key: "LLM_BACKEND".to_string(),
                value: s.to_string(),
            }),
        }
    }
}

/// Relation graph builder configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BuilderConfig {
    /// Minimum characters per chunk
    pub min_chunk_chars: usize,

    /// Engine calls allowed on one chunk before moving on
    pub max_iterations_per_chunk: u32,

    /// Token budget for each engine call
    pub max_new_tokens: u32,

    /// Sampling seed for each engine call
    pub seed: u64,

    /// Use the streaming completion path
    pub stream: bool,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            min_chunk_chars: 1500,
            max_iterations_per_chunk: 5,
            max_new_tokens: 2048,
            seed: 10,
            stream: false,
        }
    }
}

/// Entity tagger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TaggerConfig {
    /// NLP API base URL
    pub url: String,

    /// Labels to tag (empty = all)
    pub labels: Vec<String>,

    /// Use the remote NLP API instead of the built-in rule tagger
    pub use_remote: bool,
}

impl Default for TaggerConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:8542".to_string(),
            labels: Vec::new(),
            use_remote: false,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// JSON format for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    ParseError { path: PathBuf, message: String },

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("Missing required configuration: {0}")]
    MissingRequired(String),
}
