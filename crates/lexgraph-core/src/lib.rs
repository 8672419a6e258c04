//! lexgraph Core - Domain models, traits, and shared types
//!
//! This crate defines the core abstractions used throughout lexgraph:
//! - Relation records and the legal entity vocabulary
//! - Chat messages and generation parameters
//! - Common error types
//! - Capability traits for completion backends and entity taggers
//! - Chat templates and configuration management

pub mod config;
pub mod template;

pub use config::{
    AppConfig, BackendKind, BuilderConfig, ConfigError, LlmConfig, LoggingConfig, TaggerConfig,
};
pub use template::ChatTemplate;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Core error types for lexgraph operations
#[derive(Error, Debug)]
pub enum LexError {
    #[error("Completion error: {0}")]
    Completion(String),

    #[error("Malformed model output: {message}")]
    MalformedOutput { message: String, raw: String },

    #[error("Entity tagger error: {0}")]
    Tagger(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl LexError {
    /// Raw model text attached to the error, if any
    pub fn raw_output(&self) -> Option<&str> {
        match self {
            Self::MalformedOutput { raw, .. } => Some(raw),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, LexError>;

// ============================================================================
// Entity Vocabulary
// ============================================================================

/// Entity labels produced by the legal NER model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityType {
    Person,
    Org,
    Court,
    Date,
    Statute,
    Provision,
    Precedent,
    Judge,
    Witness,
    Lawyer,
    Petitioner,
    Respondent,
    Gpe,
    CaseNumber,
    Other,
}

impl EntityType {
    pub const ALL: [EntityType; 15] = [
        Self::Person,
        Self::Org,
        Self::Court,
        Self::Date,
        Self::Statute,
        Self::Provision,
        Self::Precedent,
        Self::Judge,
        Self::Witness,
        Self::Lawyer,
        Self::Petitioner,
        Self::Respondent,
        Self::Gpe,
        Self::CaseNumber,
        Self::Other,
    ];

    /// Get the tag used in angle-bracket markup
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Person => "PERSON",
            Self::Org => "ORG",
            Self::Court => "COURT",
            Self::Date => "DATE",
            Self::Statute => "STATUTE",
            Self::Provision => "PROVISION",
            Self::Precedent => "PRECEDENT",
            Self::Judge => "JUDGE",
            Self::Witness => "WITNESS",
            Self::Lawyer => "LAWYER",
            Self::Petitioner => "PETITIONER",
            Self::Respondent => "RESPONDENT",
            Self::Gpe => "GPE",
            Self::CaseNumber => "CASE_NUMBER",
            Self::Other => "OTHER",
        }
    }

    /// Parse a label case-insensitively; unknown labels map to `Other`
    pub fn from_label(label: &str) -> Self {
        let upper = label.trim().to_uppercase();
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == upper)
            .unwrap_or(Self::Other)
    }

    /// Labels that denote a natural person in some role
    pub fn is_person_like(&self) -> bool {
        matches!(
            self,
            Self::Person
                | Self::Judge
                | Self::Witness
                | Self::Lawyer
                | Self::Petitioner
                | Self::Respondent
        )
    }
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Reduce an entity string to its bare name.
///
/// Takes the text strictly between the first `>` and the next `<`, or the
/// whole string when there is no `>`. `<JUDGE>R. F. Nariman</JUDGE>` becomes
/// `R. F. Nariman`.
pub fn strip_angle_brackets(entity: &str) -> &str {
    match entity.split_once('>') {
        None => entity,
        Some((_, rest)) => rest.split_once('<').map_or(rest, |(head, _)| head),
    }
}

// ============================================================================
// Relation Records
// ============================================================================

/// One side of a relation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationEntity {
    /// Surface string, possibly still wrapped in `<TAG>..</TAG>`
    pub entity: String,

    #[serde(rename = "type")]
    pub entity_type: String,
}

impl RelationEntity {
    pub fn new(entity: impl Into<String>, entity_type: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            entity_type: entity_type.into(),
        }
    }

    /// Entity name with any tag markup removed
    pub fn name(&self) -> &str {
        strip_angle_brackets(&self.entity)
    }
}

/// Free-form justification attached to a relation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdditionalInfo {
    pub description: String,

    /// Any further keys the model emitted, kept verbatim
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl AdditionalInfo {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            extra: serde_json::Map::new(),
        }
    }
}

/// The atomic unit of the relation graph.
///
/// Field names and nesting are the stored wire format and must not change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationRecord {
    pub relation: String,
    pub entity1: RelationEntity,
    pub entity2: RelationEntity,
    pub additional_info: AdditionalInfo,
}

impl RelationRecord {
    pub fn new(
        relation: impl Into<String>,
        entity1: RelationEntity,
        entity2: RelationEntity,
        description: impl Into<String>,
    ) -> Self {
        Self {
            relation: relation.into(),
            entity1,
            entity2,
            additional_info: AdditionalInfo::new(description),
        }
    }

    /// Both ends name the same entity once tags are stripped
    pub fn is_self_loop(&self) -> bool {
        self.entity1.name().trim() == self.entity2.name().trim()
    }

    /// Every required field is present and non-empty
    pub fn is_complete(&self) -> bool {
        !self.relation.trim().is_empty()
            && !self.entity1.entity.trim().is_empty()
            && !self.entity1.entity_type.trim().is_empty()
            && !self.entity2.entity.trim().is_empty()
            && !self.entity2.entity_type.trim().is_empty()
            && !self.additional_info.description.trim().is_empty()
    }

    /// (relation, entity1, entity2) identity, on bare entity names
    pub fn triple(&self) -> (&str, &str, &str) {
        (&self.relation, self.entity1.name(), self.entity2.name())
    }
}

// ============================================================================
// Chat and Generation Types
// ============================================================================

/// Speaker of a chat turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// A single chat turn
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// Sampling parameters forwarded to the completion service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationOptions {
    pub seed: u64,
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
    pub repetition_penalty: f32,
    pub top_k: u32,
    pub add_bos_token: bool,
    pub use_lora: bool,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            seed: 10,
            max_tokens: 512,
            temperature: 0.8,
            top_p: 0.7,
            repetition_penalty: 1.05,
            top_k: 30,
            add_bos_token: false,
            use_lora: false,
        }
    }
}

impl GenerationOptions {
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

/// What the backend should continue from
#[derive(Debug, Clone, PartialEq)]
pub enum CompletionInput {
    /// Chat turns, wrapped in the backend's own chat template
    Messages(Vec<ChatMessage>),
    /// Literal continuation text, sent without any template wrapping
    Prompt(String),
}

/// A single completion call
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub input: CompletionInput,
    pub options: GenerationOptions,
}

impl CompletionRequest {
    pub fn chat(messages: Vec<ChatMessage>, options: GenerationOptions) -> Self {
        Self {
            input: CompletionInput::Messages(messages),
            options,
        }
    }

    pub fn raw(prompt: impl Into<String>, options: GenerationOptions) -> Self {
        Self {
            input: CompletionInput::Prompt(prompt.into()),
            options,
        }
    }
}

/// Await every fragment of a completion stream and join them
pub async fn collect_stream(
    mut stream: futures::stream::BoxStream<'static, Result<String>>,
) -> Result<String> {
    use futures::StreamExt;

    let mut text = String::new();
    while let Some(fragment) = stream.next().await {
        text.push_str(&fragment?);
    }
    Ok(text)
}

// ============================================================================
// Entity Tagging Types
// ============================================================================

/// One recognised entity span
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaggedEntity {
    pub text: String,
    pub label: String,
}

impl TaggedEntity {
    pub fn new(text: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            label: label.into(),
        }
    }
}

/// Token, part-of-speech and entity annotations for a text
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaggerOutput {
    pub tokens: Vec<String>,
    pub pos_tags: Vec<String>,
    /// Entities in document order
    pub entities: Vec<TaggedEntity>,
}

// ============================================================================
// Traits
// ============================================================================

/// Trait for text completion backends
#[async_trait::async_trait]
pub trait CompletionBackend: Send + Sync {
    /// Generate the full completion
    async fn complete(&self, request: &CompletionRequest) -> Result<String>;

    /// Generate the completion as a stream of text fragments
    async fn complete_stream(
        &self,
        request: &CompletionRequest,
    ) -> Result<futures::stream::BoxStream<'static, Result<String>>>;

    /// Get backend name for logging
    fn name(&self) -> &str;
}

/// Trait for named entity taggers
#[async_trait::async_trait]
pub trait EntityTagger: Send + Sync {
    /// Annotate `text`, restricted to `labels` (empty means every label)
    async fn tag(&self, text: &str, labels: &[String]) -> Result<TaggerOutput>;

    /// Labels this tagger can emit
    async fn labels(&self) -> Result<Vec<String>>;
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn record(e1: &str, e2: &str) -> RelationRecord {
        RelationRecord::new(
            "CONTRACTED_WITH",
            RelationEntity::new(e1, "ORG"),
            RelationEntity::new(e2, "ORG"),
            "Carmichael engaged OneSteel for the shipment",
        )
    }

    #[test]
    fn test_strip_angle_brackets() {
        assert_eq!(
            strip_angle_brackets("<PETITIONER>Carmichael</PETITIONER>"),
            "Carmichael"
        );
        assert_eq!(strip_angle_brackets("OneSteel"), "OneSteel");
        assert_eq!(strip_angle_brackets("<ORG>BBC"), "BBC");
    }

    #[test]
    fn test_entity_type_from_label() {
        assert_eq!(EntityType::from_label("court"), EntityType::Court);
        assert_eq!(EntityType::from_label("CASE_NUMBER"), EntityType::CaseNumber);
        assert_eq!(EntityType::from_label("VESSEL"), EntityType::Other);
        assert!(EntityType::Judge.is_person_like());
        assert!(!EntityType::Court.is_person_like());
    }

    #[test]
    fn test_self_loop_detection_uses_bare_names() {
        assert!(record("<ORG>OneSteel</ORG>", "OneSteel").is_self_loop());
        assert!(!record("Carmichael", "OneSteel").is_self_loop());
    }

    #[test]
    fn test_record_completeness() {
        let mut r = record("Carmichael", "OneSteel");
        assert!(r.is_complete());
        r.additional_info.description = "  ".to_string();
        assert!(!r.is_complete());
    }

    #[test]
    fn test_record_wire_format() {
        let json = serde_json::to_value(record("Carmichael", "OneSteel")).unwrap();
        assert_eq!(json["entity1"]["type"], "ORG");
        assert_eq!(
            json["additional_info"]["description"],
            "Carmichael engaged OneSteel for the shipment"
        );
        assert!(json["additional_info"].as_object().unwrap().len() == 1);
    }

    #[test]
    fn test_additional_info_keeps_extra_keys() {
        let raw = r#"{"relation":"HEARD_BY","entity1":{"entity":"A","type":"ORG"},
            "entity2":{"entity":"B","type":"COURT"},
            "additional_info":{"description":"d","source":{"para":"6.15"}}}"#;
        let r: RelationRecord = serde_json::from_str(raw).unwrap();
        assert_eq!(r.additional_info.extra["source"]["para"], "6.15");
    }

    #[test]
    fn test_generation_defaults() {
        let options = GenerationOptions::default().with_max_tokens(2048);
        assert_eq!(options.seed, 10);
        assert_eq!(options.max_tokens, 2048);
        assert_eq!(options.top_k, 30);
    }

    #[test]
    fn test_malformed_output_keeps_raw_text() {
        let err = LexError::MalformedOutput {
            message: "no relation objects".to_string(),
            raw: "I cannot help".to_string(),
        };
        assert_eq!(err.raw_output(), Some("I cannot help"));
        assert!(LexError::Completion("x".into()).raw_output().is_none());
    }
}
