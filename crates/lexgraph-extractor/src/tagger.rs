//! Entity tagging
//!
//! Provides two `EntityTagger` adapters:
//! - Rule-based: regex patterns + dictionary matching for legal text
//! - HTTP: the NLP service hosting the legal NER model
//!
//! and turns tagger output into the angle-bracket tagged document that the
//! relation engine reads.

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use lexgraph_core::{EntityTagger, EntityType, LexError, Result, TaggedEntity, TaggerOutput};

// ============================================================================
// Tagged documents
// ============================================================================

/// A document together with its angle-bracket tagged rendering
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaggedDocument {
    /// Original text
    pub text: String,
    /// Text with every entity wrapped as `<LABEL>entity</LABEL>`
    pub tagged: String,
    /// Entities in document order
    pub entities: Vec<TaggedEntity>,
}

/// Wrap each entity occurrence in `<LABEL>..</LABEL>` tags.
///
/// Entities are located in order, each search starting where the previous
/// entity ended. An entity that does not occur after the cursor is skipped.
pub fn add_plaintext_tags(text: &str, entities: &[TaggedEntity]) -> String {
    let mut tagged = String::with_capacity(text.len() + entities.len() * 16);
    let mut cursor = 0;

    for entity in entities {
        if entity.text.is_empty() {
            continue;
        }
        let Some(offset) = text[cursor..].find(&entity.text) else {
            tracing::debug!(entity = %entity.text, "Entity not found after cursor, skipping");
            continue;
        };
        let start = cursor + offset;
        let end = start + entity.text.len();

        tagged.push_str(&text[cursor..start]);
        tagged.push('<');
        tagged.push_str(&entity.label);
        tagged.push('>');
        tagged.push_str(&entity.text);
        tagged.push_str("</");
        tagged.push_str(&entity.label);
        tagged.push('>');
        cursor = end;
    }

    tagged.push_str(&text[cursor..]);
    tagged
}

/// Run the tagger over `text` and build the tagged rendering
pub async fn tag_document(
    tagger: &dyn EntityTagger,
    text: &str,
    labels: &[String],
) -> Result<TaggedDocument> {
    let output = tagger.tag(text, labels).await?;
    tracing::info!(
        entities = output.entities.len(),
        tokens = output.tokens.len(),
        "Document tagged"
    );

    Ok(TaggedDocument {
        text: text.to_string(),
        tagged: add_plaintext_tags(text, &output.entities),
        entities: output.entities,
    })
}

// ============================================================================
// Rule-based tagger
// ============================================================================

/// A matched entity span
#[derive(Debug, Clone)]
struct Span {
    start: usize,
    end: usize,
    label: EntityType,
    confidence: f32,
}

/// Rule-based tagger using regex patterns and a dictionary of legal terms
pub struct RuleBasedTagger {
    /// Pattern rules (regex -> label)
    patterns: Vec<(Regex, EntityType, f32)>,
    /// Dictionary terms compiled to whole-word, case-insensitive regexes
    dictionary: Vec<(Regex, EntityType)>,
    token_pattern: Option<Regex>,
}

const MONTHS: &str =
    "January|February|March|April|May|June|July|August|September|October|November|December";

impl RuleBasedTagger {
    /// Create a new tagger with the default legal rules
    pub fn new() -> Self {
        let mut tagger = Self {
            patterns: Vec::new(),
            dictionary: Vec::new(),
            token_pattern: Regex::new(r"\w+(?:[.'’]\w+)*|[^\w\s]").ok(),
        };

        tagger.init_legal_patterns();
        tagger.init_legal_dictionary();
        tagger
    }

    fn init_legal_patterns(&mut self) {
        // Dates
        self.add_pattern(
            &format!(r"(?i)\b\d{{1,2}}(?:st|nd|rd|th)?\s+(?:{MONTHS}),?\s+\d{{4}}\b"),
            EntityType::Date,
            0.95,
        );
        self.add_pattern(
            &format!(r"(?i)\b(?:{MONTHS})\s+\d{{1,2}},\s+\d{{4}}\b"),
            EntityType::Date,
            0.95,
        );
        self.add_pattern(r"\b\d{2}\.\d{2}\.\d{2,4}\b", EntityType::Date, 0.85);
        self.add_pattern(r"\b\d{4}-\d{2}-\d{2}\b", EntityType::Date, 0.9);

        // Case numbers
        self.add_pattern(
            r"(?i)\b(?:Writ Petition|Civil Appeal|Criminal Appeal|Special Leave Petition|SLP|Case)\s*(?:\([A-Za-z]+\)\s*)?No\.?\s*\d+\s+of\s+\d{4}",
            EntityType::CaseNumber,
            0.95,
        );

        // Statutes: "Reserve Bank of India Act, 1934"
        self.add_pattern(
            r"\b[A-Z][A-Za-z]*(?:\s+(?:of|and|the|[A-Z][A-Za-z]*))*\s+Act,?\s+\d{4}\b",
            EntityType::Statute,
            0.9,
        );

        // Provisions: "Section 45L", "s.35A(1)(a)", "Art.19(1)(g)"
        self.add_pattern(
            r"\b(?:Section|Sec\.|ss?\.|Article|Art\.)\s?\d+[A-Z]*(?:\(\w+\))*",
            EntityType::Provision,
            0.85,
        );

        // Courts
        self.add_pattern(
            r"\b(?:Supreme|High|District|Federal|Family) Court(?: of [A-Z][a-z]+(?: [A-Z][a-z]+)*)?",
            EntityType::Court,
            0.9,
        );

        // Judges
        self.add_pattern(
            r"\b(?:Justice|Hon'ble Justice|Judge)\s+[A-Z](?:[a-z]+|\.)(?:\s+[A-Z](?:[a-z]+|\.))*",
            EntityType::Judge,
            0.8,
        );

        // Organisations by suffix
        self.add_pattern(
            r"\b[A-Z][A-Za-z&]*(?:\s+(?:of|and|[A-Z][A-Za-z&]*))*\s+(?:Ltd|Limited|Inc|Corporation|Bank|Commission|Association|Group)\b\.?",
            EntityType::Org,
            0.75,
        );
    }

    fn init_legal_dictionary(&mut self) {
        // Regulators and institutions
        self.add_term("Reserve Bank of India", EntityType::Org);
        self.add_term("RBI", EntityType::Org);
        self.add_term("Securities and Exchange Commission", EntityType::Org);
        self.add_term("SEC", EntityType::Org);

        // Courts
        self.add_term("Supreme Court", EntityType::Court);
        self.add_term("High Court", EntityType::Court);

        // Constitutional instruments
        self.add_term("Constitution of India", EntityType::Statute);

        // Places
        self.add_term("India", EntityType::Gpe);
        self.add_term("United States", EntityType::Gpe);
        self.add_term("U.S.", EntityType::Gpe);
        self.add_term("Australia", EntityType::Gpe);
    }

    /// Add a regex pattern
    fn add_pattern(&mut self, pattern: &str, label: EntityType, confidence: f32) {
        if let Ok(regex) = Regex::new(pattern) {
            self.patterns.push((regex, label, confidence));
        }
    }

    /// Add a dictionary term
    fn add_term(&mut self, term: &str, label: EntityType) {
        let escaped = regex::escape(term);
        // `\b` cannot follow a trailing '.', so only anchor word characters
        let tail = if term.ends_with(|c: char| c.is_alphanumeric()) {
            r"\b"
        } else {
            ""
        };
        if let Ok(regex) = Regex::new(&format!(r"\b{escaped}{tail}")) {
            self.dictionary.push((regex, label));
        }
    }

    fn find_spans(&self, text: &str) -> Vec<Span> {
        let mut spans = Vec::new();

        for (regex, label, confidence) in &self.patterns {
            for mat in regex.find_iter(text) {
                spans.push(Span {
                    start: mat.start(),
                    end: mat.end(),
                    label: *label,
                    confidence: *confidence,
                });
            }
        }

        for (regex, label) in &self.dictionary {
            for mat in regex.find_iter(text) {
                spans.push(Span {
                    start: mat.start(),
                    end: mat.end(),
                    label: *label,
                    confidence: 0.95,
                });
            }
        }

        spans
    }

    /// Remove overlapping spans, preferring the longest then most confident
    fn resolve_overlaps(mut spans: Vec<Span>) -> Vec<Span> {
        spans.sort_by(|a, b| {
            a.start
                .cmp(&b.start)
                .then((b.end - b.start).cmp(&(a.end - a.start)))
                .then(b.confidence.total_cmp(&a.confidence))
        });

        let mut kept: Vec<Span> = Vec::new();
        for span in spans {
            match kept.last() {
                Some(last) if span.start < last.end => continue,
                _ => kept.push(span),
            }
        }
        kept
    }

    fn tokenize(&self, text: &str) -> (Vec<String>, Vec<String>) {
        let Some(pattern) = &self.token_pattern else {
            return (Vec::new(), Vec::new());
        };

        pattern
            .find_iter(text)
            .map(|m| {
                let token = m.as_str();
                (token.to_string(), coarse_pos(token).to_string())
            })
            .unzip()
    }

    /// Labels this tagger can produce
    pub fn supported_labels(&self) -> Vec<String> {
        let mut labels: Vec<EntityType> = self
            .patterns
            .iter()
            .map(|(_, label, _)| *label)
            .chain(self.dictionary.iter().map(|(_, label)| *label))
            .collect();
        labels.sort_by_key(|l| l.as_str());
        labels.dedup();
        labels.into_iter().map(|l| l.as_str().to_string()).collect()
    }

    /// Tag `text` synchronously
    pub fn tag_text(&self, text: &str, labels: &[String]) -> TaggerOutput {
        let wanted: Vec<EntityType> = labels.iter().map(|l| EntityType::from_label(l)).collect();

        let spans: Vec<Span> = self
            .find_spans(text)
            .into_iter()
            .filter(|s| wanted.is_empty() || wanted.contains(&s.label))
            .collect();

        let entities = Self::resolve_overlaps(spans)
            .into_iter()
            .map(|s| TaggedEntity::new(&text[s.start..s.end], s.label.as_str()))
            .collect();

        let (tokens, pos_tags) = self.tokenize(text);
        TaggerOutput {
            tokens,
            pos_tags,
            entities,
        }
    }
}

/// Coarse universal POS guess; only punctuation, numbers and capitalised words are told apart
fn coarse_pos(token: &str) -> &'static str {
    let mut chars = token.chars();
    match chars.next() {
        Some(c) if !c.is_alphanumeric() && c != '_' => "PUNCT",
        Some(c) if c.is_ascii_digit() => "NUM",
        Some(c) if c.is_uppercase() => "PROPN",
        Some(_) => "X",
        None => "X",
    }
}

impl Default for RuleBasedTagger {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EntityTagger for RuleBasedTagger {
    async fn tag(&self, text: &str, labels: &[String]) -> Result<TaggerOutput> {
        Ok(self.tag_text(text, labels))
    }

    async fn labels(&self) -> Result<Vec<String>> {
        Ok(self.supported_labels())
    }
}

// ============================================================================
// HTTP tagger
// ============================================================================

/// Client for the NLP service that hosts the legal NER model
pub struct HttpTagger {
    client: Client,
    base_url: String,
}

#[derive(Debug, Serialize)]
struct ProcessTextRequest<'a> {
    text: &'a str,
    labels: &'a [String],
}

#[derive(Debug, Deserialize)]
struct ProcessTextResponse {
    #[serde(default)]
    tokens: Vec<String>,
    #[serde(default)]
    pos_tags: Vec<String>,
    ner_tags: Vec<(String, String)>,
}

impl From<ProcessTextResponse> for TaggerOutput {
    fn from(response: ProcessTextResponse) -> Self {
        Self {
            tokens: response.tokens,
            pos_tags: response.pos_tags,
            entities: response
                .ner_tags
                .into_iter()
                .map(|(text, label)| TaggedEntity { text, label })
                .collect(),
        }
    }
}

impl HttpTagger {
    /// Create a new client for the service at `base_url`
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl EntityTagger for HttpTagger {
    async fn tag(&self, text: &str, labels: &[String]) -> Result<TaggerOutput> {
        let response = self
            .client
            .post(format!("{}/process_text/", self.base_url))
            .json(&ProcessTextRequest { text, labels })
            .send()
            .await
            .map_err(|e| LexError::Tagger(format!("Request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(LexError::Tagger(format!("NLP API error ({status}): {error_text}")));
        }

        let body: ProcessTextResponse = response
            .json()
            .await
            .map_err(|e| LexError::Tagger(format!("Failed to parse response: {e}")))?;

        Ok(body.into())
    }

    async fn labels(&self) -> Result<Vec<String>> {
        let response = self
            .client
            .get(format!("{}/ner_labels/", self.base_url))
            .send()
            .await
            .map_err(|e| LexError::Tagger(format!("Request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(LexError::Tagger(format!("NLP API error ({status})")));
        }

        response
            .json()
            .await
            .map_err(|e| LexError::Tagger(format!("Failed to parse labels: {e}")))
    }
}

// ============================================================================
// Tests
// ============================================================================
