//! Relation Extraction Engine
//!
//! One engine call extends the relation graph for one chunk of tagged text:
//! build the primed continuation prompt, run the completion backend in raw
//! mode, then recover the relation objects from primer + completion.

use std::sync::Arc;

use lexgraph_core::{
    collect_stream, ChatTemplate, CompletionBackend, CompletionRequest, GenerationOptions,
    RelationRecord, Result,
};
use serde::{Deserialize, Serialize};

use crate::parse::{parse_relation_records, retain_well_formed};
use crate::prompt::build_continuation_prompt;
use crate::render::draw_relation_graph;
use crate::store::parse_graph_json;

/// Result of one engine call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationExtension {
    /// DOT drawing of `relation_records`
    pub graph_drawing: String,
    /// Existing records followed by whatever the model added
    pub relation_records: Vec<RelationRecord>,
}

/// Engine extending a partial relation graph one chunk at a time
pub struct RelationEngine {
    backend: Arc<dyn CompletionBackend>,
    template: ChatTemplate,
    options: GenerationOptions,
    stream: bool,
}

impl RelationEngine {
    /// Create an engine with default generation options
    pub fn new(backend: Arc<dyn CompletionBackend>, template: ChatTemplate) -> Self {
        Self {
            backend,
            template,
            options: GenerationOptions::default(),
            stream: false,
        }
    }

    /// Use `options` for sampling; `max_tokens` is overridden per call
    pub fn with_options(mut self, options: GenerationOptions) -> Self {
        self.options = options;
        self
    }

    /// Read the completion as a stream and join it before parsing
    pub fn with_streaming(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    /// Extend `existing` with relations found in `chunk`.
    ///
    /// Backend and parse failures are returned as errors; nothing is
    /// defaulted to an empty graph.
    pub async fn extend(
        &self,
        chunk: &str,
        existing: &[RelationRecord],
        max_new_tokens: u32,
    ) -> Result<RelationExtension> {
        let (prompt, primer) = build_continuation_prompt(self.template, chunk, existing)?;
        tracing::debug!(
            prompt_chars = prompt.len(),
            existing = existing.len(),
            "Built continuation prompt"
        );

        let request = CompletionRequest::raw(
            prompt,
            self.options.clone().with_max_tokens(max_new_tokens),
        );

        tracing::info!(
            backend = self.backend.name(),
            stream = self.stream,
            max_new_tokens,
            "Requesting relation completion"
        );
        let completion = if self.stream {
            collect_stream(self.backend.complete_stream(&request).await?).await?
        } else {
            self.backend.complete(&request).await?
        };

        let output = format!("{primer}{completion}");
        let mut relation_records = parse_relation_records(&output)?;

        // The primer's records come back first and are kept as given; only
        // what the model added is filtered.
        let added = relation_records.split_off(existing.len().min(relation_records.len()));
        relation_records.extend(retain_well_formed(added));
        tracing::info!(
            before = existing.len(),
            after = relation_records.len(),
            "Relation graph extended"
        );

        Ok(RelationExtension {
            graph_drawing: draw_relation_graph(&relation_records),
            relation_records,
        })
    }

    /// Same as [`extend`](Self::extend) with the existing graph given as
    /// stored JSON text (blank for none)
    pub async fn extend_json(
        &self,
        chunk: &str,
        existing_relations: &str,
        max_new_tokens: u32,
    ) -> Result<RelationExtension> {
        let existing = parse_graph_json(existing_relations)?;
        self.extend(chunk, &existing, max_new_tokens).await
    }
}
