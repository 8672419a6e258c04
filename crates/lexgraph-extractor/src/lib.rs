//! lexgraph Extractor - Entity tagging and incremental relation graph building
//!
//! This crate turns a legal document into a relation graph:
//! - Entity tagging (rule-based or the remote NLP service) into an
//!   angle-bracket tagged document
//! - Chunking of the tagged document
//! - The relation engine: primed continuation prompts and structural
//!   recovery of relation records from model output
//! - The incremental builder driving the engine chunk by chunk
//! - DOT drawing and JSON persistence of relation graphs
//!
//! # Example
//!
//! ```ignore
//! use lexgraph_extractor::{GraphBuildSession, IncrementalGraphBuilder, RelationEngine};
//!
//! let engine = RelationEngine::new(backend, ChatTemplate::Mistral);
//! let builder = IncrementalGraphBuilder::new(engine, &config.builder);
//! let mut session = GraphBuildSession::new(tagged.tagged);
//! while !session.is_finished() {
//!     let outcome = builder.step(&mut session).await?;
//!     println!("{} relations", outcome.relation_records.len());
//! }
//! ```

pub mod builder;
pub mod chunker;
pub mod parse;
pub mod prompt;
pub mod relation;
pub mod render;
pub mod store;
pub mod tagger;

pub use builder::{BuildState, GraphBuildSession, IncrementalGraphBuilder, StepOutcome};
pub use chunker::{Chunk, Chunker, ChunkerConfig};
pub use parse::{find_relation_objects, parse_relation_records};
pub use relation::{RelationEngine, RelationExtension};
pub use render::{draw_relation_graph, node_degrees, summarize, GraphSummary, RelationGraph};
pub use store::{load_graph, save_graph};
pub use tagger::{add_plaintext_tags, tag_document, HttpTagger, RuleBasedTagger, TaggedDocument};

use std::sync::Arc;

use lexgraph_core::{EntityTagger, TaggerConfig};

/// Create an entity tagger from config
pub fn create_tagger(config: &TaggerConfig) -> Arc<dyn EntityTagger> {
    if config.use_remote {
        Arc::new(HttpTagger::new(&config.url))
    } else {
        Arc::new(RuleBasedTagger::new())
    }
}
