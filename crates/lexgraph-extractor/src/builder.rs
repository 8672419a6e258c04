//! Incremental Graph Builder
//!
//! Drives the relation engine across a tagged document, one engine call per
//! [`IncrementalGraphBuilder::step`]. Each chunk is re-sent while the graph
//! keeps growing, up to a per-chunk iteration cap, and the builder then
//! moves on to the next chunk. The caller owns the [`GraphBuildSession`]
//! and must not step the same session concurrently.

use lexgraph_core::{BuilderConfig, LexError, RelationRecord, Result};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::chunker::{Chunk, Chunker};
use crate::relation::RelationEngine;
use crate::render::draw_relation_graph;
use crate::store::to_pretty_json;

// ============================================================================
// Session state
// ============================================================================

/// Where a session is in the build
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BuildState {
    NotStarted,
    ProcessingChunk { chunk_index: usize, iteration: u32 },
    Finished,
}

/// Graph-building state for one document
#[derive(Debug, Clone)]
pub struct GraphBuildSession {
    id: Uuid,
    tagged_document: String,
    graph: Vec<RelationRecord>,
    chunks: Vec<Chunk>,
    cursor: usize,
    state: BuildState,
    engine_calls: usize,
}

impl GraphBuildSession {
    /// Start a session for an angle-bracket tagged document
    pub fn new(tagged_document: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            tagged_document: tagged_document.into(),
            graph: Vec::new(),
            chunks: Vec::new(),
            cursor: 0,
            state: BuildState::NotStarted,
            engine_calls: 0,
        }
    }

    /// Start from a previously built graph instead of an empty one
    pub fn with_graph(mut self, graph: Vec<RelationRecord>) -> Self {
        self.graph = graph;
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn tagged_document(&self) -> &str {
        &self.tagged_document
    }

    pub fn state(&self) -> BuildState {
        self.state
    }

    pub fn is_finished(&self) -> bool {
        self.state == BuildState::Finished
    }

    /// The graph accumulated so far
    pub fn graph(&self) -> &[RelationRecord] {
        &self.graph
    }

    /// The accumulated graph as stored JSON
    pub fn graph_json(&self) -> Result<String> {
        to_pretty_json(&self.graph)
    }

    /// Chunks not yet advanced past
    pub fn remaining_chunks(&self) -> &[Chunk] {
        &self.chunks[self.cursor.min(self.chunks.len())..]
    }

    /// Index of the current chunk; equals the chunk count once finished
    pub fn chunk_cursor(&self) -> usize {
        self.cursor
    }

    /// Engine calls made by this session
    pub fn engine_calls(&self) -> usize {
        self.engine_calls
    }

    /// Take the accumulated graph out of the session
    pub fn take_graph(&mut self) -> Vec<RelationRecord> {
        std::mem::take(&mut self.graph)
    }

    fn finish(&mut self, chunk_count: usize) {
        self.state = BuildState::Finished;
        self.cursor = chunk_count;
        self.chunks.clear();
    }
}

/// What one builder step did
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepOutcome {
    /// State after the step
    pub state: BuildState,
    /// The session graph after the step
    pub relation_records: Vec<RelationRecord>,
    /// DOT drawing of `relation_records`
    pub graph_drawing: String,
    /// The engine returned more records than it was given
    pub progressed: bool,
    pub engine_called: bool,
}

// ============================================================================
// Builder
// ============================================================================

/// Chunked, iterate-until-no-growth driver for the relation engine
pub struct IncrementalGraphBuilder {
    engine: RelationEngine,
    chunker: Chunker,
    max_iterations_per_chunk: u32,
    max_new_tokens: u32,
}

impl IncrementalGraphBuilder {
    pub fn new(engine: RelationEngine, config: &BuilderConfig) -> Self {
        Self {
            engine,
            chunker: Chunker::with_min_chars(config.min_chunk_chars),
            max_iterations_per_chunk: config.max_iterations_per_chunk.max(1),
            max_new_tokens: config.max_new_tokens,
        }
    }

    pub fn engine(&self) -> &RelationEngine {
        &self.engine
    }

    pub fn max_iterations_per_chunk(&self) -> u32 {
        self.max_iterations_per_chunk
    }

    /// Perform one engine call and one state transition.
    ///
    /// On error the session is left exactly as it was, so the same step can
    /// be retried. Stepping a finished session is an `InvalidState` error.
    pub async fn step(&self, session: &mut GraphBuildSession) -> Result<StepOutcome> {
        let state = session.state;
        let (fresh_chunks, chunk_index, iteration) = match state {
            BuildState::Finished => {
                return Err(LexError::InvalidState(format!(
                    "graph build session {} has already finished",
                    session.id
                )));
            }
            BuildState::NotStarted => {
                let chunks = self.chunker.chunk(&session.tagged_document);
                if chunks.is_empty() {
                    tracing::info!(session = %session.id, "No tagged chunks, nothing to extract");
                    session.finish(0);
                    return Ok(self.outcome(session, false, false, None));
                }
                (Some(chunks), 0, 0)
            }
            BuildState::ProcessingChunk {
                chunk_index,
                iteration,
            } => (None, chunk_index, iteration),
        };

        let chunks = fresh_chunks.as_deref().unwrap_or(session.chunks.as_slice());
        let chunk_count = chunks.len();
        let chunk = chunks.get(chunk_index).ok_or_else(|| {
            LexError::InvalidState(format!(
                "chunk {chunk_index} out of range for {chunk_count} chunks"
            ))
        })?;

        tracing::info!(
            session = %session.id,
            chunk = chunk_index,
            of = chunk_count,
            iteration,
            relations = session.graph.len(),
            "Extending relation graph"
        );
        let extension = self
            .engine
            .extend(&chunk.text, &session.graph, self.max_new_tokens)
            .await?;

        // Commit only after the engine call succeeded
        if let Some(chunks) = fresh_chunks {
            session.chunks = chunks;
        }
        session.engine_calls += 1;

        let progressed = extension.relation_records.len() > session.graph.len();
        let drawing = if progressed {
            session.graph = extension.relation_records;
            Some(extension.graph_drawing)
        } else {
            None
        };

        let next_iteration = iteration + 1;
        if progressed && next_iteration < self.max_iterations_per_chunk {
            session.state = BuildState::ProcessingChunk {
                chunk_index,
                iteration: next_iteration,
            };
        } else if chunk_index + 1 < chunk_count {
            tracing::debug!(
                chunk = chunk_index,
                progressed,
                "Chunk converged, advancing"
            );
            session.cursor = chunk_index + 1;
            session.state = BuildState::ProcessingChunk {
                chunk_index: chunk_index + 1,
                iteration: 0,
            };
        } else {
            tracing::info!(
                session = %session.id,
                relations = session.graph.len(),
                engine_calls = session.engine_calls,
                "Relation graph finished"
            );
            session.finish(chunk_count);
        }

        Ok(self.outcome(session, progressed, true, drawing))
    }

    /// Tear the session back down to `NotStarted`, discarding its progress
    pub fn cancel(&self, session: &mut GraphBuildSession) {
        tracing::info!(session = %session.id, "Graph build cancelled");
        session.graph.clear();
        session.chunks.clear();
        session.cursor = 0;
        session.engine_calls = 0;
        session.state = BuildState::NotStarted;
    }

    /// Step until the session finishes, calling `on_step` after every step
    pub async fn run_to_completion<F>(
        &self,
        session: &mut GraphBuildSession,
        mut on_step: F,
    ) -> Result<Vec<RelationRecord>>
    where
        F: FnMut(&StepOutcome),
    {
        while !session.is_finished() {
            let outcome = self.step(session).await?;
            on_step(&outcome);
        }
        Ok(session.graph.clone())
    }

    fn outcome(
        &self,
        session: &GraphBuildSession,
        progressed: bool,
        engine_called: bool,
        drawing: Option<String>,
    ) -> StepOutcome {
        StepOutcome {
            state: session.state,
            relation_records: session.graph.clone(),
            graph_drawing: drawing.unwrap_or_else(|| draw_relation_graph(&session.graph)),
            progressed,
            engine_called,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
