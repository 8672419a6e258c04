//! Graph persistence
//!
//! A stored graph is a plain text file holding the pretty-printed JSON
//! array of relation records, indented with four spaces.

use std::path::Path;

use lexgraph_core::{RelationRecord, Result};
use serde::Serialize;
use serde_json::ser::PrettyFormatter;

/// Serialize records as a JSON array indented with four spaces
pub fn to_pretty_json(records: &[RelationRecord]) -> Result<String> {
    let mut buf = Vec::new();
    let formatter = PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut buf, formatter);
    records.serialize(&mut serializer)?;
    Ok(String::from_utf8(buf).map_err(anyhow::Error::from)?)
}

/// Parse a stored graph; blank input is an empty graph
pub fn parse_graph_json(json: &str) -> Result<Vec<RelationRecord>> {
    if json.trim().is_empty() {
        return Ok(Vec::new());
    }
    Ok(serde_json::from_str(json)?)
}

/// Write `records` to `path`
pub fn save_graph(path: impl AsRef<Path>, records: &[RelationRecord]) -> Result<()> {
    let path = path.as_ref();
    std::fs::write(path, to_pretty_json(records)?)?;
    tracing::info!(path = %path.display(), relations = records.len(), "Graph saved");
    Ok(())
}

/// Read a graph previously written by [`save_graph`]
pub fn load_graph(path: impl AsRef<Path>) -> Result<Vec<RelationRecord>> {
    let path = path.as_ref();
    let records = parse_graph_json(&std::fs::read_to_string(path)?)?;
    tracing::debug!(path = %path.display(), relations = records.len(), "Graph loaded");
    Ok(records)
}
