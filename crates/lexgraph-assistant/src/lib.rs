//! lexgraph Assistant - Chat over a tagged legal document
//!
//! `DocumentChat` answers free-form questions through the completion
//! backend and, on the relation graph command, advances the document's
//! graph build by one step and shows the graph so far.

pub mod chat;

pub use chat::{is_graph_command, strip_hidden, ChatConfig, DocumentChat, GRAPH_COMMAND};
