//! Document chat
//!
//! Two transcripts are kept. The visible one is what the user sees. The
//! hidden one is what the model is sent, and additionally carries the tagged
//! document and extracted relations inside hidden-message markers.

use std::sync::Arc;

use lexgraph_core::{
    collect_stream, ChatMessage, CompletionBackend, CompletionRequest, GenerationOptions,
    RelationRecord, Result,
};
use lexgraph_extractor::{BuildState, GraphBuildSession, IncrementalGraphBuilder, TaggedDocument};

pub const GREETING: &str = "Hey! I'm SCOTi. Ask me a question using the box below to get started.";
pub const RESET_GREETING: &str = "Let's start a new conversation. What would you like to ask me?";
pub const GRAPH_COMMAND: &str = "Show me the relation graph for this document";
pub const NO_DOCUMENT_REPLY: &str =
    "Please return to the entity extraction page and upload a document first.";
pub const GRAPH_REPLY: &str = "Here is the relation graph for your document.";

pub const HIDDEN_START: &str = "<hidden_message_start>";
pub const HIDDEN_END: &str = "<hidden_message_end>";
const HIDDEN_NOTICE: &str = "Only you can see this message keep it hidden from the user.";

/// Chat behaviour settings
#[derive(Debug, Clone)]
pub struct ChatConfig {
    /// Show relation JSON (for an interactive viewer) instead of DOT
    pub interactive: bool,
    /// Read replies from the streaming endpoint
    pub stream: bool,
    pub options: GenerationOptions,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            interactive: true,
            stream: false,
            options: GenerationOptions::default(),
        }
    }
}

/// A chat about one (optional) tagged document
pub struct DocumentChat {
    backend: Arc<dyn CompletionBackend>,
    builder: IncrementalGraphBuilder,
    config: ChatConfig,
    visible: Vec<ChatMessage>,
    hidden: Vec<ChatMessage>,
    session: Option<GraphBuildSession>,
}

impl DocumentChat {
    pub fn new(
        backend: Arc<dyn CompletionBackend>,
        builder: IncrementalGraphBuilder,
        config: ChatConfig,
    ) -> Self {
        Self {
            backend,
            builder,
            config,
            visible: vec![ChatMessage::assistant(GREETING)],
            hidden: vec![ChatMessage::assistant(GREETING)],
            session: None,
        }
    }

    /// Make `document` the subject of graph requests
    pub fn attach_document(&mut self, document: &TaggedDocument) {
        tracing::info!(entities = document.entities.len(), "Document attached to chat");
        self.session = Some(GraphBuildSession::new(&document.tagged));
    }

    pub fn has_document(&self) -> bool {
        self.session.is_some()
    }

    /// Messages shown to the user
    pub fn visible_transcript(&self) -> &[ChatMessage] {
        &self.visible
    }

    /// Messages sent to the model
    pub fn hidden_transcript(&self) -> &[ChatMessage] {
        &self.hidden
    }

    /// The relation graph built so far for the attached document
    pub fn relation_graph(&self) -> Option<&[RelationRecord]> {
        self.session.as_ref().map(|s| s.graph())
    }

    pub fn graph_state(&self) -> Option<BuildState> {
        self.session.as_ref().map(|s| s.state())
    }

    /// Send a user message and return the visible reply.
    ///
    /// On error neither transcript changes.
    pub async fn send(&mut self, user_text: &str) -> Result<String> {
        let (visible_reply, hidden_reply) = if is_graph_command(user_text) {
            self.graph_reply().await?
        } else {
            let reply = self.complete(user_text).await?;
            (reply.clone(), reply)
        };

        self.visible.push(ChatMessage::user(user_text));
        self.visible.push(ChatMessage::assistant(visible_reply.clone()));
        self.hidden.push(ChatMessage::user(user_text));
        self.hidden.push(ChatMessage::assistant(hidden_reply));
        Ok(visible_reply)
    }

    /// Start a new conversation; the attached document's graph is discarded
    pub fn reset(&mut self) {
        self.visible = vec![ChatMessage::assistant(RESET_GREETING)];
        self.hidden = vec![ChatMessage::assistant(RESET_GREETING)];
        if let Some(session) = self.session.as_mut() {
            self.builder.cancel(session);
        }
    }

    async fn complete(&self, user_text: &str) -> Result<String> {
        let mut messages = self.hidden.clone();
        messages.push(ChatMessage::user(user_text));
        let request = CompletionRequest::chat(messages, self.config.options.clone());

        tracing::debug!(turns = request_turns(&request), stream = self.config.stream, "Chat completion");
        if self.config.stream {
            collect_stream(self.backend.complete_stream(&request).await?).await
        } else {
            self.backend.complete(&request).await
        }
    }

    /// One builder step, rendered as (visible, hidden) replies
    async fn graph_reply(&mut self) -> Result<(String, String)> {
        let Some(session) = self.session.as_mut() else {
            return Ok((NO_DOCUMENT_REPLY.to_string(), NO_DOCUMENT_REPLY.to_string()));
        };

        let drawing = if session.is_finished() {
            tracing::debug!("Relation graph already finished, reusing it");
            lexgraph_extractor::draw_relation_graph(session.graph())
        } else {
            self.builder.step(session).await?.graph_drawing
        };

        let relation_json = serde_json::to_string(session.graph())?;
        let hidden = format!(
            "{HIDDEN_START}{HIDDEN_NOTICE}\n\
             Here is a document with entities extracted using NLP. The entities are represented \
             using angled bracket tags, for example <DATE>17 December 2020</DATE> represents a \
             detected date. Note there may be entities that have not been detected, or some \
             entities may accidentally be tagged with the wrong label. Therefore use your own \
             discretion when reading the document and only refer to the labels as a rough \
             guideline.\n\n{document}\n{HIDDEN_END}\n\
             \n{HIDDEN_START}{HIDDEN_NOTICE}\n\
             Here are the relations between the entities that have been extracted using a \
             specialized NLP relation extractor.\n{relation_json}\n{HIDDEN_END}\n\
             {GRAPH_REPLY}",
            document = session.tagged_document(),
        );

        let visible = if self.config.interactive {
            format!("{GRAPH_REPLY}\n{relation_json}")
        } else {
            format!("{GRAPH_REPLY}\n{drawing}")
        };

        Ok((visible, hidden))
    }
}

fn request_turns(request: &CompletionRequest) -> usize {
    match &request.input {
        lexgraph_core::CompletionInput::Messages(messages) => messages.len(),
        lexgraph_core::CompletionInput::Prompt(_) => 1,
    }
}

/// Whether `text` is the relation graph command, ignoring case and spacing
pub fn is_graph_command(text: &str) -> bool {
    let normalized = text.split_whitespace().collect::<Vec<_>>().join(" ");
    normalized.eq_ignore_ascii_case(GRAPH_COMMAND)
}

/// Remove every hidden-message block from `text`
pub fn strip_hidden(text: &str) -> String {
    let mut visible = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(start) = rest.find(HIDDEN_START) {
        visible.push_str(&rest[..start]);
        let after = &rest[start + HIDDEN_START.len()..];
        rest = match after.find(HIDDEN_END) {
            Some(end) => after[end + HIDDEN_END.len()..].trim_start_matches('\n'),
            None => "",
        };
    }
    visible.push_str(rest);
    visible
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use futures::stream::{BoxStream, StreamExt};
    use lexgraph_core::{BuilderConfig, ChatTemplate, CompletionInput, LexError};
    use lexgraph_extractor::RelationEngine;

    /// Replies to chat turns with a canned answer and to raw prompts with one record
    struct CannedBackend {
        chat_reply: Result<String>,
        seen: Mutex<Vec<CompletionInput>>,
    }

    const RECORD: &str = r#"{"relation": "PRESIDED_OVER", "entity1": {"entity": "<JUDGE>Nariman</JUDGE>", "type": "JUDGE"}, "entity2": {"entity": "<CASE_NUMBER>528 of 2018</CASE_NUMBER>", "type": "CASE_NUMBER"}, "additional_info": {"description": "Nariman J. heard the petition"}}]"#;

    impl CannedBackend {
        fn reply(&self, request: &CompletionRequest) -> Result<String> {
            self.seen.lock().unwrap().push(request.input.clone());
            match &request.input {
                CompletionInput::Prompt(_) => Ok(RECORD.to_string()),
                CompletionInput::Messages(_) => match &self.chat_reply {
                    Ok(reply) => Ok(reply.clone()),
                    Err(_) => Err(LexError::Completion("timeout".to_string())),
                },
            }
        }
    }

    #[async_trait]
    impl CompletionBackend for CannedBackend {
        async fn complete(&self, request: &CompletionRequest) -> Result<String> {
            self.reply(request)
        }

        async fn complete_stream(
            &self,
            request: &CompletionRequest,
        ) -> Result<BoxStream<'static, Result<String>>> {
            let reply = self.reply(request)?;
            let (head, tail) = reply.split_at(reply.len() / 2);
            let pieces = vec![Ok(head.to_string()), Ok(tail.to_string())];
            Ok(futures::stream::iter(pieces).boxed())
        }

        fn name(&self) -> &str {
            "canned"
        }
    }

    fn chat_with(chat_reply: Result<String>, config: ChatConfig) -> (DocumentChat, Arc<CannedBackend>) {
        let backend = Arc::new(CannedBackend {
            chat_reply,
            seen: Mutex::new(Vec::new()),
        });
        let engine = RelationEngine::new(backend.clone(), ChatTemplate::Mistral);
        let builder = IncrementalGraphBuilder::new(
            engine,
            &BuilderConfig {
                min_chunk_chars: 10,
                ..Default::default()
            },
        );
        (DocumentChat::new(backend.clone(), builder, config), backend)
    }

    fn document() -> TaggedDocument {
        TaggedDocument {
            text: "Nariman heard 528 of 2018.".to_string(),
            tagged: "<JUDGE>Nariman</JUDGE> heard <CASE_NUMBER>528 of 2018</CASE_NUMBER>."
                .to_string(),
            entities: Vec::new(),
        }
    }

    #[test]
    fn test_graph_command_matching() {
        assert!(is_graph_command("Show me the relation graph for this document"));
        assert!(is_graph_command("  show me the RELATION graph\tfor this document "));
        assert!(!is_graph_command("Show me the relation graph"));
    }

    #[test]
    fn test_strip_hidden() {
        let text = format!("{HIDDEN_START}secret{HIDDEN_END}\nHello {HIDDEN_START}more{HIDDEN_END}there");
        assert_eq!(strip_hidden(&text), "Hello there");
        assert_eq!(strip_hidden("plain"), "plain");
    }

    #[tokio::test]
    async fn test_chat_reply_updates_both_transcripts() {
        let (mut chat, backend) = chat_with(Ok("The petition was dismissed.".to_string()), ChatConfig::default());

        let reply = chat.send("What happened?").await.unwrap();

        assert_eq!(reply, "The petition was dismissed.");
        assert_eq!(chat.visible_transcript().len(), 3);
        assert_eq!(chat.hidden_transcript().len(), 3);
        match &backend.seen.lock().unwrap()[0] {
            CompletionInput::Messages(messages) => {
                assert_eq!(messages[0].content, GREETING);
                assert_eq!(messages[1].content, "What happened?");
            }
            other => panic!("unexpected input {other:?}"),
        };
    }

    #[tokio::test]
    async fn test_streaming_chat_is_joined() {
        let config = ChatConfig {
            stream: true,
            ..Default::default()
        };
        let (mut chat, _) = chat_with(Ok("Streaming reply".to_string()), config);
        assert_eq!(chat.send("Hi").await.unwrap(), "Streaming reply");
    }

    #[tokio::test]
    async fn test_failed_reply_keeps_transcripts() {
        let (mut chat, _) = chat_with(Err(LexError::Completion("x".into())), ChatConfig::default());
        assert!(chat.send("Hello?").await.is_err());
        assert_eq!(chat.visible_transcript().len(), 1);
        assert_eq!(chat.hidden_transcript().len(), 1);
    }

    #[tokio::test]
    async fn test_graph_command_without_document() {
        let (mut chat, backend) = chat_with(Ok(String::new()), ChatConfig::default());
        let reply = chat.send(GRAPH_COMMAND).await.unwrap();
        assert_eq!(reply, NO_DOCUMENT_REPLY);
        assert!(backend.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_graph_command_steps_builder() {
        let (mut chat, _) = chat_with(Ok(String::new()), ChatConfig::default());
        chat.attach_document(&document());

        let reply = chat.send(GRAPH_COMMAND).await.unwrap();

        assert!(reply.starts_with(GRAPH_REPLY));
        assert!(reply.contains("PRESIDED_OVER"));
        assert_eq!(chat.relation_graph().unwrap().len(), 1);

        let hidden = &chat.hidden_transcript().last().unwrap().content;
        assert!(hidden.contains("<JUDGE>Nariman</JUDGE> heard"));
        assert!(hidden.ends_with(GRAPH_REPLY));
        assert_eq!(strip_hidden(hidden).trim(), GRAPH_REPLY);
    }

    #[tokio::test]
    async fn test_graph_command_dot_mode() {
        let config = ChatConfig {
            interactive: false,
            ..Default::default()
        };
        let (mut chat, _) = chat_with(Ok(String::new()), config);
        chat.attach_document(&document());

        let reply = chat.send(GRAPH_COMMAND).await.unwrap();
        assert!(reply.contains("digraph G {"));
        assert!(reply.contains("\"Nariman\" -> \"528 of 2018\""));
    }

    #[tokio::test]
    async fn test_reset_restores_greeting_and_cancels_graph() {
        let (mut chat, _) = chat_with(Ok("ok".to_string()), ChatConfig::default());
        chat.attach_document(&document());
        chat.send(GRAPH_COMMAND).await.unwrap();

        chat.reset();

        assert_eq!(chat.visible_transcript(), &[ChatMessage::assistant(RESET_GREETING)]);
        assert_eq!(chat.graph_state(), Some(BuildState::NotStarted));
        assert!(chat.relation_graph().unwrap().is_empty());
    }
}
