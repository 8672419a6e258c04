//! Chat templates
//!
//! Renders a chat history into the raw prompt format a model was trained
//! on, ending with an open assistant turn so that any text appended after
//! the rendered prompt is read as the beginning of the assistant's reply.

use serde::{Deserialize, Serialize};

use crate::config::ConfigError;
use crate::{ChatMessage, ChatRole};

/// Native prompt formats supported for raw continuation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatTemplate {
    /// `<s>[INST] .. [/INST]` instruction format
    #[default]
    Mistral,
    /// `<|im_start|>role .. <|im_end|>` format
    ChatMl,
}

impl ChatTemplate {
    /// Render `messages` as a continuation prompt with an open assistant turn
    pub fn render(&self, messages: &[ChatMessage]) -> String {
        match self {
            Self::Mistral => render_mistral(messages),
            Self::ChatMl => render_chatml(messages),
        }
    }
}

fn render_mistral(messages: &[ChatMessage]) -> String {
    let mut prompt = String::from("<s>");
    let mut pending_system: Option<&str> = None;

    for message in messages {
        match message.role {
            ChatRole::System => pending_system = Some(&message.content),
            ChatRole::User => {
                prompt.push_str("[INST] ");
                if let Some(system) = pending_system.take() {
                    prompt.push_str(system);
                    prompt.push_str("\n\n");
                }
                prompt.push_str(&message.content);
                prompt.push_str(" [/INST]");
            }
            ChatRole::Assistant => {
                prompt.push_str(&message.content);
                prompt.push_str("</s>");
            }
        }
    }

    prompt
}

fn render_chatml(messages: &[ChatMessage]) -> String {
    let mut prompt = String::new();

    for message in messages {
        let role = match message.role {
            ChatRole::System => "system",
            ChatRole::User => "user",
            ChatRole::Assistant => "assistant",
        };
        prompt.push_str("<|im_start|>");
        prompt.push_str(role);
        prompt.push('\n');
        prompt.push_str(&message.content);
        prompt.push_str("<|im_end|>\n");
    }

    prompt.push_str("<|im_start|>assistant\n");
    prompt
}

impl std::str::FromStr for ChatTemplate {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mistral" | "llama2" | "inst" => Ok(Self::Mistral),
            "chatml" => Ok(Self::ChatMl),
            _ => Err(ConfigError::InvalidValue {
                key: "CHAT_TEMPLATE".to_string(),
                value: s.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mistral_single_turn() {
        let prompt = ChatTemplate::Mistral.render(&[ChatMessage::user("Extract relations")]);
        assert_eq!(prompt, "<s>[INST] Extract relations [/INST]");
    }

    #[test]
    fn test_mistral_folds_system_into_user_turn() {
        let prompt = ChatTemplate::Mistral.render(&[
            ChatMessage::system("Be brief."),
            ChatMessage::user("Hi"),
            ChatMessage::assistant("Hello"),
            ChatMessage::user("Who is the judge?"),
        ]);
        assert_eq!(
            prompt,
            "<s>[INST] Be brief.\n\nHi [/INST]Hello</s>[INST] Who is the judge? [/INST]"
        );
    }

    #[test]
    fn test_chatml_ends_with_open_assistant_turn() {
        let prompt = ChatTemplate::ChatMl.render(&[ChatMessage::user("Hi")]);
        assert!(prompt.starts_with("<|im_start|>user\nHi<|im_end|>\n"));
        assert!(prompt.ends_with("<|im_start|>assistant\n"));
    }

    #[test]
    fn test_template_parse() {
        assert_eq!("ChatML".parse::<ChatTemplate>().unwrap(), ChatTemplate::ChatMl);
        assert_eq!("mistral".parse::<ChatTemplate>().unwrap(), ChatTemplate::Mistral);
        assert!("alpaca".parse::<ChatTemplate>().is_err());
    }
}
