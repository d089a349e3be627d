//! Ordered conversation transcript

use crate::events::{AudioRef, Message};

/// Append-only list of messages.
#[derive(Debug, Clone, Default)]
pub struct ConversationHistory {
    messages: Vec<Message>,
}

impl ConversationHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an optional assistant greeting.
    pub fn seeded(greeting: Option<&str>) -> Self {
        let mut history = Self::new();
        if let Some(greeting) = greeting {
            history.push(Message::assistant(greeting, None, None));
        }
        history
    }

    /// Append a message and return its index.
    pub fn push(&mut self, message: Message) -> usize {
        self.messages.push(message);
        self.messages.len() - 1
    }

    pub fn get(&self, index: usize) -> Option<&Message> {
        self.messages.get(index)
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    #[allow(dead_code)]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Index of the newest message that carries a clip.
    pub fn latest_audio(&self) -> Option<(usize, &AudioRef)> {
        self.messages
            .iter()
            .enumerate()
            .rev()
            .find_map(|(index, message)| message.audio_ref.as_ref().map(|r| (index, r)))
    }

    /// The whole conversation as newline-joined `"<role>: <content>"` lines.
    pub fn transcript(&self) -> String {
        self.messages
            .iter()
            .map(Message::transcript_line)
            .collect::<Vec<_>>()
            .join("\n")
    }
}
