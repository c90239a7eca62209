//! Rendered transcript and structured conversation history.

use crate::models::Message;

/// Append-only markup text shown to the user.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transcript {
    text: String,
}

impl Transcript {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, markup: &str) {
        self.text.push_str(markup);
    }

    /// Append a new block, separated from earlier content by a newline.
    pub fn append_section(&mut self, markup: &str) {
        if !self.text.is_empty() {
            self.text.push('\n');
        }
        self.text.push_str(markup);
    }

    pub fn clear(&mut self) {
        self.text.clear();
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.text
    }
}

/// Ordered conversation history replayed to the model.
///
/// The first entry is always the system preamble.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct History {
    preamble: String,
    messages: Vec<Message>,
}

impl History {
    pub fn new(preamble: impl Into<String>) -> Self {
        let preamble = preamble.into();
        Self {
            messages: vec![Message::system(preamble.clone())],
            preamble,
        }
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Drop everything except a fresh system preamble.
    pub fn reset(&mut self) {
        self.messages.clear();
        self.messages.push(Message::system(self.preamble.clone()));
    }

    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    #[must_use]
    pub fn snapshot(&self) -> Vec<Message> {
        self.messages.clone()
    }
}
