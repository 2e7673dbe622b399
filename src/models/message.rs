//! Chat message records and the per-chat message collection.

use serde::{Deserialize, Serialize};

/// A chat message as delivered by the REST API or a `new_message` frame.
/// Frames may omit author and timestamp fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: String,
    pub chat_id: String,
    #[serde(default)]
    pub author_id: Option<String>,
    #[serde(default)]
    pub author_username: Option<String>,
    #[serde(default)]
    pub author_display_name: Option<String>,
    pub text: String,
    #[serde(default)]
    pub edited: bool,
    #[serde(default)]
    pub reply_to_id: Option<String>,
    #[serde(default)]
    pub mentions: Vec<String>,
    /// Server timestamp, kept as sent (ISO 8601).
    #[serde(default)]
    pub created_at: Option<String>,
}

/// Messages of one chat in arrival order, unique by id.
#[derive(Debug, Clone, Default)]
pub struct MessageCollection {
    messages: Vec<MessageRecord>,
}

impl MessageCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from history, keeping the first occurrence of each id.
    pub fn from_history(records: impl IntoIterator<Item = MessageRecord>) -> Self {
        let mut collection = Self::new();
        for record in records {
            collection.insert(record);
        }
        collection
    }

    /// Append unless the id is already present. Returns whether the collection changed.
    pub fn insert(&mut self, record: MessageRecord) -> bool {
        if self.contains(&record.id) {
            return false;
        }
        self.messages.push(record);
        true
    }

    /// Replace the text of an existing message and mark it edited.
    pub fn edit(&mut self, id: &str, text: &str) -> bool {
        match self.messages.iter_mut().find(|m| m.id == id) {
            Some(message) => {
                message.text = text.to_string();
                message.edited = true;
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, id: &str) -> bool {
        match self.messages.iter().position(|m| m.id == id) {
            Some(index) => {
                self.messages.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.messages.iter().any(|m| m.id == id)
    }

    pub fn get(&self, id: &str) -> Option<&MessageRecord> {
        self.messages.iter().find(|m| m.id == id)
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn as_slice(&self) -> &[MessageRecord] {
        &self.messages
    }
}

#[cfg(test)]
pub(crate) fn record(id: &str, chat_id: &str, text: &str) -> MessageRecord {
    MessageRecord {
        id: id.to_string(),
        chat_id: chat_id.to_string(),
        author_id: None,
        author_username: None,
        author_display_name: None,
        text: text.to_string(),
        edited: false,
        reply_to_id: None,
        mentions: Vec::new(),
        created_at: None,
    }
}
