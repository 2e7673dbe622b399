//! Toast notifications surfaced from family events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToastKind {
    Mention,
    MemberJoined,
    MemberKicked,
}

/// A transient, dismissible notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Toast {
    pub id: String,
    pub kind: ToastKind,
    pub title: String,
    pub body: String,
    /// Deep-link target.
    pub chat_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Toast content before an id is assigned.
#[derive(Debug, Clone, PartialEq)]
pub struct ToastDraft {
    pub kind: ToastKind,
    pub title: String,
    pub body: String,
    pub chat_id: Option<String>,
}

impl ToastDraft {
    pub fn mention(from: &str, text: &str, chat_id: Option<String>) -> Self {
        Self {
            kind: ToastKind::Mention,
            title: format!("{} mentioned you", from),
            body: text.to_string(),
            chat_id,
        }
    }

    pub fn member_joined(display_name: &str) -> Self {
        Self {
            kind: ToastKind::MemberJoined,
            title: "New member".to_string(),
            body: format!("{} joined the family", display_name),
            chat_id: None,
        }
    }

    pub fn member_kicked(display_name: &str) -> Self {
        Self {
            kind: ToastKind::MemberKicked,
            title: "Member removed".to_string(),
            body: format!("{} left the family", display_name),
            chat_id: None,
        }
    }

    pub fn into_toast(self, id: String) -> Toast {
        Toast {
            id,
            kind: self.kind,
            title: self.title,
            body: self.body,
            chat_id: self.chat_id,
            created_at: Utc::now(),
        }
    }
}
