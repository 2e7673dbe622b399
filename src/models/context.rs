//! Channel context: the family (and optional chat) a live connection is bound to.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{SyncError, SyncResult};

/// Scope of a live channel, derived from the context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelScope {
    /// Family-wide notifications: mentions, joins, kicks.
    Family,
    /// Message stream for a single chat.
    Chat,
}

/// Identifies the scope of one live connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelContext {
    pub family_id: String,
    #[serde(default)]
    pub chat_id: Option<String>,
}

impl ChannelContext {
    /// Family-wide context. Fails on an empty family id.
    pub fn family(family_id: impl Into<String>) -> SyncResult<Self> {
        let family_id = family_id.into();
        if family_id.trim().is_empty() {
            return Err(SyncError::InvalidContext("empty family id".to_string()));
        }
        Ok(Self {
            family_id,
            chat_id: None,
        })
    }

    /// Chat-scoped context inside a family.
    pub fn chat(family_id: impl Into<String>, chat_id: impl Into<String>) -> SyncResult<Self> {
        let chat_id = chat_id.into();
        if chat_id.trim().is_empty() {
            return Err(SyncError::InvalidContext("empty chat id".to_string()));
        }
        let mut context = Self::family(family_id)?;
        context.chat_id = Some(chat_id);
        Ok(context)
    }

    pub fn scope(&self) -> ChannelScope {
        if self.chat_id.is_some() {
            ChannelScope::Chat
        } else {
            ChannelScope::Family
        }
    }

    /// Server path of the channel endpoint.
    pub fn path(&self) -> String {
        match &self.chat_id {
            Some(chat_id) => format!("/families/{}/chats/{}/ws", self.family_id, chat_id),
            None => format!("/families/{}/ws", self.family_id),
        }
    }

    /// Full WebSocket URL given a `ws://` or `wss://` base.
    pub fn url(&self, ws_base: &str) -> String {
        format!("{}{}", ws_base.trim_end_matches('/'), self.path())
    }
}

impl fmt::Display for ChannelContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.chat_id {
            Some(chat_id) => write!(f, "family:{}/chat:{}", self.family_id, chat_id),
            None => write!(f, "family:{}", self.family_id),
        }
    }
}
