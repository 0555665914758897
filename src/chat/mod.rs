//! Chat platform boundary.
//!
//! [`ChatApi`] is the narrow contract the relay needs from the chat
//! platform. Every failure is classified once, here, into a [`ChatErrorKind`]
//! so callers never match on error strings:
//!
//! - **AlreadySatisfied**: the reaction is already present (or already
//!   absent). Callers treat this as success.
//! - **Transient**: rate limits, 5xx, timeouts. Retry later.
//! - **Permanent**: the channel or message is gone, or auth is broken.

pub mod format;
pub mod slack;

use std::collections::BTreeSet;
use std::fmt;

use async_trait::async_trait;
use thiserror::Error;

use crate::types::{ChannelId, MessageTs};

pub use format::{ChatMessage, opened_message};
pub use slack::SlackClient;

/// The kind of chat API error, categorized for retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatErrorKind {
    AlreadySatisfied,
    Transient,
    Permanent,
}

/// A chat API error with categorization for retry decisions.
#[derive(Debug, Clone, Error)]
pub struct ChatError {
    pub kind: ChatErrorKind,
    /// The platform's error code (e.g. `channel_not_found`), if it sent one.
    pub code: Option<String>,
    pub message: String,
}

impl fmt::Display for ChatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.code {
            Some(code) => write!(f, "chat API error ({}): {}", code, self.message),
            None => write!(f, "chat API error: {}", self.message),
        }
    }
}

impl ChatError {
    pub fn transient(message: impl Into<String>) -> Self {
        ChatError {
            kind: ChatErrorKind::Transient,
            code: None,
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        ChatError {
            kind: ChatErrorKind::Permanent,
            code: None,
            message: message.into(),
        }
    }

    pub fn already_satisfied(code: impl Into<String>) -> Self {
        let code = code.into();
        ChatError {
            kind: ChatErrorKind::AlreadySatisfied,
            message: code.clone(),
            code: Some(code),
        }
    }

    pub fn is_retriable(&self) -> bool {
        self.kind == ChatErrorKind::Transient
    }
}

/// Operations the relay performs against the chat platform.
#[async_trait]
pub trait ChatApi: Send + Sync {
    /// Posts a message and returns its timestamp handle.
    async fn post_message(
        &self,
        channel: &ChannelId,
        message: &ChatMessage,
    ) -> Result<MessageTs, ChatError>;

    async fn add_reaction(
        &self,
        channel: &ChannelId,
        ts: &MessageTs,
        emoji: &str,
    ) -> Result<(), ChatError>;

    async fn remove_reaction(
        &self,
        channel: &ChannelId,
        ts: &MessageTs,
        emoji: &str,
    ) -> Result<(), ChatError>;

    /// Emoji the relay's own bot user currently has on a message.
    async fn reactions(
        &self,
        channel: &ChannelId,
        ts: &MessageTs,
    ) -> Result<BTreeSet<String>, ChatError>;

    /// Looks up a channel ID by name (without the leading `#`).
    async fn resolve_channel(&self, name: &str) -> Result<Option<ChannelId>, ChatError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_code() {
        let err = ChatError {
            kind: ChatErrorKind::Permanent,
            code: Some("channel_not_found".into()),
            message: "reactions.add failed".into(),
        };
        assert_eq!(
            err.to_string(),
            "chat API error (channel_not_found): reactions.add failed"
        );
        assert_eq!(
            ChatError::transient("timed out").to_string(),
            "chat API error: timed out"
        );
    }

    #[test]
    fn only_transient_is_retriable() {
        assert!(ChatError::transient("x").is_retriable());
        assert!(!ChatError::permanent("x").is_retriable());
        assert!(!ChatError::already_satisfied("already_reacted").is_retriable());
    }
}
