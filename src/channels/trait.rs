//! Gateway Trait
//!
//! Defines the interface the poll service needs from a chat platform.

use async_trait::async_trait;
use std::sync::Arc;

/// Result type for channel operations
pub type ChannelResult<T> = Result<T, ChannelError>;

/// Errors that can occur in channel operations
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Message send failed: {0}")]
    SendFailed(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Channel error: {0}")]
    Other(String),
}

/// A chat message delivered to the bot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundEvent {
    /// Identity asserted by the platform for the author
    pub sender_id: String,
    /// Channel the message was posted in; replies go here
    pub channel_id: String,
    /// Raw message text
    pub text: String,
    /// Whether the message came from a one-to-one conversation
    pub is_direct: bool,
}

/// The bot's own account on the platform
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BotIdentity {
    pub user_id: String,
    pub username: String,
}

impl BotIdentity {
    /// Whether `event` is addressed to the bot: a direct message, or a
    /// channel message mentioning it by username or user ID.
    pub fn is_addressed(&self, event: &InboundEvent) -> bool {
        if event.sender_id == self.user_id {
            return false;
        }
        event.is_direct
            || self
                .mentions()
                .any(|m| !mention_spans(&event.text, &m).is_empty())
    }

    /// Remove every mention of the bot from `text`
    pub fn strip_mentions(&self, text: &str) -> String {
        let mut stripped = text.to_string();
        for mention in self.mentions() {
            for (start, end) in mention_spans(&stripped, &mention).into_iter().rev() {
                stripped.replace_range(start..end, "");
            }
        }
        stripped.trim().to_string()
    }

    fn mentions(&self) -> impl Iterator<Item = String> + '_ {
        [&self.username, &self.user_id]
            .into_iter()
            .filter(|s| !s.is_empty())
            .map(|s| format!("@{}", s))
    }
}

/// Byte ranges where `mention` occurs as a whole handle, so `@pollbot`
/// does not match inside `@pollbotfan`. A trailing period ends the handle
/// unless another handle character follows it.
fn mention_spans(text: &str, mention: &str) -> Vec<(usize, usize)> {
    text.match_indices(mention)
        .map(|(start, m)| (start, start + m.len()))
        .filter(|&(_, end)| ends_handle(&text[end..]))
        .collect()
}

fn ends_handle(rest: &str) -> bool {
    let mut chars = rest.chars();
    match chars.next() {
        None => true,
        Some('.') => !chars.next().is_some_and(is_handle_char),
        Some(c) => !is_handle_char(c),
    }
}

fn is_handle_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '-'
}

/// Outbound side of a messaging platform
#[async_trait]
pub trait MessagingGateway: Send + Sync {
    /// Post `text` to a channel and return the new post's ID
    async fn post_message(&self, channel_id: &str, text: &str) -> ChannelResult<String>;

    /// Display name for a user
    async fn display_name(&self, user_id: &str) -> ChannelResult<String>;
}

/// Type-erased gateway handle
pub type DynGateway = Arc<dyn MessagingGateway>;

#[cfg(test)]
mod tests {
    use super::*;

    fn bot() -> BotIdentity {
        BotIdentity {
            user_id: "bot123".into(),
            username: "pollbot".into(),
        }
    }

    fn event(text: &str, is_direct: bool) -> InboundEvent {
        InboundEvent {
            sender_id: "alice".into(),
            channel_id: "town-square".into(),
            text: text.into(),
            is_direct,
        }
    }

    #[test]
    fn test_direct_messages_are_addressed() {
        assert!(bot().is_addressed(&event("help", true)));
    }

    #[test]
    fn test_channel_message_needs_mention() {
        assert!(!bot().is_addressed(&event("help", false)));
        assert!(bot().is_addressed(&event("@pollbot help", false)));
        assert!(bot().is_addressed(&event("@bot123 help", false)));
    }

    #[test]
    fn test_own_messages_are_ignored() {
        let mut own = event("@pollbot help", true);
        own.sender_id = "bot123".into();
        assert!(!bot().is_addressed(&own));
    }

    #[test]
    fn test_strip_mentions() {
        assert_eq!(
            bot().strip_mentions("@pollbot results abc"),
            "results abc"
        );
        assert_eq!(bot().strip_mentions("vote @bot123 abc 1"), "vote  abc 1");
    }

    #[test]
    fn test_longer_handle_is_not_a_mention() {
        assert!(!bot().is_addressed(&event("@pollbotfan hi", false)));
        assert!(!bot().is_addressed(&event("ping @pollbot_2 and @pollbot.fan", false)));
        assert_eq!(bot().strip_mentions("@pollbotfan hi"), "@pollbotfan hi");
    }

    #[test]
    fn test_mention_followed_by_punctuation() {
        assert!(bot().is_addressed(&event("@pollbot, help", false)));
        assert!(bot().is_addressed(&event("hey @pollbot.", false)));
        assert_eq!(
            bot().strip_mentions("@pollbotfan @pollbot results abc"),
            "@pollbotfan  results abc"
        );
    }
}
