//! Slash command types.

use thiserror::Error;

use crate::channel::ChannelTarget;

/// A parsed slash command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `link`: issue an authorization URL with a fresh state token.
    Link,

    /// `unlink`: drop the verified binding.
    Unlink,

    /// `channel <ref>`: store a default channel for the user's PRs.
    ///
    /// The reference may be `#name`, `<#C123|name>` or a bare ID.
    Channel(ChannelTarget),

    Status,

    Help,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("unknown subcommand `{0}`")]
    Unknown(String),

    #[error("`channel` needs a channel, e.g. `channel #eng`")]
    MissingChannel,

    #[error("`{0}` is not a channel reference")]
    InvalidChannel(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_render_for_users() {
        assert_eq!(
            CommandError::Unknown("frob".into()).to_string(),
            "unknown subcommand `frob`"
        );
        assert!(CommandError::MissingChannel.to_string().contains("#eng"));
    }
}
