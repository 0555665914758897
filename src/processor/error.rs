//! Processing error taxonomy.
//!
//! Every failure inside the worker lands in one of these buckets, and the
//! bucket alone decides whether the queue should redeliver.

use thiserror::Error;

use crate::channel::NoChannelConfigured;
use crate::chat::{ChatError, ChatErrorKind};
use crate::store::StoreError;
use crate::types::RepoName;
use crate::webhooks::ParseError;

/// A configuration gap. Logged and dropped; retrying can't fix it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    #[error(transparent)]
    NoChannel(#[from] NoChannelConfigured),

    #[error("repository {0} is disabled")]
    RepoDisabled(RepoName),

    #[error("repository {0} is not registered")]
    RepoNotRegistered(RepoName),
}

#[derive(Debug, Error)]
pub enum ProcessError {
    /// The job payload is malformed.
    #[error("invalid payload: {0}")]
    Validation(String),

    #[error("configuration: {0}")]
    Configuration(#[from] ConfigurationError),

    /// Timeouts, rate limits, 5xx, store hiccups. Worth a retry.
    #[error("transient external failure: {0}")]
    TransientExternal(String),

    /// The outside world refused in a way retrying won't change.
    #[error("permanent external failure: {0}")]
    PermanentExternal(String),
}

/// What the worker should tell the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Retry,
    Drop,
}

impl ProcessError {
    pub fn disposition(&self) -> Disposition {
        match self {
            ProcessError::TransientExternal(_) => Disposition::Retry,
            ProcessError::Validation(_)
            | ProcessError::Configuration(_)
            | ProcessError::PermanentExternal(_) => Disposition::Drop,
        }
    }

    /// Short label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            ProcessError::Validation(_) => "validation",
            ProcessError::Configuration(_) => "configuration",
            ProcessError::TransientExternal(_) => "transient_external",
            ProcessError::PermanentExternal(_) => "permanent_external",
        }
    }
}

impl From<StoreError> for ProcessError {
    fn from(err: StoreError) -> Self {
        ProcessError::TransientExternal(format!("store: {}", err))
    }
}

impl From<ChatError> for ProcessError {
    fn from(err: ChatError) -> Self {
        match err.kind {
            ChatErrorKind::Transient => ProcessError::TransientExternal(err.to_string()),
            ChatErrorKind::Permanent | ChatErrorKind::AlreadySatisfied => {
                ProcessError::PermanentExternal(err.to_string())
            }
        }
    }
}

impl From<ParseError> for ProcessError {
    fn from(err: ParseError) -> Self {
        ProcessError::Validation(err.to_string())
    }
}

impl From<NoChannelConfigured> for ProcessError {
    fn from(err: NoChannelConfigured) -> Self {
        ProcessError::Configuration(err.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_is_retried() {
        assert_eq!(
            ProcessError::TransientExternal("x".into()).disposition(),
            Disposition::Retry
        );
        for err in [
            ProcessError::Validation("x".into()),
            ProcessError::PermanentExternal("x".into()),
            ProcessError::Configuration(ConfigurationError::RepoDisabled(
                RepoName::parse("acme/widgets").unwrap(),
            )),
        ] {
            assert_eq!(err.disposition(), Disposition::Drop, "{err}");
        }
    }

    #[test]
    fn chat_errors_map_by_kind() {
        let transient: ProcessError = ChatError::transient("ratelimited").into();
        assert_eq!(transient.kind(), "transient_external");
        let permanent: ProcessError = ChatError::permanent("channel_not_found").into();
        assert_eq!(permanent.kind(), "permanent_external");
    }

    #[test]
    fn store_errors_are_transient() {
        let err: ProcessError =
            StoreError::Io(std::io::Error::other("disk on fire")).into();
        assert_eq!(err.disposition(), Disposition::Retry);
    }
}
