//! Newtype wrappers for domain identifiers.
//!
//! These types prevent accidental mixing of different ID types (e.g., using a
//! chat user ID where a channel ID is expected) and make the code more
//! self-documenting.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Declares a transparent string newtype with the usual accessors.
macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(s: impl Into<String>) -> Self {
                $name(s.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                $name(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                $name(s)
            }
        }
    };
}

string_id!(
    /// A Slack channel ID (e.g. `C024BE91L`).
    ChannelId
);

string_id!(
    /// A Slack message timestamp, which doubles as the message handle.
    MessageTs
);

string_id!(
    /// A Slack user ID (e.g. `U1`).
    ChatUserId
);

string_id!(
    /// A Slack workspace (team) ID.
    WorkspaceId
);

string_id!(
    /// Identifier of a queued job. Also used as the spool file stem.
    JobId
);

string_id!(
    /// Trace identifier carried from ingress through to the worker.
    CorrelationId
);

impl JobId {
    /// Generates a fresh random job ID.
    pub fn generate() -> Self {
        JobId(uuid::Uuid::new_v4().to_string())
    }
}

impl CorrelationId {
    /// Generates a fresh random correlation ID.
    pub fn generate() -> Self {
        CorrelationId(uuid::Uuid::new_v4().to_string())
    }
}

/// A pull request number within a repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PrNumber(pub u64);

impl fmt::Display for PrNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl From<u64> for PrNumber {
    fn from(n: u64) -> Self {
        PrNumber(n)
    }
}

/// A GitHub pull request review ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReviewId(pub u64);

impl fmt::Display for ReviewId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Error returned when a repository full name is not `owner/repo`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid repository name {0:?}: expected owner/repo")]
pub struct InvalidRepoName(pub String);

/// A repository full name (`owner/repo`), the identity key for repos.
///
/// GitHub treats owner and repository names case-insensitively, so the name
/// is normalized to lowercase on construction.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RepoName(String);

impl RepoName {
    /// Parses an `owner/repo` string.
    ///
    /// Both halves must be non-empty and may only contain characters GitHub
    /// allows in owner and repository names (ASCII alphanumerics, `-`, `_`, `.`).
    pub fn parse(s: &str) -> Result<Self, InvalidRepoName> {
        let (owner, repo) = s
            .split_once('/')
            .ok_or_else(|| InvalidRepoName(s.to_string()))?;

        let valid_part = |part: &str| {
            !part.is_empty()
                && part != "."
                && part != ".."
                && part
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        };

        if !valid_part(owner) || !valid_part(repo) {
            return Err(InvalidRepoName(s.to_string()));
        }

        Ok(RepoName(s.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the owner half.
    pub fn owner(&self) -> &str {
        self.0.split_once('/').map(|(o, _)| o).unwrap_or(&self.0)
    }

    /// Returns the repository half.
    pub fn repo(&self) -> &str {
        self.0.split_once('/').map(|(_, r)| r).unwrap_or("")
    }
}

impl fmt::Display for RepoName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for RepoName {
    type Error = InvalidRepoName;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        RepoName::parse(&s)
    }
}

impl From<RepoName> for String {
    fn from(name: RepoName) -> Self {
        name.0
    }
}
