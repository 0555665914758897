//! Destination channel selection.
//!
//! First match wins:
//!
//! 1. A `@slack-channel:` annotation in the PR description.
//! 2. The opening user's default channel, if their identity is verified.
//! 3. The repository's default channel.
//!
//! Resolution is pure; turning a channel *name* into an ID is a separate
//! chat API lookup done by the caller.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

use crate::types::{ChannelId, Repo, User};

// `@slack-channel: #name`, `@slack-channel: <#C123|name>` or `@slack-channel: C123`.
static ANNOTATION_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?im)@slack-channel:[ \t]*(?:<#([A-Z0-9]+)(?:\|[^>]*)?>|(#)?([A-Za-z0-9][A-Za-z0-9_.-]*))",
    )
    .unwrap()
});

static CHANNEL_ID_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[CG][A-Z0-9]{6,}$").unwrap());

/// A channel named by ID or by name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelTarget {
    Id(ChannelId),
    /// Lowercased, without the leading `#`.
    Name(String),
}

impl fmt::Display for ChannelTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelTarget::Id(id) => write!(f, "{}", id),
            ChannelTarget::Name(name) => write!(f, "#{}", name),
        }
    }
}

/// Which rule picked the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelSource {
    Annotation,
    UserDefault,
    RepoDefault,
}

impl ChannelSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelSource::Annotation => "annotation",
            ChannelSource::UserDefault => "user_default",
            ChannelSource::RepoDefault => "repo_default",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedChannel {
    pub target: ChannelTarget,
    pub source: ChannelSource,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("no channel configured for {repo}")]
pub struct NoChannelConfigured {
    pub repo: String,
}

/// Parses a user-supplied channel reference (`#eng`, `<#C123|eng>`, `C123`).
pub fn parse_channel_ref(input: &str) -> Option<ChannelTarget> {
    let input = input.trim();
    if let Some(inner) = input.strip_prefix("<#").and_then(|s| s.strip_suffix('>')) {
        let id = inner.split('|').next().unwrap_or_default();
        return (!id.is_empty()).then(|| ChannelTarget::Id(ChannelId::new(id)));
    }
    if let Some(name) = input.strip_prefix('#') {
        return valid_name(name).then(|| ChannelTarget::Name(name.to_lowercase()));
    }
    if CHANNEL_ID_REGEX.is_match(input) {
        return Some(ChannelTarget::Id(ChannelId::new(input)));
    }
    valid_name(input).then(|| ChannelTarget::Name(input.to_lowercase()))
}

fn valid_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 80
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

/// Finds the first channel annotation in a PR description.
pub fn parse_annotation(body: &str) -> Option<ChannelTarget> {
    let caps = ANNOTATION_REGEX.captures(body)?;
    if let Some(id) = caps.get(1) {
        return Some(ChannelTarget::Id(ChannelId::new(id.as_str())));
    }
    let token = caps.get(3)?.as_str();
    let token = token.trim_end_matches(['.', ',']);
    if caps.get(2).is_none() && CHANNEL_ID_REGEX.is_match(token) {
        return Some(ChannelTarget::Id(ChannelId::new(token)));
    }
    Some(ChannelTarget::Name(token.to_lowercase()))
}

/// Picks the destination channel for a pull request.
///
/// # Errors
///
/// Returns [`NoChannelConfigured`] when no rule applies.
pub fn resolve(
    pr_body: &str,
    repo: &Repo,
    user: Option<&User>,
) -> Result<ResolvedChannel, NoChannelConfigured> {
    if let Some(target) = parse_annotation(pr_body) {
        return Ok(ResolvedChannel {
            target,
            source: ChannelSource::Annotation,
        });
    }

    if let Some(channel) = user
        .filter(|u| u.verified)
        .and_then(|u| u.default_channel.clone())
    {
        return Ok(ResolvedChannel {
            target: ChannelTarget::Id(channel),
            source: ChannelSource::UserDefault,
        });
    }

    if let Some(channel) = repo.default_channel.clone() {
        return Ok(ResolvedChannel {
            target: ChannelTarget::Id(channel),
            source: ChannelSource::RepoDefault,
        });
    }

    Err(NoChannelConfigured {
        repo: repo.full_name.to_string(),
    })
}
