//! Core domain types for the relay.
//!
//! Identifiers are newtypes so a channel ID can never be passed where a chat
//! user ID is expected; records are the documents the store owns.

pub mod ids;
pub mod records;

pub use ids::{
    ChannelId, ChatUserId, CorrelationId, InvalidRepoName, JobId, MessageTs, PrNumber, RepoName,
    ReviewId, WorkspaceId,
};
pub use records::{
    Closure, MessageOrigin, PendingLink, PrStatus, PullRequestRecord, Repo, ReviewRecord,
    ReviewState, TrackedMessage, User,
};
