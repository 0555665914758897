//! Document store abstraction.
//!
//! The store owns all durable state: users, repos, tracked messages and
//! per-PR review history. Updates are read-modify-write with last-write-wins
//! semantics; the only conditional write is [`DocumentStore::insert_message`],
//! which enforces one tracked message per `(repo, pr, channel)`.

pub mod file;
pub mod memory;

use async_trait::async_trait;
use thiserror::Error;

use crate::types::{
    ChannelId, ChatUserId, PrNumber, PullRequestRecord, Repo, RepoName, TrackedMessage, User,
    WorkspaceId,
};

pub use file::FileStore;
pub use memory::MemoryStore;

/// Errors from the document store. All of them are worth retrying.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt document {path}: {source}")]
    Corrupt {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("store task failed: {0}")]
    Task(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Result of a create-if-absent insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// A message already exists for the key; it is returned unchanged.
    Existing(TrackedMessage),
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get_user(
        &self,
        workspace: &WorkspaceId,
        user: &ChatUserId,
    ) -> Result<Option<User>>;

    async fn put_user(&self, user: &User) -> Result<()>;

    /// Finds the user holding a pending link with this state token.
    async fn find_user_by_link_token(&self, token: &str) -> Result<Option<User>>;

    /// Finds a verified user bound to this code-host login (case-insensitive).
    async fn find_verified_user_by_login(&self, login: &str) -> Result<Option<User>>;

    async fn get_repo(&self, name: &RepoName) -> Result<Option<Repo>>;

    async fn put_repo(&self, repo: &Repo) -> Result<()>;

    async fn get_message(
        &self,
        repo: &RepoName,
        pr: PrNumber,
        channel: &ChannelId,
    ) -> Result<Option<TrackedMessage>>;

    /// All tracked messages for one PR, ordered by channel.
    async fn list_messages(&self, repo: &RepoName, pr: PrNumber) -> Result<Vec<TrackedMessage>>;

    /// Creates the message unless one already exists for its key.
    async fn insert_message(&self, message: &TrackedMessage) -> Result<InsertOutcome>;

    /// Overwrites an existing message.
    async fn put_message(&self, message: &TrackedMessage) -> Result<()>;

    async fn get_pull_request(
        &self,
        repo: &RepoName,
        pr: PrNumber,
    ) -> Result<Option<PullRequestRecord>>;

    async fn put_pull_request(&self, record: &PullRequestRecord) -> Result<()>;
}
