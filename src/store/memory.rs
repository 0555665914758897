//! In-memory document store for tests and single-process runs.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::types::{
    ChannelId, ChatUserId, PrNumber, PullRequestRecord, Repo, RepoName, TrackedMessage, User,
    WorkspaceId,
};

use super::{DocumentStore, InsertOutcome, Result};

type MessageKey = (RepoName, PrNumber, ChannelId);

#[derive(Debug, Default)]
pub struct MemoryStore {
    users: RwLock<HashMap<(WorkspaceId, ChatUserId), User>>,
    repos: RwLock<HashMap<RepoName, Repo>>,
    // BTreeMap so range scans by (repo, pr) come out ordered by channel.
    messages: RwLock<BTreeMap<MessageKey, TrackedMessage>>,
    pull_requests: RwLock<HashMap<(RepoName, PrNumber), PullRequestRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tracked messages across all PRs.
    pub async fn message_count(&self) -> usize {
        self.messages.read().await.len()
    }
}

fn message_key(message: &TrackedMessage) -> MessageKey {
    (
        message.repo.clone(),
        message.pr_number,
        message.channel.clone(),
    )
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get_user(&self, workspace: &WorkspaceId, user: &ChatUserId) -> Result<Option<User>> {
        let users = self.users.read().await;
        Ok(users.get(&(workspace.clone(), user.clone())).cloned())
    }

    async fn put_user(&self, user: &User) -> Result<()> {
        self.users.write().await.insert(
            (user.workspace_id.clone(), user.chat_user_id.clone()),
            user.clone(),
        );
        Ok(())
    }

    async fn find_user_by_link_token(&self, token: &str) -> Result<Option<User>> {
        let users = self.users.read().await;
        Ok(users
            .values()
            .find(|u| u.pending_link.as_ref().is_some_and(|p| p.token == token))
            .cloned())
    }

    async fn find_verified_user_by_login(&self, login: &str) -> Result<Option<User>> {
        let users = self.users.read().await;
        Ok(users
            .values()
            .find(|u| {
                u.verified_login()
                    .is_some_and(|l| l.eq_ignore_ascii_case(login))
            })
            .cloned())
    }

    async fn get_repo(&self, name: &RepoName) -> Result<Option<Repo>> {
        Ok(self.repos.read().await.get(name).cloned())
    }

    async fn put_repo(&self, repo: &Repo) -> Result<()> {
        self.repos
            .write()
            .await
            .insert(repo.full_name.clone(), repo.clone());
        Ok(())
    }

    async fn get_message(
        &self,
        repo: &RepoName,
        pr: PrNumber,
        channel: &ChannelId,
    ) -> Result<Option<TrackedMessage>> {
        let messages = self.messages.read().await;
        Ok(messages
            .get(&(repo.clone(), pr, channel.clone()))
            .cloned())
    }

    async fn list_messages(&self, repo: &RepoName, pr: PrNumber) -> Result<Vec<TrackedMessage>> {
        let messages = self.messages.read().await;
        Ok(messages
            .iter()
            .filter(|((r, p, _), _)| r == repo && *p == pr)
            .map(|(_, m)| m.clone())
            .collect())
    }

    async fn insert_message(&self, message: &TrackedMessage) -> Result<InsertOutcome> {
        let mut messages = self.messages.write().await;
        match messages.get(&message_key(message)) {
            Some(existing) => Ok(InsertOutcome::Existing(existing.clone())),
            None => {
                messages.insert(message_key(message), message.clone());
                Ok(InsertOutcome::Inserted)
            }
        }
    }

    async fn put_message(&self, message: &TrackedMessage) -> Result<()> {
        self.messages
            .write()
            .await
            .insert(message_key(message), message.clone());
        Ok(())
    }

    async fn get_pull_request(
        &self,
        repo: &RepoName,
        pr: PrNumber,
    ) -> Result<Option<PullRequestRecord>> {
        let records = self.pull_requests.read().await;
        Ok(records.get(&(repo.clone(), pr)).cloned())
    }

    async fn put_pull_request(&self, record: &PullRequestRecord) -> Result<()> {
        self.pull_requests
            .write()
            .await
            .insert((record.repo.clone(), record.pr_number), record.clone());
        Ok(())
    }
}
