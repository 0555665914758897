//! Shared fixtures and in-process fakes for the chat platform and code host.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use crate::chat::{ChatApi, ChatError, ChatMessage};
use crate::github::{CodeHost, CodeHostIdentity, GitHubApiError};
use crate::queue::{JobHandle, QueueError, TaskQueue, WebhookJob};
use crate::types::{
    ChannelId, ChatUserId, MessageOrigin, MessageTs, PrNumber, PrStatus, PullRequestRecord,
    Repo, RepoName, TrackedMessage, User, WorkspaceId,
};
use crate::webhooks::{PrAction, PullRequestEvent};

/// A fixed instant offset by `secs`, so tests read as relative times.
pub fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0)
        .single()
        .unwrap()
}

pub fn repo_name(name: &str) -> RepoName {
    RepoName::parse(name).unwrap()
}

pub fn repo_fixture(name: &str, default_channel: Option<&str>) -> Repo {
    Repo {
        full_name: repo_name(name),
        default_channel: default_channel.map(ChannelId::new),
        webhook_secret: None,
        enabled: true,
        created_at: at(0),
        updated_at: at(0),
    }
}

pub fn user_fixture(workspace: &str, user: &str) -> User {
    User::new(WorkspaceId::new(workspace), ChatUserId::new(user), at(0))
}

pub fn verified_user(
    workspace: &str,
    user: &str,
    login: &str,
    default_channel: Option<&str>,
) -> User {
    let mut u = user_fixture(workspace, user);
    u.github_login = Some(login.to_string());
    u.verified = true;
    u.linked_at = Some(at(0));
    u.default_channel = default_channel.map(ChannelId::new);
    u
}

pub fn pr_record(repo: &str, pr: u64) -> PullRequestRecord {
    PullRequestRecord::new(repo_name(repo), PrNumber(pr), at(0))
}

pub fn tracked_message(repo: &str, pr: u64, channel: &str, ts: &str) -> TrackedMessage {
    TrackedMessage {
        repo: repo_name(repo),
        pr_number: PrNumber(pr),
        channel: ChannelId::new(channel),
        message_ts: MessageTs::new(ts),
        pr_url: format!("https://github.com/{}/pull/{}", repo, pr),
        author: "alice".to_string(),
        origin: MessageOrigin::Posted,
        status: PrStatus::Opened,
        reactions: BTreeSet::new(),
        created_at: at(0),
        updated_at: at(0),
    }
}

pub fn pr_event(repo: &str, pr: u64, action: PrAction, body: &str) -> PullRequestEvent {
    PullRequestEvent {
        repo: repo_name(repo),
        action,
        pr_number: PrNumber(pr),
        title: "Add widget frobnication".to_string(),
        body: body.to_string(),
        html_url: format!("https://github.com/{}/pull/{}", repo, pr),
        author_login: "alice".to_string(),
        merged: false,
    }
}

// ─── Chat fake ───

type MessageKey = (ChannelId, MessageTs);

#[derive(Default)]
struct FakeChatState {
    reactions: HashMap<MessageKey, BTreeSet<String>>,
    posted: Vec<(ChannelId, ChatMessage)>,
    channels: HashMap<String, ChannelId>,
    calls: Vec<String>,
    next_ts: u64,
    reaction_error: Option<ChatError>,
    read_error: Option<ChatError>,
    post_error: Option<ChatError>,
    emoji_errors: HashMap<String, ChatError>,
    channel_errors: HashMap<ChannelId, ChatError>,
    post_delay: Option<Duration>,
}

/// An in-memory chat platform.
///
/// Adding an emoji that is already present (or removing one that is absent)
/// answers with an `AlreadySatisfied` error, like Slack does.
#[derive(Default)]
pub struct FakeChat {
    state: Mutex<FakeChatState>,
}

impl FakeChat {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_channel(&self, name: &str, id: &str) {
        let mut state = self.state.lock().unwrap();
        state.channels.insert(name.to_string(), ChannelId::new(id));
    }

    pub fn set_reactions(&self, channel: &ChannelId, ts: &MessageTs, emoji: &[&str]) {
        let mut state = self.state.lock().unwrap();
        state.reactions.insert(
            (channel.clone(), ts.clone()),
            emoji.iter().map(|e| e.to_string()).collect(),
        );
    }

    pub fn reactions_on(&self, channel: &ChannelId, ts: &MessageTs) -> BTreeSet<String> {
        let state = self.state.lock().unwrap();
        state
            .reactions
            .get(&(channel.clone(), ts.clone()))
            .cloned()
            .unwrap_or_default()
    }

    /// Every add/remove call, as `"add <emoji> <channel> <ts>"`.
    pub fn reaction_calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn posted(&self) -> Vec<(ChannelId, ChatMessage)> {
        self.state.lock().unwrap().posted.clone()
    }

    /// Makes every add/remove fail with `err`.
    pub fn fail_reactions_with(&self, err: ChatError) {
        self.state.lock().unwrap().reaction_error = Some(err);
    }

    /// Makes add/remove of one emoji fail with `err`.
    pub fn fail_emoji(&self, emoji: &str, err: ChatError) {
        let mut state = self.state.lock().unwrap();
        state.emoji_errors.insert(emoji.to_string(), err);
    }

    pub fn fail_reads_with(&self, err: ChatError) {
        self.state.lock().unwrap().read_error = Some(err);
    }

    /// Makes every post sleep for `delay` before answering.
    pub fn delay_posts(&self, delay: Duration) {
        self.state.lock().unwrap().post_delay = Some(delay);
    }

    pub fn fail_posts_with(&self, err: ChatError) {
        self.state.lock().unwrap().post_error = Some(err);
    }

    /// Makes every call touching `channel` fail with `err`.
    pub fn fail_channel(&self, channel: &ChannelId, err: ChatError) {
        let mut state = self.state.lock().unwrap();
        state.channel_errors.insert(channel.clone(), err);
    }

    pub fn clear_failures(&self) {
        let mut state = self.state.lock().unwrap();
        state.reaction_error = None;
        state.read_error = None;
        state.post_error = None;
        state.emoji_errors.clear();
        state.channel_errors.clear();
    }

    fn reaction_failure(state: &FakeChatState, channel: &ChannelId, emoji: &str) -> Option<ChatError> {
        state
            .channel_errors
            .get(channel)
            .or_else(|| state.emoji_errors.get(emoji))
            .or(state.reaction_error.as_ref())
            .cloned()
    }
}

#[async_trait]
impl ChatApi for FakeChat {
    async fn post_message(
        &self,
        channel: &ChannelId,
        message: &ChatMessage,
    ) -> Result<MessageTs, ChatError> {
        let delay = self.state.lock().unwrap().post_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock().unwrap();
        if let Some(err) = state
            .channel_errors
            .get(channel)
            .or(state.post_error.as_ref())
        {
            return Err(err.clone());
        }
        state.next_ts += 1;
        let ts = MessageTs::new(format!("1700000000.{:06}", state.next_ts));
        state.posted.push((channel.clone(), message.clone()));
        Ok(ts)
    }

    async fn add_reaction(
        &self,
        channel: &ChannelId,
        ts: &MessageTs,
        emoji: &str,
    ) -> Result<(), ChatError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("add {} {} {}", emoji, channel, ts));
        if let Some(err) = Self::reaction_failure(&state, channel, emoji) {
            return Err(err);
        }
        let applied = state
            .reactions
            .entry((channel.clone(), ts.clone()))
            .or_default();
        if applied.insert(emoji.to_string()) {
            Ok(())
        } else {
            Err(ChatError::already_satisfied("already_reacted"))
        }
    }

    async fn remove_reaction(
        &self,
        channel: &ChannelId,
        ts: &MessageTs,
        emoji: &str,
    ) -> Result<(), ChatError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("remove {} {} {}", emoji, channel, ts));
        if let Some(err) = Self::reaction_failure(&state, channel, emoji) {
            return Err(err);
        }
        let removed = state
            .reactions
            .get_mut(&(channel.clone(), ts.clone()))
            .is_some_and(|applied| applied.remove(emoji));
        if removed {
            Ok(())
        } else {
            Err(ChatError::already_satisfied("no_reaction"))
        }
    }

    async fn reactions(
        &self,
        channel: &ChannelId,
        ts: &MessageTs,
    ) -> Result<BTreeSet<String>, ChatError> {
        let state = self.state.lock().unwrap();
        if let Some(err) = state
            .channel_errors
            .get(channel)
            .or(state.read_error.as_ref())
        {
            return Err(err.clone());
        }
        Ok(state
            .reactions
            .get(&(channel.clone(), ts.clone()))
            .cloned()
            .unwrap_or_default())
    }

    async fn resolve_channel(&self, name: &str) -> Result<Option<ChannelId>, ChatError> {
        let state = self.state.lock().unwrap();
        Ok(state.channels.get(name).cloned())
    }
}

// ─── Queue fake ───

/// A queue that takes `delay` to accept anything.
pub struct SlowQueue {
    pub delay: Duration,
}

#[async_trait]
impl TaskQueue for SlowQueue {
    async fn enqueue(&self, job: &WebhookJob, _target: &str) -> Result<JobHandle, QueueError> {
        tokio::time::sleep(self.delay).await;
        Ok(JobHandle {
            job_id: job.id.clone(),
            queue: "slow".to_string(),
        })
    }
}

// ─── Code host fake ───

/// Maps OAuth codes to identities; unknown codes are rejected.
#[derive(Default)]
pub struct FakeCodeHost {
    identities: Mutex<BTreeMap<String, CodeHostIdentity>>,
}

impl FakeCodeHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_identity(self, code: &str, login: &str, id: u64) -> Self {
        self.identities.lock().unwrap().insert(
            code.to_string(),
            CodeHostIdentity {
                login: login.to_string(),
                id,
            },
        );
        self
    }
}

#[async_trait]
impl CodeHost for FakeCodeHost {
    async fn exchange_code(&self, code: &str) -> Result<CodeHostIdentity, GitHubApiError> {
        self.identities
            .lock()
            .unwrap()
            .get(code)
            .cloned()
            .ok_or_else(|| GitHubApiError::permanent("bad_verification_code"))
    }

    fn authorize_url(&self, state: &str) -> String {
        format!("https://github.test/login/oauth/authorize?state={}", state)
    }
}
