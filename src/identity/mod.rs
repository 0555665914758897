//! Chat user to GitHub identity binding.
//!
//! A user moves through three states:
//!
//! ```text
//! unverified --link--> link-requested --callback--> verified
//!     ^                                                |
//!     +-------------------- unlink --------------------+
//! ```
//!
//! `link` stores a single-use state token with an expiry on the user record
//! and hands back the authorization URL. Asking again replaces the token, so
//! at most one link is pending per user. The OAuth callback consumes the
//! token before exchanging the code; a failed exchange means starting over.

use std::sync::{Arc, LazyLock};

use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::github::{CodeHost, GitHubApiError};
use crate::store::{DocumentStore, StoreError};
use crate::types::{ChannelId, ChatUserId, PendingLink, User, WorkspaceId};

pub const DEFAULT_LINK_TTL_SECS: u64 = 600;

static LOGIN_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9](?:-?[A-Za-z0-9]){0,38}$").unwrap());

/// True for strings GitHub would accept as a login.
pub fn is_valid_login(login: &str) -> bool {
    LOGIN_REGEX.is_match(login)
}

#[derive(Debug, Error)]
pub enum LinkError {
    /// The state token is missing, unknown, expired or already used.
    #[error("link request is invalid or has expired")]
    InvalidState,

    #[error("GitHub returned an unexpected identity: {login:?}")]
    IdentityMismatch { login: String },

    #[error(transparent)]
    CodeHost(#[from] GitHubApiError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Result of a `link` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkRequest {
    pub authorize_url: String,
    pub expires_at: DateTime<Utc>,
}

pub struct IdentityLinker {
    store: Arc<dyn DocumentStore>,
    code_host: Arc<dyn CodeHost>,
    link_ttl: Duration,
}

impl IdentityLinker {
    pub fn new(store: Arc<dyn DocumentStore>, code_host: Arc<dyn CodeHost>, ttl_secs: u64) -> Self {
        let ttl_secs = i64::try_from(ttl_secs).unwrap_or(i64::MAX / 1000);
        IdentityLinker {
            store,
            code_host,
            link_ttl: Duration::seconds(ttl_secs),
        }
    }

    /// Loads the user, creating a fresh unverified record on first contact.
    async fn load_or_create(
        &self,
        workspace: &WorkspaceId,
        user: &ChatUserId,
        now: DateTime<Utc>,
    ) -> Result<User, StoreError> {
        Ok(self
            .store
            .get_user(workspace, user)
            .await?
            .unwrap_or_else(|| User::new(workspace.clone(), user.clone(), now)))
    }

    /// Starts a link: issues a new state token, replacing any pending one.
    #[instrument(skip(self, now), fields(workspace = %workspace, user = %user))]
    pub async fn request_link(
        &self,
        workspace: &WorkspaceId,
        user: &ChatUserId,
        now: DateTime<Utc>,
    ) -> Result<LinkRequest, StoreError> {
        let mut record = self.load_or_create(workspace, user, now).await?;
        let token = uuid::Uuid::new_v4().simple().to_string();
        let expires_at = now + self.link_ttl;

        if record.pending_link.is_some() {
            info!("Replacing outstanding link request");
        }
        record.pending_link = Some(PendingLink {
            token: token.clone(),
            expires_at,
        });
        record.updated_at = now;
        self.store.put_user(&record).await?;

        Ok(LinkRequest {
            authorize_url: self.code_host.authorize_url(&token),
            expires_at,
        })
    }

    /// Completes a link from the OAuth callback.
    ///
    /// # Errors
    ///
    /// - [`LinkError::InvalidState`] for a missing, unknown, expired or
    ///   already-consumed token
    /// - [`LinkError::IdentityMismatch`] when GitHub returns a login that
    ///   isn't a valid GitHub username
    #[instrument(skip_all)]
    pub async fn complete_link(
        &self,
        code: &str,
        state: &str,
        now: DateTime<Utc>,
    ) -> Result<User, LinkError> {
        if state.is_empty() {
            return Err(LinkError::InvalidState);
        }
        let mut user = self
            .store
            .find_user_by_link_token(state)
            .await?
            .ok_or(LinkError::InvalidState)?;

        let pending = user.pending_link.take();
        user.updated_at = now;
        self.store.put_user(&user).await?;

        match pending {
            Some(p) if p.token == state && !p.is_expired(now) => {}
            _ => {
                warn!(user = %user.chat_user_id, "Expired link token");
                return Err(LinkError::InvalidState);
            }
        }

        let identity = self.code_host.exchange_code(code).await?;
        if !is_valid_login(&identity.login) {
            warn!(user = %user.chat_user_id, login = %identity.login, "Rejecting malformed login");
            return Err(LinkError::IdentityMismatch {
                login: identity.login,
            });
        }

        if let Some(previous) = user.github_login.take() {
            if !previous.eq_ignore_ascii_case(&identity.login) {
                remember_username(&mut user, previous);
            }
        }
        user.github_login = Some(identity.login);
        user.verified = true;
        user.linked_at = Some(now);
        user.updated_at = now;
        self.store.put_user(&user).await?;

        info!(
            user = %user.chat_user_id,
            login = user.github_login.as_deref().unwrap_or_default(),
            github_id = identity.id,
            "Identity verified"
        );
        Ok(user)
    }

    /// Clears the binding. Returns the login that was unlinked, if any.
    #[instrument(skip(self, now), fields(workspace = %workspace, user = %user))]
    pub async fn unlink(
        &self,
        workspace: &WorkspaceId,
        user: &ChatUserId,
        now: DateTime<Utc>,
    ) -> Result<Option<String>, StoreError> {
        let Some(mut record) = self.store.get_user(workspace, user).await? else {
            return Ok(None);
        };

        let previous = record.github_login.take();
        if let Some(login) = &previous {
            remember_username(&mut record, login.clone());
        }
        record.verified = false;
        record.pending_link = None;
        record.unlinked_at = Some(now);
        record.updated_at = now;
        self.store.put_user(&record).await?;

        Ok(previous)
    }

    /// Stores the user's default channel.
    pub async fn set_channel(
        &self,
        workspace: &WorkspaceId,
        user: &ChatUserId,
        channel: ChannelId,
        now: DateTime<Utc>,
    ) -> Result<User, StoreError> {
        let mut record = self.load_or_create(workspace, user, now).await?;
        record.default_channel = Some(channel);
        record.updated_at = now;
        self.store.put_user(&record).await?;
        Ok(record)
    }

    pub async fn status(
        &self,
        workspace: &WorkspaceId,
        user: &ChatUserId,
    ) -> Result<Option<User>, StoreError> {
        self.store.get_user(workspace, user).await
    }
}

fn remember_username(user: &mut User, login: String) {
    if !user
        .previous_usernames
        .iter()
        .any(|l| l.eq_ignore_ascii_case(&login))
    {
        user.previous_usernames.push(login);
    }
}
