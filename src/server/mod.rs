//! HTTP surface of the relay.
//!
//! Ingress handlers only verify, shape-check and enqueue; everything that
//! talks to the chat platform happens in the worker endpoint, which the
//! queue calls back.
//!
//! # Endpoints
//!
//! - `POST /webhooks/github` - GitHub webhooks signed with the global secret
//! - `POST /webhooks/github/{owner}/{repo}` - Same, with the repo's own secret when it has one
//! - `POST /slack/events` - Slack Events API (URL verification, message events)
//! - `POST /slack/commands` - The slash command
//! - `POST /internal/worker` - Job deliveries from the queue
//! - `GET /oauth/github/callback` - End of the identity link flow
//! - `POST /admin/repos` - Registers or updates a repository
//! - `GET /health` - Returns 200 if the server is running

use std::sync::Arc;
use std::time::Duration;

use axum::http::HeaderMap;
use tower_http::trace::TraceLayer;

use crate::chat::ChatApi;
use crate::config::Config;
use crate::github::CodeHost;
use crate::identity::IdentityLinker;
use crate::processor::Processor;
use crate::queue::TaskQueue;
use crate::store::DocumentStore;

pub mod admin;
pub mod github;
pub mod health;
pub mod oauth;
pub mod slack;
pub mod worker;

pub use admin::register_repo_handler;
pub use github::{github_repo_webhook_handler, github_webhook_handler};
pub use health::health_handler;
pub use oauth::oauth_callback_handler;
pub use slack::{slack_commands_handler, slack_events_handler};
pub use worker::worker_handler;

/// Secrets and limits the handlers need.
#[derive(Clone)]
pub struct ServerSettings {
    pub github_webhook_secret: String,
    pub slack_signing_secret: String,
    pub slack_max_request_age_secs: u64,
    pub worker_secret: String,
    pub queue_name: String,
    /// Where the queue should deliver jobs.
    pub worker_url: String,
    pub admin_api_key: String,
    pub max_attempts: u32,
    pub ingress_deadline: Duration,
    pub worker_deadline: Duration,
}

impl From<&Config> for ServerSettings {
    fn from(config: &Config) -> Self {
        ServerSettings {
            github_webhook_secret: config.github_webhook_secret.clone(),
            slack_signing_secret: config.slack_signing_secret.clone(),
            slack_max_request_age_secs: config.slack_max_request_age_secs,
            worker_secret: config.worker_secret.clone(),
            queue_name: config.queue_name.clone(),
            worker_url: config.worker_url.clone(),
            admin_api_key: config.admin_api_key.clone(),
            max_attempts: config.max_attempts,
            ingress_deadline: config.ingress_deadline,
            worker_deadline: config.worker_deadline,
        }
    }
}

/// Shared application state.
///
/// This is passed to all handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    store: Arc<dyn DocumentStore>,
    chat: Arc<dyn ChatApi>,
    queue: Arc<dyn TaskQueue>,
    processor: Processor,
    linker: IdentityLinker,
    settings: ServerSettings,
}

impl AppState {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        chat: Arc<dyn ChatApi>,
        code_host: Arc<dyn CodeHost>,
        queue: Arc<dyn TaskQueue>,
        settings: ServerSettings,
        link_ttl_secs: u64,
    ) -> Self {
        AppState {
            inner: Arc::new(AppStateInner {
                processor: Processor::new(store.clone(), chat.clone()),
                linker: IdentityLinker::new(store.clone(), code_host, link_ttl_secs),
                store,
                chat,
                queue,
                settings,
            }),
        }
    }

    pub fn store(&self) -> &dyn DocumentStore {
        self.inner.store.as_ref()
    }

    pub fn chat(&self) -> &dyn ChatApi {
        self.inner.chat.as_ref()
    }

    pub fn queue(&self) -> &dyn TaskQueue {
        self.inner.queue.as_ref()
    }

    pub fn processor(&self) -> &Processor {
        &self.inner.processor
    }

    pub fn linker(&self) -> &IdentityLinker {
        &self.inner.linker
    }

    pub fn settings(&self) -> &ServerSettings {
        &self.inner.settings
    }
}

/// Builds the axum Router with all endpoints.
pub fn build_router(app_state: AppState) -> axum::Router {
    use axum::routing::{get, post};

    axum::Router::new()
        .route("/webhooks/github", post(github_webhook_handler))
        .route(
            "/webhooks/github/{owner}/{repo}",
            post(github_repo_webhook_handler),
        )
        .route("/slack/events", post(slack_events_handler))
        .route("/slack/commands", post(slack_commands_handler))
        .route("/internal/worker", post(worker_handler))
        .route("/oauth/github/callback", get(oauth_callback_handler))
        .route("/admin/repos", post(register_repo_handler))
        .route("/health", get(health_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}

/// A header as a string, if present and valid UTF-8.
fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Compares secrets without short-circuiting on the first differing byte.
fn secrets_match(provided: &str, expected: &str) -> bool {
    let (a, b) = (provided.as_bytes(), expected.as_bytes());
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
