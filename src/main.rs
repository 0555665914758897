use std::error::Error;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pr_relay::chat::SlackClient;
use pr_relay::config::{Config, StoreBackend};
use pr_relay::github::{GitHubClient, OAuthApp};
use pr_relay::queue::{Dispatcher, SpoolQueue};
use pr_relay::server::{AppState, ServerSettings, build_router};
use pr_relay::store::{DocumentStore, FileStore, MemoryStore};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pr_relay=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = run().await {
        error!(error = %e, "Exiting");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn Error + Send + Sync>> {
    let config = Config::from_env()?;
    info!(config = ?config, "Starting PR relay");

    let store: Arc<dyn DocumentStore> = match config.store_backend {
        StoreBackend::File => {
            info!(path = %config.store_dir().display(), "Using file store");
            Arc::new(FileStore::new(config.store_dir()))
        }
        StoreBackend::Memory => {
            info!("Using in-memory store; nothing survives a restart");
            Arc::new(MemoryStore::new())
        }
    };

    let chat = Arc::new(SlackClient::new(config.slack_bot_token.clone())?);
    let code_host = Arc::new(GitHubClient::new(OAuthApp {
        client_id: config.github_client_id.clone(),
        client_secret: config.github_client_secret.clone(),
        redirect_url: config.oauth_redirect_url.clone(),
    }));
    let queue = Arc::new(SpoolQueue::new(config.spool_dir(), config.queue_name.clone()));

    let app_state = AppState::new(
        store,
        chat,
        code_host,
        queue,
        ServerSettings::from(&config),
        config.link_token_ttl_secs,
    );

    let shutdown = CancellationToken::new();
    let dispatcher = Dispatcher::new(
        config.spool_dir(),
        config.queue_name.clone(),
        config.worker_secret.clone(),
        reqwest::Client::new(),
        config.queue_poll_interval,
    )
    .with_retention(config.spool_retention);
    let dispatcher_task = tokio::spawn(dispatcher.run(shutdown.clone()));

    let listener = TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?;
    info!(port = config.port, "Listening");

    let signal = shutdown.clone();
    axum::serve(listener, build_router(app_state))
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for shutdown signal");
            }
            info!("Shutting down");
            signal.cancel();
        })
        .await?;

    shutdown.cancel();
    if let Err(e) = dispatcher_task.await {
        error!(error = %e, "Dispatcher task failed");
    }
    Ok(())
}
