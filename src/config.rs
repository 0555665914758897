//! Process configuration, read once at startup.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::identity::DEFAULT_LINK_TTL_SECS;
use crate::queue::dispatch::DEFAULT_RETENTION;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{0} environment variable is required")]
    Missing(&'static str),

    #[error("{name} is invalid: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// Which [`DocumentStore`](crate::store::DocumentStore) backs the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    File,
    Memory,
}

#[derive(Clone)]
pub struct Config {
    pub port: u16,
    /// Root for the file store (`store/`) and the spool (`queue/`).
    pub data_dir: PathBuf,
    pub store_backend: StoreBackend,
    pub github_webhook_secret: String,
    pub slack_signing_secret: String,
    pub slack_bot_token: String,
    pub worker_secret: String,
    pub worker_url: String,
    pub queue_name: String,
    pub admin_api_key: String,
    pub github_client_id: String,
    pub github_client_secret: String,
    pub oauth_redirect_url: String,
    pub max_attempts: u32,
    pub ingress_deadline: Duration,
    pub worker_deadline: Duration,
    pub slack_max_request_age_secs: u64,
    pub link_token_ttl_secs: u64,
    pub queue_poll_interval: Duration,
    /// How long finished jobs stay in the spool.
    pub spool_retention: Duration,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Secrets stay out of logs.
        f.debug_struct("Config")
            .field("port", &self.port)
            .field("data_dir", &self.data_dir)
            .field("store_backend", &self.store_backend)
            .field("worker_url", &self.worker_url)
            .field("queue_name", &self.queue_name)
            .field("oauth_redirect_url", &self.oauth_redirect_url)
            .field("max_attempts", &self.max_attempts)
            .field("ingress_deadline", &self.ingress_deadline)
            .field("worker_deadline", &self.worker_deadline)
            .field("spool_retention", &self.spool_retention)
            .finish_non_exhaustive()
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the config from any variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let port = parse_or(&lookup, "PORT", 3000u16)?;
        let data_dir = lookup("DATA_DIR")
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./data"));

        let store_backend = match lookup("STORE_BACKEND").as_deref().map(str::trim) {
            None | Some("") | Some("file") => StoreBackend::File,
            Some("memory") => StoreBackend::Memory,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    name: "STORE_BACKEND",
                    reason: format!("expected `file` or `memory`, got `{}`", other),
                });
            }
        };

        let worker_url = lookup("WORKER_URL")
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| format!("http://127.0.0.1:{}/internal/worker", port));

        let max_attempts = parse_or(&lookup, "MAX_ATTEMPTS", 5u32)?;
        if max_attempts == 0 {
            return Err(ConfigError::Invalid {
                name: "MAX_ATTEMPTS",
                reason: "must be at least 1".to_string(),
            });
        }

        Ok(Config {
            port,
            data_dir,
            store_backend,
            github_webhook_secret: required(&lookup, "GITHUB_WEBHOOK_SECRET")?,
            slack_signing_secret: required(&lookup, "SLACK_SIGNING_SECRET")?,
            slack_bot_token: required(&lookup, "SLACK_BOT_TOKEN")?,
            worker_secret: required(&lookup, "WORKER_SECRET")?,
            worker_url,
            queue_name: lookup("QUEUE_NAME")
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| "pr-relay".to_string()),
            admin_api_key: required(&lookup, "ADMIN_API_KEY")?,
            github_client_id: required(&lookup, "GITHUB_CLIENT_ID")?,
            github_client_secret: required(&lookup, "GITHUB_CLIENT_SECRET")?,
            oauth_redirect_url: required(&lookup, "OAUTH_REDIRECT_URL")?,
            max_attempts,
            ingress_deadline: Duration::from_millis(parse_or(
                &lookup,
                "INGRESS_DEADLINE_MS",
                2000u64,
            )?),
            worker_deadline: Duration::from_secs(parse_or(
                &lookup,
                "WORKER_DEADLINE_SECS",
                30u64,
            )?),
            slack_max_request_age_secs: parse_or(&lookup, "SLACK_MAX_REQUEST_AGE_SECS", 300u64)?,
            link_token_ttl_secs: parse_or(&lookup, "LINK_TOKEN_TTL_SECS", DEFAULT_LINK_TTL_SECS)?,
            queue_poll_interval: Duration::from_millis(parse_or(
                &lookup,
                "QUEUE_POLL_INTERVAL_MS",
                1000u64,
            )?),
            spool_retention: Duration::from_secs(parse_or(
                &lookup,
                "SPOOL_RETENTION_SECS",
                DEFAULT_RETENTION.as_secs(),
            )?),
        })
    }

    pub fn store_dir(&self) -> PathBuf {
        self.data_dir.join("store")
    }

    pub fn spool_dir(&self) -> PathBuf {
        self.data_dir.join("queue")
    }
}

/// A required secret or setting. Empty and whitespace-only values count as
/// missing so an unset secret can't silently accept everything.
fn required<F>(lookup: &F, name: &'static str) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(name)
        .filter(|s| !s.trim().is_empty())
        .ok_or(ConfigError::Missing(name))
}

fn parse_or<F, T>(lookup: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(name).filter(|s| !s.trim().is_empty()) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            name,
            reason: e.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn required_vars() -> HashMap<&'static str, String> {
        [
            ("GITHUB_WEBHOOK_SECRET", "gh-secret"),
            ("SLACK_SIGNING_SECRET", "slack-secret"),
            ("SLACK_BOT_TOKEN", "xoxb-1"),
            ("WORKER_SECRET", "worker-secret"),
            ("ADMIN_API_KEY", "admin"),
            ("GITHUB_CLIENT_ID", "client"),
            ("GITHUB_CLIENT_SECRET", "client-secret"),
            ("OAUTH_REDIRECT_URL", "https://relay.test/oauth/github/callback"),
        ]
        .into_iter()
        .map(|(k, v)| (k, v.to_string()))
        .collect()
    }

    fn load(vars: &HashMap<&'static str, String>) -> Result<Config, ConfigError> {
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn defaults_apply() {
        let config = load(&required_vars()).unwrap();
        assert_eq!(config.port, 3000);
        assert_eq!(config.data_dir, PathBuf::from("./data"));
        assert_eq!(config.store_backend, StoreBackend::File);
        assert_eq!(config.worker_url, "http://127.0.0.1:3000/internal/worker");
        assert_eq!(config.queue_name, "pr-relay");
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.ingress_deadline, Duration::from_millis(2000));
        assert_eq!(config.worker_deadline, Duration::from_secs(30));
        assert_eq!(config.slack_max_request_age_secs, 300);
        assert_eq!(config.link_token_ttl_secs, 600);
        assert_eq!(config.queue_poll_interval, Duration::from_secs(1));
        assert_eq!(config.spool_retention, Duration::from_secs(7 * 24 * 60 * 60));
        assert_eq!(config.spool_dir(), PathBuf::from("./data/queue"));
    }

    #[test]
    fn worker_url_follows_port() {
        let mut vars = required_vars();
        vars.insert("PORT", "8080".into());
        assert_eq!(
            load(&vars).unwrap().worker_url,
            "http://127.0.0.1:8080/internal/worker"
        );
    }

    #[test]
    fn missing_secret_is_reported_by_name() {
        let mut vars = required_vars();
        vars.remove("WORKER_SECRET");
        assert_eq!(load(&vars).unwrap_err(), ConfigError::Missing("WORKER_SECRET"));
    }

    #[test]
    fn empty_secret_counts_as_missing() {
        let mut vars = required_vars();
        vars.insert("GITHUB_WEBHOOK_SECRET", "  ".into());
        assert_eq!(
            load(&vars).unwrap_err(),
            ConfigError::Missing("GITHUB_WEBHOOK_SECRET")
        );
    }

    #[test]
    fn bad_numbers_are_invalid() {
        let mut vars = required_vars();
        vars.insert("PORT", "eighty".into());
        assert!(matches!(
            load(&vars).unwrap_err(),
            ConfigError::Invalid { name: "PORT", .. }
        ));

        let mut vars = required_vars();
        vars.insert("MAX_ATTEMPTS", "0".into());
        assert!(matches!(
            load(&vars).unwrap_err(),
            ConfigError::Invalid { name: "MAX_ATTEMPTS", .. }
        ));
    }

    #[test]
    fn store_backend_is_checked() {
        let mut vars = required_vars();
        vars.insert("STORE_BACKEND", "memory".into());
        assert_eq!(load(&vars).unwrap().store_backend, StoreBackend::Memory);

        vars.insert("STORE_BACKEND", "postgres".into());
        assert!(matches!(
            load(&vars).unwrap_err(),
            ConfigError::Invalid { name: "STORE_BACKEND", .. }
        ));
    }

    #[test]
    fn debug_output_hides_secrets() {
        let rendered = format!("{:?}", load(&required_vars()).unwrap());
        assert!(!rendered.contains("gh-secret"));
        assert!(!rendered.contains("xoxb-1"));
    }
}
