//! Slack Web API client.
//!
//! Slack answers almost everything with HTTP 200 and `{"ok": false, "error":
//! "<code>"}`; the code is what gets classified. Transport failures, HTTP 429
//! and 5xx are transient.

use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tokio::sync::OnceCell;
use tracing::{debug, instrument};

use crate::types::{ChannelId, MessageTs};

use super::{ChatApi, ChatError, ChatErrorKind, ChatMessage};

pub const DEFAULT_API_BASE: &str = "https://slack.com/api";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Classifies a Slack error code.
pub fn classify_error_code(code: &str) -> ChatErrorKind {
    match code {
        "already_reacted" | "no_reaction" => ChatErrorKind::AlreadySatisfied,
        "ratelimited" | "rate_limited" | "internal_error" | "fatal_error" | "service_unavailable"
        | "request_timeout" => ChatErrorKind::Transient,
        _ => ChatErrorKind::Permanent,
    }
}

fn error_from_code(method: &str, code: &str) -> ChatError {
    ChatError {
        kind: classify_error_code(code),
        code: Some(code.to_string()),
        message: format!("{} failed", method),
    }
}

fn error_from_transport(method: &str, err: reqwest::Error) -> ChatError {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        ChatError::transient(format!("{}: {}", method, err))
    } else {
        ChatError::permanent(format!("{}: {}", method, err))
    }
}

#[derive(Debug, Deserialize)]
struct Envelope {
    ok: bool,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PostMessageResponse {
    ts: String,
}

#[derive(Debug, Deserialize)]
struct AuthTestResponse {
    user_id: String,
}

#[derive(Debug, Deserialize)]
struct ReactionsGetResponse {
    message: ReactedMessage,
}

#[derive(Debug, Deserialize)]
struct ReactedMessage {
    #[serde(default)]
    reactions: Vec<Reaction>,
}

#[derive(Debug, Deserialize)]
struct Reaction {
    name: String,
    #[serde(default)]
    users: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ConversationsListResponse {
    #[serde(default)]
    channels: Vec<Conversation>,
    response_metadata: Option<ResponseMetadata>,
}

#[derive(Debug, Deserialize)]
struct Conversation {
    id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct ResponseMetadata {
    #[serde(default)]
    next_cursor: String,
}

/// [`ChatApi`] over the Slack Web API with a bot token.
pub struct SlackClient {
    http: reqwest::Client,
    api_base: String,
    token: String,
    bot_user_id: OnceCell<String>,
}

impl SlackClient {
    /// # Errors
    ///
    /// Fails only if the HTTP client can't be constructed.
    pub fn new(token: impl Into<String>) -> Result<Self, ChatError> {
        Self::with_api_base(token, DEFAULT_API_BASE)
    }

    /// Points the client at a different API root (used by tests).
    pub fn with_api_base(
        token: impl Into<String>,
        api_base: impl Into<String>,
    ) -> Result<Self, ChatError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ChatError::permanent(format!("failed to build HTTP client: {}", e)))?;
        Ok(SlackClient {
            http,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            token: token.into(),
            bot_user_id: OnceCell::new(),
        })
    }

    fn url(&self, method: &str) -> String {
        format!("{}/{}", self.api_base, method)
    }

    /// Sends a request and unwraps Slack's `ok`/`error` envelope.
    async fn send<T: DeserializeOwned>(
        &self,
        method: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<T, ChatError> {
        let response = request
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| error_from_transport(method, e))?;

        let status = response.status();
        if status.as_u16() == 429 || status.is_server_error() {
            return Err(ChatError {
                kind: ChatErrorKind::Transient,
                code: None,
                message: format!("{} returned HTTP {}", method, status.as_u16()),
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| error_from_transport(method, e))?;
        let envelope: Envelope = serde_json::from_slice(&bytes)
            .map_err(|e| ChatError::permanent(format!("{}: malformed response: {}", method, e)))?;

        if !envelope.ok {
            let code = envelope.error.unwrap_or_else(|| "unknown_error".into());
            return Err(error_from_code(method, &code));
        }

        serde_json::from_slice(&bytes)
            .map_err(|e| ChatError::permanent(format!("{}: malformed response: {}", method, e)))
    }

    async fn post_json<T: DeserializeOwned>(
        &self,
        method: &str,
        body: serde_json::Value,
    ) -> Result<T, ChatError> {
        self.send(method, self.http.post(self.url(method)).json(&body))
            .await
    }

    async fn get<T: DeserializeOwned>(
        &self,
        method: &str,
        query: &[(&str, &str)],
    ) -> Result<T, ChatError> {
        self.send(method, self.http.get(self.url(method)).query(query))
            .await
    }

    /// The bot's own user ID, fetched once via `auth.test`.
    async fn bot_user_id(&self) -> Result<&str, ChatError> {
        let id = self
            .bot_user_id
            .get_or_try_init(|| async {
                let resp: AuthTestResponse =
                    self.post_json("auth.test", serde_json::json!({})).await?;
                Ok::<_, ChatError>(resp.user_id)
            })
            .await?;
        Ok(id.as_str())
    }
}

#[async_trait]
impl ChatApi for SlackClient {
    #[instrument(skip(self, message), fields(channel = %channel))]
    async fn post_message(
        &self,
        channel: &ChannelId,
        message: &ChatMessage,
    ) -> Result<MessageTs, ChatError> {
        let mut body = serde_json::json!({
            "channel": channel.as_str(),
            "text": message.text,
            "unfurl_links": false,
        });
        if let Some(blocks) = &message.blocks {
            body["blocks"] = blocks.clone();
        }
        let resp: PostMessageResponse = self.post_json("chat.postMessage", body).await?;
        debug!(ts = %resp.ts, "Posted message");
        Ok(MessageTs::new(resp.ts))
    }

    async fn add_reaction(
        &self,
        channel: &ChannelId,
        ts: &MessageTs,
        emoji: &str,
    ) -> Result<(), ChatError> {
        let body = serde_json::json!({
            "channel": channel.as_str(),
            "timestamp": ts.as_str(),
            "name": emoji,
        });
        self.post_json::<serde_json::Value>("reactions.add", body)
            .await
            .map(|_| ())
    }

    async fn remove_reaction(
        &self,
        channel: &ChannelId,
        ts: &MessageTs,
        emoji: &str,
    ) -> Result<(), ChatError> {
        let body = serde_json::json!({
            "channel": channel.as_str(),
            "timestamp": ts.as_str(),
            "name": emoji,
        });
        self.post_json::<serde_json::Value>("reactions.remove", body)
            .await
            .map(|_| ())
    }

    async fn reactions(
        &self,
        channel: &ChannelId,
        ts: &MessageTs,
    ) -> Result<BTreeSet<String>, ChatError> {
        let bot = self.bot_user_id().await?.to_string();
        let resp: ReactionsGetResponse = self
            .get(
                "reactions.get",
                &[
                    ("channel", channel.as_str()),
                    ("timestamp", ts.as_str()),
                    ("full", "true"),
                ],
            )
            .await?;

        Ok(resp
            .message
            .reactions
            .into_iter()
            .filter(|r| r.users.iter().any(|u| *u == bot))
            .map(|r| r.name)
            .collect())
    }

    async fn resolve_channel(&self, name: &str) -> Result<Option<ChannelId>, ChatError> {
        let wanted = name.trim_start_matches('#');
        let mut cursor = String::new();
        loop {
            let resp: ConversationsListResponse = self
                .get(
                    "conversations.list",
                    &[
                        ("types", "public_channel,private_channel"),
                        ("exclude_archived", "true"),
                        ("limit", "200"),
                        ("cursor", cursor.as_str()),
                    ],
                )
                .await?;

            if let Some(found) = resp.channels.into_iter().find(|c| c.name == wanted) {
                return Ok(Some(ChannelId::new(found.id)));
            }

            match resp.response_metadata {
                Some(meta) if !meta.next_cursor.is_empty() => cursor = meta.next_cursor,
                _ => return Ok(None),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        Json, Router,
        extract::Query,
        http::{HeaderMap, StatusCode},
        routing::{get, post},
    };
    use serde_json::{Value, json};
    use std::collections::HashMap;

    #[test]
    fn classification_of_error_codes() {
        assert_eq!(
            classify_error_code("already_reacted"),
            ChatErrorKind::AlreadySatisfied
        );
        assert_eq!(
            classify_error_code("no_reaction"),
            ChatErrorKind::AlreadySatisfied
        );
        assert_eq!(classify_error_code("ratelimited"), ChatErrorKind::Transient);
        assert_eq!(classify_error_code("internal_error"), ChatErrorKind::Transient);
        for code in [
            "channel_not_found",
            "is_archived",
            "not_in_channel",
            "message_not_found",
            "invalid_auth",
            "something_new",
        ] {
            assert_eq!(classify_error_code(code), ChatErrorKind::Permanent, "{code}");
        }
    }

    async fn fake_slack() -> String {
        async fn post_message(headers: HeaderMap, Json(body): Json<Value>) -> Json<Value> {
            let authed = headers
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                == Some("Bearer xoxb-test");
            if !authed {
                return Json(json!({"ok": false, "error": "invalid_auth"}));
            }
            if body["channel"] == "C_GONE" {
                return Json(json!({"ok": false, "error": "channel_not_found"}));
            }
            Json(json!({"ok": true, "ts": "1700000000.000100", "channel": body["channel"]}))
        }

        async fn reactions_add(Json(body): Json<Value>) -> Json<Value> {
            if body["name"] == "white_check_mark" {
                Json(json!({"ok": false, "error": "already_reacted"}))
            } else {
                Json(json!({"ok": true}))
            }
        }

        async fn reactions_remove() -> StatusCode {
            StatusCode::TOO_MANY_REQUESTS
        }

        async fn auth_test() -> Json<Value> {
            Json(json!({"ok": true, "user_id": "UBOT"}))
        }

        async fn reactions_get() -> Json<Value> {
            Json(json!({
                "ok": true,
                "message": {
                    "reactions": [
                        {"name": "white_check_mark", "users": ["UBOT", "U1"], "count": 2},
                        {"name": "eyes", "users": ["U1"], "count": 1}
                    ]
                }
            }))
        }

        async fn conversations_list(Query(q): Query<HashMap<String, String>>) -> Json<Value> {
            match q.get("cursor").map(String::as_str).unwrap_or("") {
                "" => Json(json!({
                    "ok": true,
                    "channels": [{"id": "C1", "name": "general"}],
                    "response_metadata": {"next_cursor": "page2"}
                })),
                _ => Json(json!({
                    "ok": true,
                    "channels": [{"id": "C2", "name": "eng"}],
                    "response_metadata": {"next_cursor": ""}
                })),
            }
        }

        let app = Router::new()
            .route("/chat.postMessage", post(post_message))
            .route("/reactions.add", post(reactions_add))
            .route("/reactions.remove", post(reactions_remove))
            .route("/auth.test", post(auth_test))
            .route("/reactions.get", get(reactions_get))
            .route("/conversations.list", get(conversations_list));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn message() -> ChatMessage {
        ChatMessage {
            text: "hello".into(),
            blocks: None,
        }
    }

    #[tokio::test]
    async fn post_message_returns_ts() {
        let client = SlackClient::with_api_base("xoxb-test", fake_slack().await).unwrap();
        let ts = client
            .post_message(&ChannelId::new("C1"), &message())
            .await
            .unwrap();
        assert_eq!(ts, MessageTs::new("1700000000.000100"));
    }

    #[tokio::test]
    async fn slack_error_codes_are_classified() {
        let base = fake_slack().await;
        let client = SlackClient::with_api_base("xoxb-test", base.clone()).unwrap();
        let err = client
            .post_message(&ChannelId::new("C_GONE"), &message())
            .await
            .unwrap_err();
        assert_eq!(err.kind, ChatErrorKind::Permanent);
        assert_eq!(err.code.as_deref(), Some("channel_not_found"));

        let bad_token = SlackClient::with_api_base("xoxb-wrong", base).unwrap();
        let err = bad_token
            .post_message(&ChannelId::new("C1"), &message())
            .await
            .unwrap_err();
        assert_eq!(err.code.as_deref(), Some("invalid_auth"));
    }

    #[tokio::test]
    async fn already_reacted_is_already_satisfied() {
        let client = SlackClient::with_api_base("xoxb-test", fake_slack().await).unwrap();
        let channel = ChannelId::new("C1");
        let ts = MessageTs::new("1.0");

        let err = client
            .add_reaction(&channel, &ts, "white_check_mark")
            .await
            .unwrap_err();
        assert_eq!(err.kind, ChatErrorKind::AlreadySatisfied);
        client.add_reaction(&channel, &ts, "tada").await.unwrap();
    }

    #[tokio::test]
    async fn http_429_is_transient() {
        let client = SlackClient::with_api_base("xoxb-test", fake_slack().await).unwrap();
        let err = client
            .remove_reaction(&ChannelId::new("C1"), &MessageTs::new("1.0"), "x")
            .await
            .unwrap_err();
        assert_eq!(err.kind, ChatErrorKind::Transient);
    }

    #[tokio::test]
    async fn reactions_are_filtered_to_bot_user() {
        let client = SlackClient::with_api_base("xoxb-test", fake_slack().await).unwrap();
        let reactions = client
            .reactions(&ChannelId::new("C1"), &MessageTs::new("1.0"))
            .await
            .unwrap();
        assert_eq!(reactions, BTreeSet::from(["white_check_mark".to_string()]));
    }

    #[tokio::test]
    async fn resolve_channel_follows_cursor() {
        let client = SlackClient::with_api_base("xoxb-test", fake_slack().await).unwrap();
        assert_eq!(
            client.resolve_channel("#eng").await.unwrap(),
            Some(ChannelId::new("C2"))
        );
        assert_eq!(client.resolve_channel("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn unreachable_api_is_transient() {
        let client = SlackClient::with_api_base("xoxb-test", "http://127.0.0.1:1").unwrap();
        let err = client
            .post_message(&ChannelId::new("C1"), &message())
            .await
            .unwrap_err();
        assert_eq!(err.kind, ChatErrorKind::Transient);
    }
}
