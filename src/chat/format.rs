//! Rendering of relay messages.

use serde::Serialize;

use crate::webhooks::PullRequestEvent;

/// A message body in Slack mrkdwn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocks: Option<serde_json::Value>,
}

/// Escapes the three characters Slack treats as control sequences.
pub fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// The message posted when a pull request opens.
///
/// `mention` is the author's chat user when their identity is verified, so
/// the message pings them instead of showing a bare login.
pub fn opened_message(pr: &PullRequestEvent, mention: Option<&str>) -> ChatMessage {
    let author = match mention {
        Some(user_id) => format!("<@{}>", user_id),
        None => escape(&pr.author_login),
    };
    let link = format!("<{}|{}>", pr.html_url, escape(&pr.title));
    let text = format!(
        ":git-pull-request: {} ({}#{}) opened by {}",
        link,
        escape(pr.repo.as_str()),
        pr.pr_number.0,
        author
    );

    let blocks = serde_json::json!([
        {
            "type": "section",
            "text": { "type": "mrkdwn", "text": format!("*{}*", link) }
        },
        {
            "type": "context",
            "elements": [
                {
                    "type": "mrkdwn",
                    "text": format!("`{}` #{} · opened by {}", escape(pr.repo.as_str()), pr.pr_number.0, author)
                }
            ]
        }
    ]);

    ChatMessage {
        text,
        blocks: Some(blocks),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::pr_event;
    use crate::webhooks::PrAction;

    #[test]
    fn escapes_control_characters() {
        assert_eq!(escape("a < b && c > d"), "a &lt; b &amp;&amp; c &gt; d");
    }

    #[test]
    fn opened_message_links_pr_and_names_author() {
        let mut pr = pr_event("acme/widgets", 42, PrAction::Opened, "");
        pr.title = "Fix <script> & stuff".into();
        let msg = opened_message(&pr, None);

        assert!(msg.text.contains("<https://github.com/acme/widgets/pull/42|Fix &lt;script&gt; &amp; stuff>"));
        assert!(msg.text.contains("acme/widgets#42"));
        assert!(msg.text.ends_with("opened by alice"));
        assert!(msg.blocks.is_some());
    }

    #[test]
    fn opened_message_mentions_verified_author() {
        let pr = pr_event("acme/widgets", 42, PrAction::Opened, "");
        let msg = opened_message(&pr, Some("U1"));
        assert!(msg.text.ends_with("opened by <@U1>"));
    }
}
