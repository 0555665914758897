//! Inbound webhook handling.
//!
//! This module provides:
//! - Signature verification for GitHub and Slack requests (HMAC-SHA256)
//! - Typed GitHub events and the payload parser

pub mod events;
pub mod parser;
pub mod signature;

pub use events::{CodeHostEvent, PrAction, PullRequestEvent, ReviewAction, ReviewEvent};
pub use parser::{ParseError, is_relevant_event, parse_webhook};
pub use signature::{
    SignatureError, format_signature_header, format_slack_signature_header,
    parse_signature_header, parse_slack_signature_header, verify_github_signature,
    verify_slack_signature,
};
