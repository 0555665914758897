//! PR Relay - posts pull requests into Slack and mirrors their review state
//! as reactions on the posted message.
//!
//! GitHub and Slack webhooks are verified and spooled by the HTTP layer; the
//! spool delivers each job back to the worker endpoint, which runs the
//! [`processor`] against the [`store`] and the chat platform.

pub mod channel;
pub mod chat;
pub mod commands;
pub mod config;
pub mod github;
pub mod identity;
pub mod persistence;
pub mod processor;
pub mod queue;
pub mod reactions;
pub mod server;
pub mod store;
pub mod types;
pub mod webhooks;

#[cfg(test)]
pub(crate) mod test_utils;
