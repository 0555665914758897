//! Slash command parsing.
//!
//! Every user-facing operation is reached through one slash command whose
//! text is the subcommand:
//!
//! - `link` - Starts linking the chat user to a GitHub identity
//! - `unlink` - Clears the binding (history is kept)
//! - `channel #name` - Sets the user's default channel
//! - `status` - Reports the current binding
//! - `help` (or empty) - Lists the subcommands
//!
//! # Example
//!
//! ```
//! use pr_relay::commands::{parse_command, Command};
//!
//! assert_eq!(parse_command("link"), Ok(Command::Link));
//! assert_eq!(parse_command("  STATUS "), Ok(Command::Status));
//! assert!(parse_command("frobnicate").is_err());
//! ```

mod parser;
mod types;

pub use parser::{HELP_TEXT, parse_command};
pub use types::{Command, CommandError};
