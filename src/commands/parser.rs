//! Parser for slash command text.
//!
//! Pure: turns the `text` field of a slash command into a [`Command`].

use crate::channel::parse_channel_ref;

use super::types::{Command, CommandError};

/// Shown for `help` and alongside parse errors.
pub const HELP_TEXT: &str = "Usage:\n\
    • `link` - connect your GitHub account\n\
    • `unlink` - disconnect it\n\
    • `channel #name` - post your pull requests to #name by default\n\
    • `status` - show your current settings\n\
    • `help` - show this message";

/// Parses slash command text.
///
/// # Parsing Rules
///
/// - Subcommand names are case-insensitive
/// - Whitespace between tokens is flexible (spaces, tabs)
/// - Empty text means `help`
/// - Extra arguments after `link`, `unlink`, `status` and `help` are ignored
///
/// # Errors
///
/// Returns [`CommandError`] for an unknown subcommand or a bad channel.
pub fn parse_command(text: &str) -> Result<Command, CommandError> {
    let (word, rest) = split_first_word(text.trim());

    match word.to_ascii_lowercase().as_str() {
        "" | "help" => Ok(Command::Help),
        "link" => Ok(Command::Link),
        "unlink" => Ok(Command::Unlink),
        "status" => Ok(Command::Status),
        "channel" => parse_channel(rest),
        _ => Err(CommandError::Unknown(word.to_string())),
    }
}

fn parse_channel(text: &str) -> Result<Command, CommandError> {
    let (arg, _) = split_first_word(text.trim_start());
    if arg.is_empty() {
        return Err(CommandError::MissingChannel);
    }
    parse_channel_ref(arg)
        .map(Command::Channel)
        .ok_or_else(|| CommandError::InvalidChannel(arg.to_string()))
}

/// Splits text at the first whitespace, returning (word, rest).
/// If no whitespace, returns (text, "").
fn split_first_word(text: &str) -> (&str, &str) {
    match text.find(|c: char| c.is_ascii_whitespace()) {
        Some(pos) => (&text[..pos], &text[pos..]),
        None => (text, ""),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ChannelTarget;
    use crate::types::ChannelId;
    use proptest::prelude::*;

    // ─── Subcommands ───

    #[test]
    fn bare_subcommands_parse() {
        assert_eq!(parse_command("link"), Ok(Command::Link));
        assert_eq!(parse_command("unlink"), Ok(Command::Unlink));
        assert_eq!(parse_command("status"), Ok(Command::Status));
        assert_eq!(parse_command("help"), Ok(Command::Help));
    }

    #[test]
    fn empty_text_is_help() {
        assert_eq!(parse_command(""), Ok(Command::Help));
        assert_eq!(parse_command("   \t"), Ok(Command::Help));
    }

    #[test]
    fn trailing_arguments_are_ignored() {
        assert_eq!(parse_command("link please"), Ok(Command::Link));
    }

    #[test]
    fn unknown_subcommand_is_reported() {
        assert_eq!(
            parse_command("deploy prod"),
            Err(CommandError::Unknown("deploy".into()))
        );
    }

    // ─── channel ───

    #[test]
    fn channel_by_name() {
        assert_eq!(
            parse_command("channel #Eng"),
            Ok(Command::Channel(ChannelTarget::Name("eng".into())))
        );
    }

    #[test]
    fn channel_by_escaped_mention() {
        assert_eq!(
            parse_command("channel <#C0123ABC|eng>"),
            Ok(Command::Channel(ChannelTarget::Id(ChannelId::new("C0123ABC"))))
        );
    }

    #[test]
    fn channel_requires_an_argument() {
        assert_eq!(parse_command("channel"), Err(CommandError::MissingChannel));
        assert_eq!(parse_command("channel   "), Err(CommandError::MissingChannel));
    }

    #[test]
    fn channel_rejects_garbage() {
        assert_eq!(
            parse_command("channel #no/slashes"),
            Err(CommandError::InvalidChannel("#no/slashes".into()))
        );
    }

    #[test]
    fn split_first_word_works() {
        assert_eq!(split_first_word("hello world"), ("hello", " world"));
        assert_eq!(split_first_word("hello"), ("hello", ""));
        assert_eq!(split_first_word(""), ("", ""));
        assert_eq!(split_first_word("a\tb"), ("a", "\tb"));
    }

    // ─── Properties ───

    proptest! {
        #[test]
        fn arbitrary_text_never_panics(text: String) {
            let _ = parse_command(&text);
        }

        #[test]
        fn case_and_whitespace_variations(
            cmd in prop_oneof![Just("link"), Just("LINK"), Just("Link"), Just("lInK")],
            pre in "[ \t]{0,3}",
            post in "[ \t]{0,3}",
        ) {
            let text = format!("{}{}{}", pre, cmd, post);
            prop_assert_eq!(parse_command(&text), Ok(Command::Link));
        }
    }
}
