use std::str::FromStr;

use strum::{AsRefStr, EnumIter, EnumString, IntoEnumIterator, IntoStaticStr};

/// Commands that can be invoked by starting a line with a leading slash.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, EnumIter, AsRefStr, IntoStaticStr,
)]
#[strum(serialize_all = "kebab-case")]
pub enum SlashCommand {
    /// Show or change the speaker
    Speaker,
    /// Show or change the emotion tag
    Emotion,
    /// Replay a message's audio
    Play,
    /// Print the transcript
    History,
    /// Show help
    Help,
    /// Exit the application
    Bye,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCommand {
    pub command: SlashCommand,
    pub argument: Option<String>,
}

impl ParsedCommand {
    pub fn argument(&self) -> Option<&str> {
        self.argument.as_deref()
    }

    /// `/play <n>` uses the 1-based numbers printed next to messages.
    /// `Ok(None)` when no number was given.
    pub fn message_index(&self) -> Result<Option<usize>, String> {
        let Some(argument) = self.argument().filter(|_| self.command == SlashCommand::Play) else {
            return Ok(None);
        };
        let argument = argument.trim();
        argument
            .parse::<usize>()
            .ok()
            .and_then(|number| number.checked_sub(1))
            .map(Some)
            .ok_or_else(|| format!("Invalid message number '{}'", argument))
    }
}

impl SlashCommand {
    /// User-visible description shown in help.
    pub fn description(self) -> &'static str {
        match self {
            SlashCommand::Speaker => "show speakers, or pick one by name or id",
            SlashCommand::Emotion => "show emotions, or pick one",
            SlashCommand::Play => "replay the latest clip, or the clip of message <n>",
            SlashCommand::History => "print the conversation so far",
            SlashCommand::Help => "show available commands",
            SlashCommand::Bye => "exit the application",
        }
    }

    /// Command string without the leading '/'.
    pub fn command(self) -> &'static str {
        self.into()
    }
}

/// Parse a slash command from user input
pub fn parse_slash_command(input: &str) -> Option<ParsedCommand> {
    let body = input.trim().strip_prefix('/')?;

    let mut parts = body.split_whitespace();
    let head = parts.next()?.to_lowercase();
    let rest: Vec<&str> = parts.collect();

    let command = SlashCommand::from_str(&head).ok().or_else(|| match head.as_str() {
        "q" | "quit" | "exit" => Some(SlashCommand::Bye),
        "s" | "voice" => Some(SlashCommand::Speaker),
        "e" | "mood" => Some(SlashCommand::Emotion),
        "p" | "replay" => Some(SlashCommand::Play),
        "h" | "log" => Some(SlashCommand::History),
        "?" => Some(SlashCommand::Help),
        _ => None,
    })?;

    let argument = if rest.is_empty() {
        None
    } else {
        Some(rest.join(" "))
    };

    Some(ParsedCommand { command, argument })
}

/// Get help text for all available commands
pub fn get_help_text() -> String {
    let mut help = String::from("Available commands:\n\n");
    for command in SlashCommand::iter() {
        help.push_str(&format!("/{} - {}\n", command.command(), command.description()));
    }

    help.push_str("\nAliases: /q for /bye, /s for /speaker, /e for /emotion, /p for /play, /h for /history");
    help.push_str("\nAnything that does not start with '/' is sent as a message.");
    help.push_str("\nUnknown commands are reported, never sent.");

    help
}
