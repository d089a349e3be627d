//! Conversation state, the outbound request, and slash commands

pub mod commands;
pub mod controller;
pub mod history;

pub use commands::{ParsedCommand, SlashCommand, get_help_text, parse_slash_command};
pub use controller::{ConversationController, SubmitOutcome};
