//! Line-based front end for a [`ConversationController`].
//!
//! Input is read one line at a time and the next line is not read until the
//! current submission finishes, which is what keeps the user from sending
//! while a request is in flight.

use crate::conversation::{
    ConversationController, ParsedCommand, SlashCommand, SubmitOutcome, get_help_text,
    parse_slash_command,
};
use crate::events::{ChatEvent, Emotion, Message, Role};
use anyhow::Result;
use std::str::FromStr;
use std::sync::Arc;
use strum::IntoEnumIterator;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, oneshot};

/// What the input loop should do after a command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplAction {
    Continue,
    Exit,
}

pub async fn run(
    controller: Arc<ConversationController>,
    events: mpsc::UnboundedReceiver<ChatEvent>,
) -> Result<()> {
    println!("💬 voxchat — type a message and press Enter. /help lists commands.");
    println!("{}", status_line(&controller));
    for (index, message) in controller.history().iter().enumerate() {
        println!("{}", format_message(index, message));
    }

    let (stop, stop_rx) = oneshot::channel();
    let printer = tokio::spawn(print_events(events, stop_rx));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if handle_line(&controller, line).await == ReplAction::Exit {
            break;
        }
    }

    // Every event of the last submit is queued by now; let the printer drain them.
    let _ = stop.send(());
    if let Err(err) = printer.await {
        tracing::warn!(error = %err, "event printer failed");
    }
    println!("👋 Bye!");
    Ok(())
}

/// Dispatch one input line: a command, an unknown command, or a message.
pub async fn handle_line(controller: &ConversationController, line: String) -> ReplAction {
    if let Some(command) = parse_slash_command(&line) {
        return handle_command(controller, command).await;
    }

    let trimmed = line.trim();
    if trimmed.starts_with('/') {
        let name = trimmed.split_whitespace().next().unwrap_or(trimmed);
        println!("❓ Unknown command {}. /help lists commands.", name);
        return ReplAction::Continue;
    }

    controller.set_pending_input(line.clone());
    if controller.submit(&line).await == SubmitOutcome::Busy {
        println!("⏳ Still waiting for the previous reply.");
    }
    ReplAction::Continue
}

/// Run one slash command against the controller.
pub async fn handle_command(controller: &ConversationController, command: ParsedCommand) -> ReplAction {
    match command.command {
        SlashCommand::Speaker => {
            match command.argument() {
                None => println!("{}", speaker_list(controller)),
                Some(name) => match controller.select_speaker_by_name(name) {
                    Ok(()) => println!("{}", status_line(controller)),
                    Err(err) => println!("❌ {}", err),
                },
            }
            ReplAction::Continue
        }
        SlashCommand::Emotion => {
            match command.argument() {
                None => println!("{}", emotion_list(controller)),
                Some(name) => {
                    let result = Emotion::from_str(name.trim())
                        .map_err(|_| format!("Unknown emotion '{}'", name.trim()))
                        .and_then(|emotion| {
                            controller.select_emotion(emotion).map_err(|e| e.to_string())
                        });
                    match result {
                        Ok(()) => println!("{}", status_line(controller)),
                        Err(err) => println!("❌ {}", err),
                    }
                }
            }
            ReplAction::Continue
        }
        SlashCommand::Play => {
            let target = match command.message_index() {
                Err(err) => {
                    println!("❌ {}", err);
                    return ReplAction::Continue;
                }
                Ok(Some(index)) => controller
                    .history()
                    .get(index)
                    .and_then(|message| message.audio_ref.clone())
                    .map(|audio_ref| (index, audio_ref)),
                Ok(None) => controller.latest_audio(),
            };
            match target {
                Some((_, audio_ref)) if controller.playback().is_loading_ref(&audio_ref) => {
                    println!("⏳ Loading...");
                }
                Some((index, _)) => {
                    controller.replay(index).await;
                }
                None => println!("🔇 No audio to play."),
            }
            ReplAction::Continue
        }
        SlashCommand::History => {
            for (index, message) in controller.history().iter().enumerate() {
                println!("{}", format_message(index, message));
            }
            ReplAction::Continue
        }
        SlashCommand::Help => {
            println!("{}", get_help_text());
            ReplAction::Continue
        }
        SlashCommand::Bye => ReplAction::Exit,
    }
}

/// Print events until the channel closes or `stop` fires, then flush what is
/// still queued. Returns the number of lines printed.
async fn print_events(
    mut events: mpsc::UnboundedReceiver<ChatEvent>,
    mut stop: oneshot::Receiver<()>,
) -> usize {
    let mut printed = 0;
    let mut emit = |event: &ChatEvent| {
        if let Some(line) = render_event(event) {
            println!("{}", line);
            printed += 1;
        }
    };

    loop {
        tokio::select! {
            biased;
            event = events.recv() => match event {
                Some(event) => emit(&event),
                None => break,
            },
            _ = &mut stop => {
                while let Ok(event) = events.try_recv() {
                    emit(&event);
                }
                break;
            }
        }
    }
    printed
}

fn render_event(event: &ChatEvent) -> Option<String> {
    match event {
        ChatEvent::MessageAppended { index, message } if message.role == Role::Assistant => {
            Some(format_message(*index, message))
        }
        ChatEvent::RequestInFlight(true) => Some("   Sending...".to_string()),
        ChatEvent::PlaybackLoading { audio_ref } => Some(format!("   🔊 Loading {}...", audio_ref)),
        ChatEvent::PlaybackFailed { .. } | ChatEvent::DeviceError { .. } => {
            Some("   🔇 Audio unavailable, try /play again.".to_string())
        }
        _ => None,
    }
}

/// `[n] Role (label): content  ♪ clip` with a 1-based number.
pub fn format_message(index: usize, message: &Message) -> String {
    let mut line = format!("[{}] {}", index + 1, message.role.display_name());
    if let Some(label) = &message.speaker_label {
        line.push_str(&format!(" ({})", label));
    }
    line.push_str(": ");
    line.push_str(&message.content);
    if let Some(audio_ref) = &message.audio_ref {
        line.push_str(&format!("  ♪ {}", audio_ref));
    }
    line
}

pub fn status_line(controller: &ConversationController) -> String {
    let speaker = controller
        .speaker()
        .map(|speaker| speaker.name)
        .unwrap_or_else(|| "-".to_string());
    match controller.emotion() {
        Some(emotion) => format!("🎙  Speaker: {}  Emotion: {}", speaker, emotion),
        None => format!("🎙  Speaker: {}", speaker),
    }
}

fn speaker_list(controller: &ConversationController) -> String {
    let current = controller.speaker();
    let profile = controller.profile();
    if profile.speakers.is_empty() {
        return "No speakers in this deployment.".to_string();
    }

    let mut out = String::from("Speakers:\n");
    for speaker in &profile.speakers {
        let marker = if current.as_ref() == Some(speaker) { "*" } else { " " };
        out.push_str(&format!(" {} {:>3}  {}\n", marker, speaker.id, speaker.name));
    }
    out
}

fn emotion_list(controller: &ConversationController) -> String {
    let Some(current) = controller.emotion() else {
        return "This deployment has no emotion selection.".to_string();
    };

    let mut out = String::from("Emotions:\n");
    for emotion in Emotion::iter() {
        let marker = if emotion == current { "*" } else { " " };
        out.push_str(&format!(" {} {}\n", marker, emotion));
    }
    out
}
