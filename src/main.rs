mod audio;
mod backend;
mod config;
mod conversation;
mod events;
mod logging;
mod repl;
#[cfg(test)]
mod test_support;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use strum::IntoEnumIterator;
use tokio::sync::mpsc;

use crate::audio::{AudioOutput, PlaybackController, RodioOutput, SilentOutput, audio_url};
use crate::backend::HttpChatBackend;
use crate::config::Config;
use crate::conversation::{ConversationController, SubmitOutcome};
use crate::events::{Emotion, EventSender};

#[derive(Parser)]
#[command(name = "voxchat")]
#[command(version)]
#[command(about = "Chat with a voice backend and hear the replies", long_about = None)]
struct Cli {
    /// Backend root URL, overrides config and VOXCHAT_BASE_URL
    #[arg(long, global = true)]
    base_url: Option<String>,

    /// Deployment profile to use
    #[arg(long, global = true)]
    profile: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start an interactive chat (default)
    Chat {
        #[command(flatten)]
        voice: VoiceArgs,
        /// Never play audio
        #[arg(long)]
        mute: bool,
    },
    /// Send one message and print the reply
    Send {
        text: String,
        #[command(flatten)]
        voice: VoiceArgs,
    },
    /// List the speakers of the active profile
    Speakers,
    /// List emotion tags
    Emotions,
    /// List deployment profiles
    Profiles,
    /// Show the resolved configuration
    Config,
}

#[derive(clap::Args, Default)]
struct VoiceArgs {
    /// Speaker name or id
    #[arg(long)]
    speaker: Option<String>,
    /// Emotion tag
    #[arg(long)]
    emotion: Option<Emotion>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load()?;
    config.apply_overrides(cli.base_url, cli.profile)?;
    logging::init(&config.log_filter)?;

    match cli.command.unwrap_or(Commands::Chat {
        voice: VoiceArgs::default(),
        mute: false,
    }) {
        Commands::Chat { voice, mute } => chat(&config, voice, mute).await,
        Commands::Send { text, voice } => send(&config, &text, voice).await,
        Commands::Speakers => {
            let profile = config.active_profile()?;
            println!("🎙  Speakers for '{}':", config.profile);
            for speaker in &profile.speakers {
                println!("  {:>3}  {}", speaker.id, speaker.name);
            }
            Ok(())
        }
        Commands::Emotions => {
            if !config.active_profile()?.emotions_enabled {
                println!("Profile '{}' has no emotion selection.", config.profile);
                return Ok(());
            }
            for emotion in Emotion::iter() {
                println!("  • {}", emotion);
            }
            Ok(())
        }
        Commands::Profiles => {
            for name in config.profile_names() {
                let marker = if name == config.profile { "*" } else { " " };
                println!(" {} {}", marker, name);
            }
            Ok(())
        }
        Commands::Config => {
            println!("📁 {}", config.voxchat_home.join("config.toml").display());
            print!("{}", toml::to_string_pretty(&config).context("Failed to serialize config")?);
            Ok(())
        }
    }
}

fn open_output(mute: bool) -> Arc<dyn AudioOutput> {
    if mute {
        return Arc::new(SilentOutput::new());
    }
    match RodioOutput::open() {
        Ok(output) => Arc::new(output),
        Err(err) => {
            tracing::warn!(error = %err, "no audio output, continuing muted");
            Arc::new(SilentOutput::new())
        }
    }
}

fn build_controller(
    config: &Config,
    output: Arc<dyn AudioOutput>,
    voice: VoiceArgs,
    events: Option<EventSender>,
) -> Result<ConversationController> {
    let profile = config.active_profile()?.clone();
    let backend = HttpChatBackend::new(config.base_url.clone(), config.request_timeout())?;
    let playback = PlaybackController::new(config.base_url.clone(), output, events.clone());
    let controller = ConversationController::new(profile, Arc::new(backend), Arc::new(playback), events);

    if let Some(speaker) = voice.speaker {
        controller.select_speaker_by_name(&speaker)?;
    }
    if let Some(emotion) = voice.emotion {
        controller.select_emotion(emotion)?;
    }

    tracing::info!(
        session_id = %controller.session_id(),
        base_url = %config.base_url,
        profile = %config.profile,
        "session ready"
    );
    Ok(controller)
}

async fn chat(config: &Config, voice: VoiceArgs, mute: bool) -> Result<()> {
    let (tx, rx) = mpsc::unbounded_channel();
    let controller = build_controller(config, open_output(mute), voice, Some(tx))?;
    repl::run(Arc::new(controller), rx).await
}

async fn send(config: &Config, text: &str, voice: VoiceArgs) -> Result<()> {
    let controller = build_controller(config, Arc::new(SilentOutput::new()), voice, None)?;

    let index = match controller.submit(text).await {
        SubmitOutcome::Ignored => anyhow::bail!("Nothing to send"),
        SubmitOutcome::Busy => anyhow::bail!("A request is already in flight"),
        SubmitOutcome::Replied { index } | SubmitOutcome::Failed { index } => index,
    };

    let history = controller.history();
    let reply = history.get(index).context("Reply missing from history")?;
    println!("{}", reply.content);
    if let Some(audio_ref) = &reply.audio_ref {
        println!("🔊 {}", audio_url(&config.base_url, audio_ref));
    }
    Ok(())
}
