use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter, EnumString};

/// Role of a conversation participant.
///
/// The lowercase form is what ends up in the prompt transcript, so
/// `Role::User.as_ref()` is `"user"`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn display_name(&self) -> &'static str {
        match self {
            Role::User => "User",
            Role::Assistant => "GPT",
        }
    }
}

/// Emotion tags the voice backend understands.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
    AsRefStr,
)]
#[strum(ascii_case_insensitive)]
pub enum Emotion {
    #[default]
    Neutral,
    Happy,
    Sad,
    Angry,
}

/// Opaque identifier of a synthesized clip, as returned in `audio_path`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AudioRef(String);

impl AudioRef {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl std::fmt::Display for AudioRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A single entry of the transcript. Never mutated after it is appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    pub audio_ref: Option<AudioRef>,
    pub speaker_label: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            audio_ref: None,
            speaker_label: None,
            timestamp: Utc::now(),
        }
    }

    pub fn assistant(
        content: impl Into<String>,
        audio_ref: Option<AudioRef>,
        speaker_label: Option<String>,
    ) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            audio_ref,
            speaker_label,
            timestamp: Utc::now(),
        }
    }

    /// `"<role>: <content>"`, one line of the prompt transcript.
    pub fn transcript_line(&self) -> String {
        format!("{}: {}", self.role.as_ref(), self.content)
    }
}

/// Notifications emitted by the controllers so a front end can redraw
/// without polling.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    /// A message was appended at `index` of the history.
    MessageAppended { index: usize, message: Message },

    /// The outbound chat request started or finished.
    RequestInFlight(bool),

    /// Playback of `audio_ref` started loading.
    PlaybackLoading { audio_ref: AudioRef },

    /// The output device reported that `audio_ref` is playing.
    PlaybackStarted { audio_ref: AudioRef },

    /// Loading was cleared without playback starting.
    PlaybackFailed { audio_ref: Option<AudioRef>, reason: String },

    /// The output device reported an error on its own; `audio_ref` is
    /// whatever was targeted at the time.
    DeviceError { audio_ref: Option<AudioRef>, reason: String },
}

pub type EventSender = tokio::sync::mpsc::UnboundedSender<ChatEvent>;
