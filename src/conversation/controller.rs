use crate::audio::playback::PlaybackController;
use crate::backend::{ChatBackend, ChatRequest};
use crate::config::{Profile, Speaker};
use crate::conversation::history::ConversationHistory;
use crate::events::{AudioRef, ChatEvent, Emotion, EventSender, Message};
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectionError {
    #[error("No speaker {0} in this deployment")]
    UnknownSpeaker(String),
    #[error("This deployment has no emotion selection")]
    EmotionsDisabled,
}

/// Result of [`ConversationController::submit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Empty or whitespace-only input; nothing changed.
    Ignored,
    /// Another submission is still in flight; nothing changed.
    Busy,
    /// The backend answered; the reply is at `index`.
    Replied { index: usize },
    /// The request failed; the failure message is at `index`.
    Failed { index: usize },
}

/// Mutable part of a conversation.
#[derive(Debug, Clone)]
pub struct ConversationState {
    pub history: ConversationHistory,
    pub pending_input: String,
    pub in_flight: bool,
    /// Index into the profile's roster; `None` when the roster is empty.
    pub speaker: Option<usize>,
    /// `None` when the deployment has no emotion selection.
    pub emotion: Option<Emotion>,
}

impl ConversationState {
    fn new(profile: &Profile) -> Self {
        Self {
            history: ConversationHistory::seeded(profile.greeting.as_deref()),
            pending_input: String::new(),
            in_flight: false,
            speaker: (!profile.speakers.is_empty()).then_some(0),
            emotion: profile.emotions_enabled.then_some(profile.default_emotion),
        }
    }
}

/// Drives one chat session: history, the single outbound request, speaker
/// and emotion selection, and automatic playback of replies.
///
/// All methods take `&self`; share it behind an `Arc` to change selections
/// while a request is pending.
pub struct ConversationController {
    session_id: Uuid,
    profile: Profile,
    backend: Arc<dyn ChatBackend>,
    playback: Arc<PlaybackController>,
    state: Mutex<ConversationState>,
    events: Option<EventSender>,
}

impl ConversationController {
    pub fn new(
        profile: Profile,
        backend: Arc<dyn ChatBackend>,
        playback: Arc<PlaybackController>,
        events: Option<EventSender>,
    ) -> Self {
        let state = ConversationState::new(&profile);
        let session_id = Uuid::new_v4();
        tracing::debug!(%session_id, seeded = state.history.len(), "conversation started");

        Self {
            session_id,
            profile,
            backend,
            playback,
            state: Mutex::new(state),
            events,
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn profile(&self) -> &Profile {
        &self.profile
    }

    pub fn playback(&self) -> &PlaybackController {
        &self.playback
    }

    #[allow(dead_code)]
    pub fn snapshot(&self) -> ConversationState {
        self.lock().clone()
    }

    pub fn history(&self) -> Vec<Message> {
        self.lock().history.messages().to_vec()
    }

    pub fn is_in_flight(&self) -> bool {
        self.lock().in_flight
    }

    #[allow(dead_code)]
    pub fn pending_input(&self) -> String {
        self.lock().pending_input.clone()
    }

    pub fn set_pending_input(&self, text: impl Into<String>) {
        self.lock().pending_input = text.into();
    }

    pub fn speaker(&self) -> Option<Speaker> {
        let index = self.lock().speaker?;
        self.profile.speakers.get(index).cloned()
    }

    pub fn emotion(&self) -> Option<Emotion> {
        self.lock().emotion
    }

    pub fn select_speaker(&self, index: usize) -> Result<(), SelectionError> {
        if index >= self.profile.speakers.len() {
            return Err(SelectionError::UnknownSpeaker(index.to_string()));
        }
        self.lock().speaker = Some(index);
        Ok(())
    }

    /// Select by display name (case-insensitive) or by backend id.
    pub fn select_speaker_by_name(&self, name: &str) -> Result<(), SelectionError> {
        let wanted = name.trim();
        let index = self
            .profile
            .speakers
            .iter()
            .position(|speaker| speaker.name.eq_ignore_ascii_case(wanted))
            .or_else(|| {
                let id: u32 = wanted.parse().ok()?;
                self.profile.speakers.iter().position(|speaker| speaker.id == id)
            })
            .ok_or_else(|| SelectionError::UnknownSpeaker(wanted.to_string()))?;
        self.select_speaker(index)
    }

    pub fn select_emotion(&self, emotion: Emotion) -> Result<(), SelectionError> {
        if !self.profile.emotions_enabled {
            return Err(SelectionError::EmotionsDisabled);
        }
        self.lock().emotion = Some(emotion);
        Ok(())
    }

    /// Send `text` with the whole transcript and append the reply.
    ///
    /// Speaker and emotion are captured when this is called, so changing the
    /// selection while the request is pending affects only later submits.
    pub async fn submit(&self, text: &str) -> SubmitOutcome {
        if text.trim().is_empty() {
            return SubmitOutcome::Ignored;
        }

        let (request, speaker_label) = {
            let mut state = self.lock();
            if state.in_flight {
                tracing::debug!(session_id = %self.session_id, "submit rejected, request in flight");
                return SubmitOutcome::Busy;
            }

            let message = Message::user(text);
            let index = state.history.push(message.clone());
            state.pending_input.clear();
            state.in_flight = true;
            self.emit(ChatEvent::MessageAppended { index, message });
            self.emit(ChatEvent::RequestInFlight(true));

            let speaker = state.speaker.and_then(|i| self.profile.speakers.get(i));
            let request = ChatRequest {
                prompt: state.history.transcript(),
                speaker: speaker.map(|speaker| speaker.id),
                emotion: state.emotion,
            };
            let label = speaker
                .filter(|_| self.profile.label_replies)
                .map(|speaker| speaker.name.clone());
            (request, label)
        };

        let _in_flight = InFlightGuard { controller: self };

        tracing::info!(
            session_id = %self.session_id,
            speaker = ?request.speaker,
            emotion = ?request.emotion,
            "sending chat request"
        );

        match self.backend.send(request).await {
            Ok(reply) => {
                let audio_ref = reply.audio_ref();
                let index = self.append(Message::assistant(
                    reply.response,
                    audio_ref.clone(),
                    speaker_label,
                ));
                if let Some(audio_ref) = audio_ref {
                    self.playback.play_audio(&audio_ref).await;
                }
                SubmitOutcome::Replied { index }
            }
            Err(err) => {
                tracing::warn!(session_id = %self.session_id, error = %err, "chat request failed");
                let index = self.append(Message::assistant(
                    self.profile.failure_text.clone(),
                    None,
                    speaker_label,
                ));
                SubmitOutcome::Failed { index }
            }
        }
    }

    /// Play the clip attached to the message at `index` again. Returns false
    /// when that message has no clip.
    pub async fn replay(&self, index: usize) -> bool {
        let audio_ref = self
            .lock()
            .history
            .get(index)
            .and_then(|message| message.audio_ref.clone());

        match audio_ref {
            Some(audio_ref) => {
                self.playback.play_audio(&audio_ref).await;
                true
            }
            None => false,
        }
    }

    /// Index and clip of the newest message that has one.
    pub fn latest_audio(&self) -> Option<(usize, AudioRef)> {
        self.lock()
            .history
            .latest_audio()
            .map(|(index, audio_ref)| (index, audio_ref.clone()))
    }

    fn append(&self, message: Message) -> usize {
        let index = self.lock().history.push(message.clone());
        self.emit(ChatEvent::MessageAppended { index, message });
        index
    }

    fn emit(&self, event: ChatEvent) {
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }

    fn lock(&self) -> MutexGuard<'_, ConversationState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Clears `in_flight` when a submission ends, however it ends.
struct InFlightGuard<'a> {
    controller: &'a ConversationController,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.controller.lock().in_flight = false;
        self.controller.emit(ChatEvent::RequestInFlight(false));
    }
}
