use crate::audio::device::{AudioOutput, PlaybackError};
use crate::events::{AudioRef, ChatEvent, EventSender};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

/// What the single output device is currently pointed at.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlaybackState {
    pub current: Option<AudioRef>,
    pub loading: bool,
}

/// `{base_url}/audio/{audio_ref}`
pub fn audio_url(base_url: &str, audio_ref: &AudioRef) -> String {
    format!("{}/audio/{}", base_url, audio_ref.as_str())
}

/// Exclusive owner of the audio output device.
///
/// Calls to [`PlaybackController::play_audio`] are not serialized: a newer
/// call overwrites the target of an older one that is still loading, and the
/// device decides which clip ends up audible.
pub struct PlaybackController {
    base_url: String,
    output: Arc<dyn AudioOutput>,
    state: Arc<Mutex<PlaybackState>>,
    events: Option<EventSender>,
    listener: JoinHandle<()>,
}

impl PlaybackController {
    /// Must be called inside a tokio runtime: the device error listener is
    /// spawned here and lives until the controller is dropped.
    pub fn new(
        base_url: impl Into<String>,
        output: Arc<dyn AudioOutput>,
        events: Option<EventSender>,
    ) -> Self {
        let state = Arc::new(Mutex::new(PlaybackState::default()));
        let listener = spawn_error_listener(&output, Arc::clone(&state), events.clone());

        Self {
            base_url: base_url.into(),
            output,
            state,
            events,
            listener,
        }
    }

    #[allow(dead_code)]
    pub fn state(&self) -> PlaybackState {
        lock(&self.state).clone()
    }

    #[allow(dead_code)]
    pub fn is_loading(&self) -> bool {
        lock(&self.state).loading
    }

    /// True while `audio_ref` is the clip being loaded. A front end disables
    /// that clip's play control in this state.
    pub fn is_loading_ref(&self, audio_ref: &AudioRef) -> bool {
        let state = lock(&self.state);
        state.loading && state.current.as_ref() == Some(audio_ref)
    }

    /// Point the output at `audio_ref`, wait for it to load, then wait for
    /// playback to start. Failures are logged and swallowed.
    pub async fn play_audio(&self, audio_ref: &AudioRef) {
        if audio_ref.is_empty() {
            return;
        }

        let _loading = LoadingGuard::start(&self.state, audio_ref);
        self.emit(ChatEvent::PlaybackLoading {
            audio_ref: audio_ref.clone(),
        });

        let url = audio_url(&self.base_url, audio_ref);
        match self.load_and_play(&url).await {
            Ok(()) => {
                tracing::info!(%url, "playing clip");
                self.emit(ChatEvent::PlaybackStarted {
                    audio_ref: audio_ref.clone(),
                });
            }
            Err(err) => {
                tracing::warn!(%url, error = %err, "play audio failed");
                self.emit(ChatEvent::PlaybackFailed {
                    audio_ref: Some(audio_ref.clone()),
                    reason: err.to_string(),
                });
            }
        }
    }

    async fn load_and_play(&self, url: &str) -> Result<(), PlaybackError> {
        self.output.set_source(url);
        self.output.load().await?;
        self.output.play().await
    }

    fn emit(&self, event: ChatEvent) {
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }
}

impl Drop for PlaybackController {
    fn drop(&mut self) {
        self.listener.abort();
    }
}

/// Holds `loading` for one `play_audio` call and clears it exactly once,
/// including when the call is cancelled mid-await.
struct LoadingGuard<'a> {
    state: &'a Mutex<PlaybackState>,
}

impl<'a> LoadingGuard<'a> {
    fn start(state: &'a Mutex<PlaybackState>, audio_ref: &AudioRef) -> Self {
        let mut guard = lock(state);
        guard.loading = true;
        guard.current = Some(audio_ref.clone());
        Self { state }
    }
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        lock(self.state).loading = false;
    }
}

fn spawn_error_listener(
    output: &Arc<dyn AudioOutput>,
    state: Arc<Mutex<PlaybackState>>,
    events: Option<EventSender>,
) -> JoinHandle<()> {
    let mut errors = output.errors();

    tokio::spawn(async move {
        loop {
            let reason = match errors.recv().await {
                Ok(device_error) => {
                    tracing::warn!(
                        url = device_error.url.as_deref().unwrap_or("-"),
                        error = %device_error.error,
                        "audio device error"
                    );
                    device_error.error.to_string()
                }
                Err(RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "audio device errors dropped");
                    format!("{} device errors dropped", missed)
                }
                Err(RecvError::Closed) => break,
            };

            let current = {
                let mut state = lock(&state);
                state.loading = false;
                state.current.clone()
            };
            if let Some(events) = &events {
                let _ = events.send(ChatEvent::DeviceError {
                    audio_ref: current,
                    reason,
                });
            }
        }
    })
}

fn lock(state: &Mutex<PlaybackState>) -> MutexGuard<'_, PlaybackState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
