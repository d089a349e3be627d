use futures::future::BoxFuture;
use std::sync::Mutex;
use thiserror::Error;
use tokio::sync::broadcast;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlaybackError {
    #[error("No audio source assigned")]
    NoSource,
    #[error("Failed to fetch {url}: {reason}")]
    Fetch { url: String, reason: String },
    #[error("Failed to decode {url}: {reason}")]
    Decode { url: String, reason: String },
    #[error("Source changed to another clip before {url} was ready")]
    Superseded { url: String },
    #[error("Audio output unavailable: {0}")]
    Output(String),
}

/// Asynchronous failure reported by the output device outside of any
/// `load`/`play` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceError {
    pub url: Option<String>,
    pub error: PlaybackError,
}

/// The single playable audio device.
///
/// Mirrors a media element: a source URL is assigned, then loaded, then
/// played. Assigning a new source detaches whatever was attached before.
pub trait AudioOutput: Send + Sync {
    fn set_source(&self, url: &str);

    /// Resolves once the assigned source is ready to play.
    fn load(&self) -> BoxFuture<'_, Result<(), PlaybackError>>;

    /// Resolves once playback has started. The device finishes the clip on
    /// its own.
    fn play(&self) -> BoxFuture<'_, Result<(), PlaybackError>>;

    /// A fresh subscription to the device's error notifications.
    fn errors(&self) -> broadcast::Receiver<DeviceError>;
}

/// Output that accepts every source and plays nothing. Used for `--mute`,
/// one-shot sends, and machines without an output device.
pub struct SilentOutput {
    source: Mutex<Option<String>>,
    errors: broadcast::Sender<DeviceError>,
}

impl SilentOutput {
    pub fn new() -> Self {
        let (errors, _) = broadcast::channel(16);
        Self {
            source: Mutex::new(None),
            errors,
        }
    }

    fn has_source(&self) -> bool {
        self.source
            .lock()
            .map(|source| source.is_some())
            .unwrap_or(false)
    }
}

impl Default for SilentOutput {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioOutput for SilentOutput {
    fn set_source(&self, url: &str) {
        tracing::debug!(%url, "muted output ignoring source");
        if let Ok(mut source) = self.source.lock() {
            *source = Some(url.to_string());
        }
    }

    fn load(&self) -> BoxFuture<'_, Result<(), PlaybackError>> {
        let ready = self.has_source();
        Box::pin(async move { if ready { Ok(()) } else { Err(PlaybackError::NoSource) } })
    }

    fn play(&self) -> BoxFuture<'_, Result<(), PlaybackError>> {
        self.load()
    }

    fn errors(&self) -> broadcast::Receiver<DeviceError> {
        self.errors.subscribe()
    }
}
