//! `AudioOutput` backed by rodio.
//!
//! The platform stream handle is not `Send`, so the stream and its sink live
//! on a dedicated thread and are driven over a command channel. Clips are
//! downloaded on the async side and handed over as bytes.

use crate::audio::device::{AudioOutput, DeviceError, PlaybackError};
use futures::StreamExt;
use futures::future::BoxFuture;
use std::io::Cursor;
use std::sync::{Mutex, mpsc as std_mpsc};
use std::thread;
use std::time::Duration;
use tokio::sync::{broadcast, oneshot};

/// Downloads clips from the audio endpoint.
#[derive(Clone)]
pub struct ClipFetcher {
    client: reqwest::Client,
}

impl ClipFetcher {
    pub fn new() -> Result<Self, PlaybackError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| PlaybackError::Output(e.to_string()))?;
        Ok(Self { client })
    }

    pub async fn fetch(&self, url: &str) -> Result<Vec<u8>, PlaybackError> {
        let fetch_error = |reason: String| PlaybackError::Fetch {
            url: url.to_string(),
            reason,
        };

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| fetch_error(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(fetch_error(format!("HTTP {}", status.as_u16())));
        }

        let mut body = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| fetch_error(e.to_string()))?;
            body.extend_from_slice(&chunk);
        }

        if body.is_empty() {
            return Err(fetch_error("empty body".to_string()));
        }
        Ok(body)
    }
}

/// Check that `bytes` is something rodio can decode.
pub fn probe(url: &str, bytes: Vec<u8>) -> Result<(), PlaybackError> {
    rodio::Decoder::new(Cursor::new(bytes))
        .map(|_| ())
        .map_err(|e| PlaybackError::Decode {
            url: url.to_string(),
            reason: e.to_string(),
        })
}

enum Command {
    Play {
        url: String,
        bytes: Vec<u8>,
        reply: oneshot::Sender<Result<(), PlaybackError>>,
    },
}

struct LoadedClip {
    url: String,
    bytes: Vec<u8>,
}

pub struct RodioOutput {
    fetcher: ClipFetcher,
    source: Mutex<Option<String>>,
    loaded: Mutex<Option<LoadedClip>>,
    commands: std_mpsc::Sender<Command>,
    errors: broadcast::Sender<DeviceError>,
}

impl RodioOutput {
    /// Open the default output device. Fails when the machine has none.
    pub fn open() -> Result<Self, PlaybackError> {
        let fetcher = ClipFetcher::new()?;
        let (errors, _) = broadcast::channel(16);
        let (commands, command_rx) = std_mpsc::channel();
        let (ready_tx, ready_rx) = std_mpsc::channel();

        let thread_errors = errors.clone();
        thread::Builder::new()
            .name("voxchat-audio".to_string())
            .spawn(move || audio_thread(command_rx, ready_tx, thread_errors))
            .map_err(|e| PlaybackError::Output(e.to_string()))?;

        ready_rx
            .recv()
            .map_err(|_| PlaybackError::Output("audio thread exited".to_string()))??;

        Ok(Self {
            fetcher,
            source: Mutex::new(None),
            loaded: Mutex::new(None),
            commands,
            errors,
        })
    }

    fn current_source(&self) -> Option<String> {
        self.source.lock().ok().and_then(|source| source.clone())
    }

    fn report(&self, url: &str, error: &PlaybackError) {
        // No receivers just means nobody is listening yet.
        let _ = self.errors.send(DeviceError {
            url: Some(url.to_string()),
            error: error.clone(),
        });
    }

    async fn load_current(&self) -> Result<(), PlaybackError> {
        let url = self.current_source().ok_or(PlaybackError::NoSource)?;

        let bytes = match self.fetcher.fetch(&url).await {
            Ok(bytes) => bytes,
            Err(err) => {
                self.report(&url, &err);
                return Err(err);
            }
        };

        if let Err(err) = probe(&url, bytes.clone()) {
            self.report(&url, &err);
            return Err(err);
        }

        if self.current_source().as_deref() != Some(url.as_str()) {
            return Err(PlaybackError::Superseded { url });
        }

        tracing::debug!(%url, bytes = bytes.len(), "clip loaded");
        if let Ok(mut loaded) = self.loaded.lock() {
            *loaded = Some(LoadedClip { url, bytes });
        }
        Ok(())
    }

    async fn play_current(&self) -> Result<(), PlaybackError> {
        let url = self.current_source().ok_or(PlaybackError::NoSource)?;
        let clip = self
            .loaded
            .lock()
            .ok()
            .and_then(|mut loaded| loaded.take_if(|clip| clip.url == url))
            .ok_or_else(|| PlaybackError::Superseded { url: url.clone() })?;

        let (reply, reply_rx) = oneshot::channel();
        self.commands
            .send(Command::Play {
                url: clip.url,
                bytes: clip.bytes,
                reply,
            })
            .map_err(|_| PlaybackError::Output("audio thread stopped".to_string()))?;

        reply_rx
            .await
            .map_err(|_| PlaybackError::Output("audio thread stopped".to_string()))?
    }
}

impl AudioOutput for RodioOutput {
    fn set_source(&self, url: &str) {
        if let Ok(mut source) = self.source.lock() {
            *source = Some(url.to_string());
        }
        if let Ok(mut loaded) = self.loaded.lock() {
            if loaded.as_ref().is_some_and(|clip| clip.url != url) {
                *loaded = None;
            }
        }
    }

    fn load(&self) -> BoxFuture<'_, Result<(), PlaybackError>> {
        Box::pin(self.load_current())
    }

    fn play(&self) -> BoxFuture<'_, Result<(), PlaybackError>> {
        Box::pin(self.play_current())
    }

    fn errors(&self) -> broadcast::Receiver<DeviceError> {
        self.errors.subscribe()
    }
}

fn audio_thread(
    commands: std_mpsc::Receiver<Command>,
    ready: std_mpsc::Sender<Result<(), PlaybackError>>,
    errors: broadcast::Sender<DeviceError>,
) {
    let mut stream = match rodio::OutputStreamBuilder::open_default_stream() {
        Ok(stream) => stream,
        Err(e) => {
            let _ = ready.send(Err(PlaybackError::Output(e.to_string())));
            return;
        }
    };
    stream.log_on_drop(false);
    let sink = rodio::Sink::connect_new(stream.mixer());
    let _ = ready.send(Ok(()));

    // Exits once the owning RodioOutput is dropped.
    while let Ok(command) = commands.recv() {
        match command {
            Command::Play { url, bytes, reply } => {
                let result = match rodio::Decoder::new(Cursor::new(bytes)) {
                    Ok(source) => {
                        sink.clear();
                        sink.append(source);
                        sink.play();
                        tracing::debug!(%url, "playback started");
                        Ok(())
                    }
                    Err(e) => {
                        let err = PlaybackError::Decode {
                            url: url.clone(),
                            reason: e.to_string(),
                        };
                        let _ = errors.send(DeviceError {
                            url: Some(url),
                            error: err.clone(),
                        });
                        Err(err)
                    }
                };
                let _ = reply.send(result);
            }
        }
    }

    sink.stop();
}
