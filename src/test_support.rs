//! Fakes and fixtures shared by the unit tests.

use crate::audio::device::{AudioOutput, DeviceError, PlaybackError};
use crate::backend::{ChatBackend, ChatError, ChatReply, ChatRequest};
use crate::events::ChatEvent;
use futures::future::BoxFuture;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::{Semaphore, broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;

pub fn drain_events(rx: &mut mpsc::UnboundedReceiver<ChatEvent>) -> Vec<ChatEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Half a millisecond of silence as a 16-bit mono WAV file.
pub fn silent_wav() -> Vec<u8> {
    let samples: u32 = 8;
    let sample_rate: u32 = 16_000;
    let data_len = samples * 2;

    let mut wav = Vec::new();
    wav.extend_from_slice(b"RIFF");
    wav.extend_from_slice(&(36 + data_len).to_le_bytes());
    wav.extend_from_slice(b"WAVEfmt ");
    wav.extend_from_slice(&16u32.to_le_bytes());
    wav.extend_from_slice(&1u16.to_le_bytes());
    wav.extend_from_slice(&1u16.to_le_bytes());
    wav.extend_from_slice(&sample_rate.to_le_bytes());
    wav.extend_from_slice(&(sample_rate * 2).to_le_bytes());
    wav.extend_from_slice(&2u16.to_le_bytes());
    wav.extend_from_slice(&16u16.to_le_bytes());
    wav.extend_from_slice(b"data");
    wav.extend_from_slice(&data_len.to_le_bytes());
    wav.extend(std::iter::repeat_n(0u8, data_len as usize));
    wav
}

/// Answer exactly one HTTP request with a canned response. The join handle
/// yields the raw request text.
pub async fn serve_once(
    status: &str,
    content_type: &str,
    body: Vec<u8>,
) -> (String, JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let head = response_head(status, content_type, body.len());

    let handle = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let request = read_request(&mut socket).await;
        socket.write_all(head.as_bytes()).await.unwrap();
        socket.write_all(&body).await.unwrap();
        let _ = socket.shutdown().await;
        request
    });

    (format!("http://{}", addr), handle)
}

/// Like [`serve_once`], but the response is held back until the returned
/// sender fires. The receiver yields the request once it has been read.
pub async fn serve_held(
    status: &str,
    content_type: &str,
    body: Vec<u8>,
) -> (String, oneshot::Receiver<String>, oneshot::Sender<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let head = response_head(status, content_type, body.len());
    let (seen_tx, seen_rx) = oneshot::channel();
    let (release_tx, release_rx) = oneshot::channel::<()>();

    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let request = read_request(&mut socket).await;
        let _ = seen_tx.send(request);
        let _ = release_rx.await;
        let _ = socket.write_all(head.as_bytes()).await;
        let _ = socket.write_all(&body).await;
        let _ = socket.shutdown().await;
    });

    (format!("http://{}", addr), seen_rx, release_tx)
}

fn response_head(status: &str, content_type: &str, len: usize) -> String {
    format!(
        "HTTP/1.1 {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        status, content_type, len
    )
}

async fn read_request(socket: &mut tokio::net::TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];

    loop {
        let n = socket.read(&mut chunk).await.unwrap();
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);

        if let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            let head = String::from_utf8_lossy(&buf[..end]).to_lowercase();
            let body_len = head
                .lines()
                .find_map(|line| line.strip_prefix("content-length:"))
                .and_then(|value| value.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if buf.len() >= end + 4 + body_len {
                break;
            }
        }
    }

    String::from_utf8_lossy(&buf).into_owned()
}

/// Holds back fake operations until the test releases them.
#[derive(Clone)]
pub struct Gate(Arc<Semaphore>);

impl Gate {
    fn new() -> Self {
        Self(Arc::new(Semaphore::new(0)))
    }

    pub fn release(&self, count: usize) {
        self.0.add_permits(count);
    }

    async fn pass(&self) {
        if let Ok(permit) = self.0.acquire().await {
            permit.forget();
        }
    }
}

/// Scriptable `AudioOutput` that records what it was asked to do.
pub struct FakeOutput {
    sources: Mutex<Vec<String>>,
    plays: AtomicUsize,
    load_error: Mutex<Option<PlaybackError>>,
    play_error: Mutex<Option<PlaybackError>>,
    gate: Mutex<Option<Gate>>,
    load_started_tx: mpsc::UnboundedSender<()>,
    load_started_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<()>>,
    errors: broadcast::Sender<DeviceError>,
}

impl FakeOutput {
    pub fn new() -> Self {
        let (errors, _) = broadcast::channel(16);
        let (load_started_tx, load_started_rx) = mpsc::unbounded_channel();
        Self {
            sources: Mutex::new(Vec::new()),
            plays: AtomicUsize::new(0),
            load_error: Mutex::new(None),
            play_error: Mutex::new(None),
            gate: Mutex::new(None),
            load_started_tx,
            load_started_rx: tokio::sync::Mutex::new(load_started_rx),
            errors,
        }
    }

    pub fn sources(&self) -> Vec<String> {
        self.sources.lock().unwrap().clone()
    }

    pub fn plays(&self) -> usize {
        self.plays.load(Ordering::SeqCst)
    }

    pub fn fail_load(&self, error: PlaybackError) {
        *self.load_error.lock().unwrap() = Some(error);
    }

    pub fn fail_play(&self, error: PlaybackError) {
        *self.play_error.lock().unwrap() = Some(error);
    }

    /// Make every subsequent `load` wait for a permit from the returned gate.
    pub fn hold_loads(&self) -> Gate {
        let gate = Gate::new();
        *self.gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    /// Wait until one more `load` call has started.
    pub async fn wait_for_load(&self) {
        self.load_started_rx.lock().await.recv().await;
    }

    pub fn emit_error(&self, error: DeviceError) {
        self.errors.send(error).unwrap();
    }

    pub fn error_receivers(&self) -> usize {
        self.errors.receiver_count()
    }
}

impl AudioOutput for FakeOutput {
    fn set_source(&self, url: &str) {
        self.sources.lock().unwrap().push(url.to_string());
    }

    fn load(&self) -> BoxFuture<'_, Result<(), PlaybackError>> {
        let gate = self.gate.lock().unwrap().clone();
        Box::pin(async move {
            let _ = self.load_started_tx.send(());
            if let Some(gate) = gate {
                gate.pass().await;
            }
            match self.load_error.lock().unwrap().clone() {
                Some(error) => Err(error),
                None => Ok(()),
            }
        })
    }

    fn play(&self) -> BoxFuture<'_, Result<(), PlaybackError>> {
        Box::pin(async move {
            match self.play_error.lock().unwrap().clone() {
                Some(error) => Err(error),
                None => {
                    self.plays.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            }
        })
    }

    fn errors(&self) -> broadcast::Receiver<DeviceError> {
        self.errors.subscribe()
    }
}

type Responder = oneshot::Sender<Result<ChatReply, ChatError>>;

/// `ChatBackend` whose replies are supplied by the test, one request at a
/// time, through [`PendingRequests::next`].
pub struct FakeBackend {
    requests: mpsc::UnboundedSender<(ChatRequest, Responder)>,
}

pub struct PendingRequests {
    rx: mpsc::UnboundedReceiver<(ChatRequest, Responder)>,
}

impl FakeBackend {
    pub fn new() -> (Self, PendingRequests) {
        let (requests, rx) = mpsc::unbounded_channel();
        (Self { requests }, PendingRequests { rx })
    }
}

impl ChatBackend for FakeBackend {
    fn send(&self, request: ChatRequest) -> BoxFuture<'_, Result<ChatReply, ChatError>> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let queued = self.requests.send((request, reply_tx));
        Box::pin(async move {
            if queued.is_err() {
                return Err(ChatError::Decode("test dropped the backend".into()));
            }
            reply_rx
                .await
                .unwrap_or_else(|_| Err(ChatError::Decode("test dropped the reply".into())))
        })
    }
}

impl PendingRequests {
    /// The next request the controller sent, with a handle to answer it.
    pub async fn next(&mut self) -> (ChatRequest, Responder) {
        self.rx.recv().await.expect("controller sent a request")
    }
}

/// Answers every request immediately with a fixed reply.
pub struct StaticBackend {
    pub reply: Result<ChatReply, u16>,
    pub seen: Mutex<Vec<ChatRequest>>,
}

impl StaticBackend {
    pub fn ok(response: &str, audio_path: Option<&str>) -> Self {
        Self {
            reply: Ok(ChatReply {
                response: response.to_string(),
                audio_path: audio_path.map(str::to_string),
            }),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(status: u16) -> Self {
        Self {
            reply: Err(status),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn seen(&self) -> Vec<ChatRequest> {
        self.seen.lock().unwrap().clone()
    }
}

impl ChatBackend for StaticBackend {
    fn send(&self, request: ChatRequest) -> BoxFuture<'_, Result<ChatReply, ChatError>> {
        self.seen.lock().unwrap().push(request);
        let reply = match &self.reply {
            Ok(reply) => Ok(reply.clone()),
            Err(status) => Err(ChatError::Status {
                status: *status,
                body: "upstream exploded".into(),
            }),
        };
        Box::pin(async move { reply })
    }
}
