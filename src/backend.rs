use crate::events::{AudioRef, Emotion};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Failure of a single chat round trip. Callers only log these.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("Failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
    #[error("Chat request failed: {0}")]
    Transport(#[source] reqwest::Error),
    #[error("Chat endpoint returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("Malformed chat response: {0}")]
    Decode(String),
}

/// Body of `POST {base}/gpt`.
///
/// `speaker` and `emotion` are omitted entirely when the deployment does not
/// use them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speaker: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub emotion: Option<Emotion>,
}

/// Response of the chat endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatReply {
    pub response: String,
    #[serde(default)]
    pub audio_path: Option<String>,
}

impl ChatReply {
    /// The clip reference, if the backend produced a non-empty one.
    pub fn audio_ref(&self) -> Option<AudioRef> {
        self.audio_path
            .as_deref()
            .map(AudioRef::new)
            .filter(|audio_ref| !audio_ref.is_empty())
    }
}

/// The remote chat endpoint.
pub trait ChatBackend: Send + Sync {
    fn send(&self, request: ChatRequest) -> BoxFuture<'_, Result<ChatReply, ChatError>>;
}

/// `ChatBackend` over HTTP.
#[derive(Clone)]
pub struct HttpChatBackend {
    base_url: String,
    client: reqwest::Client,
}

impl HttpChatBackend {
    /// `timeout` of `None` leaves the request unbounded; only connecting is
    /// bounded.
    pub fn new(base_url: impl Into<String>, timeout: Option<Duration>) -> Result<Self, ChatError> {
        let mut builder = reqwest::Client::builder().connect_timeout(Duration::from_secs(10));
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().map_err(ChatError::Client)?;

        Ok(Self {
            base_url: base_url.into(),
            client,
        })
    }

    pub fn endpoint_url(&self) -> String {
        format!("{}/gpt", self.base_url)
    }

    async fn post(&self, request: ChatRequest) -> Result<ChatReply, ChatError> {
        let url = self.endpoint_url();
        tracing::debug!(%url, prompt_len = request.prompt.len(), "posting chat request");

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(ChatError::Transport)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ChatError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body = response.text().await.map_err(ChatError::Transport)?;
        serde_json::from_str(&body).map_err(|e| ChatError::Decode(e.to_string()))
    }
}

impl ChatBackend for HttpChatBackend {
    fn send(&self, request: ChatRequest) -> BoxFuture<'_, Result<ChatReply, ChatError>> {
        Box::pin(self.post(request))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::serve_once;

    #[test]
    fn request_omits_unused_fields() {
        let request = ChatRequest {
            prompt: "user: hi".into(),
            speaker: None,
            emotion: None,
        };
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            serde_json::json!({ "prompt": "user: hi" })
        );

        let request = ChatRequest {
            prompt: "user: hi".into(),
            speaker: Some(2),
            emotion: Some(Emotion::Happy),
        };
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            serde_json::json!({ "prompt": "user: hi", "speaker": 2, "emotion": "Happy" })
        );
    }

    #[test]
    fn reply_audio_path_is_optional() {
        let reply: ChatReply = serde_json::from_str(r#"{"response":"hi"}"#).unwrap();
        assert_eq!(reply.audio_ref(), None);

        let reply: ChatReply =
            serde_json::from_str(r#"{"response":"hi","audio_path":null}"#).unwrap();
        assert_eq!(reply.audio_ref(), None);

        let reply: ChatReply =
            serde_json::from_str(r#"{"response":"hi","audio_path":""}"#).unwrap();
        assert_eq!(reply.audio_ref(), None);

        let reply: ChatReply =
            serde_json::from_str(r#"{"response":"hi","audio_path":"r1.wav"}"#).unwrap();
        assert_eq!(reply.audio_ref(), Some(AudioRef::new("r1.wav")));
    }

    #[test]
    fn endpoint_is_joined_to_base() {
        let backend = HttpChatBackend::new("https://host", None).unwrap();
        assert_eq!(backend.endpoint_url(), "https://host/gpt");
    }

    #[tokio::test]
    async fn posts_json_and_decodes_reply() {
        let (base, server) = serve_once(
            "200 OK",
            "application/json",
            br#"{"response":"hi","audio_path":"r1.wav"}"#.to_vec(),
        )
        .await;
        let backend = HttpChatBackend::new(base, None).unwrap();

        let reply = backend
            .send(ChatRequest {
                prompt: "user: a\nassistant: b\nuser: c".into(),
                speaker: Some(0),
                emotion: Some(Emotion::Neutral),
            })
            .await
            .unwrap();
        assert_eq!(reply.response, "hi");
        assert_eq!(reply.audio_ref(), Some(AudioRef::new("r1.wav")));

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /gpt HTTP/1.1"));
        let body = &request[request.find("\r\n\r\n").unwrap() + 4..];
        let body: serde_json::Value = serde_json::from_str(body).unwrap();
        assert_eq!(
            body,
            serde_json::json!({
                "prompt": "user: a\nassistant: b\nuser: c",
                "speaker": 0,
                "emotion": "Neutral"
            })
        );
    }

    #[tokio::test]
    async fn non_success_status_is_an_error() {
        let (base, _server) = serve_once("500 Internal Server Error", "text/plain", b"boom".to_vec()).await;
        let backend = HttpChatBackend::new(base, None).unwrap();

        let err = backend
            .send(ChatRequest {
                prompt: "user: hi".into(),
                speaker: None,
                emotion: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::Status { status: 500, ref body } if body == "boom"));
    }

    #[tokio::test]
    async fn malformed_body_is_a_decode_error() {
        let (base, _server) = serve_once("200 OK", "application/json", b"{\"reply\":1}".to_vec()).await;
        let backend = HttpChatBackend::new(base, None).unwrap();

        let err = backend
            .send(ChatRequest {
                prompt: "user: hi".into(),
                speaker: None,
                emotion: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::Decode(_)));
    }

    #[tokio::test]
    async fn unreachable_backend_is_a_transport_error() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let backend = HttpChatBackend::new(
            format!("http://127.0.0.1:{}", port),
            Some(Duration::from_secs(2)),
        )
        .unwrap();
        let err = backend
            .send(ChatRequest {
                prompt: "user: hi".into(),
                speaker: None,
                emotion: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::Transport(_)));
    }
}
