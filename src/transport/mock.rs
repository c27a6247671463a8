use std::{
    collections::{HashMap, VecDeque},
    time::Duration,
};

use async_trait::async_trait;
use futures_util::{stream, StreamExt};
use serde_json::{json, Value};
use tokio::{sync::Mutex, sync::mpsc, time::sleep};
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

use crate::{
    adapter::{ProviderRequest, UploadRequest},
    credentials::Provider,
    transport::{Transport, TransportError, TransportResponse},
};

/// What the mock should do when a credential is used.
#[derive(Debug, Clone)]
pub enum ScriptedResponse {
    Stream {
        status: u16,
        chunks: Vec<Result<Vec<u8>, TransportError>>,
    },
    NetworkError(String),
}

impl ScriptedResponse {
    pub fn status(status: u16) -> Self {
        Self::Stream {
            status,
            chunks: Vec::new(),
        }
    }

    pub fn body(status: u16, body: impl Into<String>) -> Self {
        Self::Stream {
            status,
            chunks: vec![Ok(body.into().into_bytes())],
        }
    }

    pub fn chunks<I, S>(chunks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Stream {
            status: 200,
            chunks: chunks
                .into_iter()
                .map(|chunk| Ok(chunk.into().into_bytes()))
                .collect(),
        }
    }
}

/// A call the mock saw, in order.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub provider: Option<Provider>,
    pub model: String,
    pub url: String,
    pub credential: String,
    pub body: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Scripted,
    Echo,
}

/// In-memory transport. Scripted mode replays canned responses per credential and
/// logs every call; echo mode streams back the last user turn in the provider's
/// own wire format for offline runs.
#[derive(Debug)]
pub struct MockTransport {
    mode: Mode,
    chunk_delay: Duration,
    scripts: Mutex<HashMap<String, VecDeque<ScriptedResponse>>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self {
            mode: Mode::Scripted,
            chunk_delay: Duration::ZERO,
            scripts: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
        }
    }
}

impl MockTransport {
    pub fn scripted() -> Self {
        Self::default()
    }

    pub fn echo() -> Self {
        Self {
            mode: Mode::Echo,
            chunk_delay: Duration::from_millis(35),
            ..Self::default()
        }
    }

    /// Queues a response for the next call made with `credential`.
    pub async fn respond(&self, credential: &str, response: ScriptedResponse) {
        self.scripts
            .lock()
            .await
            .entry(credential.to_owned())
            .or_default()
            .push_back(response);
    }

    pub async fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().await.clone()
    }

    pub async fn attempted_credentials(&self) -> Vec<String> {
        self.calls
            .lock()
            .await
            .iter()
            .map(|call| call.credential.clone())
            .collect()
    }

    async fn replay(&self, call: RecordedCall) -> Result<TransportResponse, TransportError> {
        let credential = call.credential.clone();
        let provider = call.provider;
        let echo_text = last_user_text(&call.body);
        self.calls.lock().await.push(call);

        if self.mode == Mode::Echo {
            let text = format!("Mock response: {echo_text}");
            return Ok(self.stream_response(200, echo_chunks(provider, &text)));
        }

        let next = self
            .scripts
            .lock()
            .await
            .get_mut(&credential)
            .and_then(VecDeque::pop_front);
        match next {
            Some(ScriptedResponse::Stream { status, chunks }) => {
                Ok(self.stream_response(status, chunks))
            }
            Some(ScriptedResponse::NetworkError(message)) => Err(TransportError::Network(message)),
            None => Err(TransportError::Network("no scripted response".to_owned())),
        }
    }

    fn stream_response(
        &self,
        status: u16,
        chunks: Vec<Result<Vec<u8>, TransportError>>,
    ) -> TransportResponse {
        if self.chunk_delay.is_zero() {
            return TransportResponse {
                status,
                body: stream::iter(chunks).boxed(),
            };
        }

        let delay = self.chunk_delay;
        let (tx, rx) = mpsc::channel(32);
        tokio::spawn(async move {
            for chunk in chunks {
                if tx.send(chunk).await.is_err() {
                    return;
                }
                sleep(delay).await;
            }
        });
        TransportResponse {
            status,
            body: ReceiverStream::new(rx).boxed(),
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn name(&self) -> &str {
        match self.mode {
            Mode::Scripted => "mock-scripted",
            Mode::Echo => "mock-echo",
        }
    }

    async fn send(&self, request: &ProviderRequest) -> Result<TransportResponse, TransportError> {
        let credential = request
            .headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case("authorization"))
            .and_then(|(_, value)| value.strip_prefix("Bearer "))
            .map(ToOwned::to_owned)
            .or_else(|| query_key(&request.url))
            .unwrap_or_default();

        debug!(transport = self.name(), provider = %request.provider, "mock send");
        self.replay(RecordedCall {
            provider: Some(request.provider),
            model: request.model.clone(),
            url: request.redacted_url(),
            credential,
            body: request.body.clone(),
        })
        .await
    }

    async fn upload(&self, request: &UploadRequest) -> Result<TransportResponse, TransportError> {
        if self.mode == Mode::Echo {
            self.calls.lock().await.push(upload_call(request));
            let body = json!({"text": format!("mock transcript of {} bytes", request.audio.len())});
            return Ok(self.stream_response(200, vec![Ok(body.to_string().into_bytes())]));
        }
        self.replay(upload_call(request)).await
    }
}

fn upload_call(request: &UploadRequest) -> RecordedCall {
    RecordedCall {
        provider: None,
        model: request.model.clone(),
        url: request.url.clone(),
        credential: request.bearer.clone(),
        body: json!({"file_name": request.file_name, "bytes": request.audio.len()}),
    }
}

fn query_key(url: &str) -> Option<String> {
    let (_, query) = url.split_once('?')?;
    query
        .split('&')
        .find_map(|pair| pair.strip_prefix("key="))
        .map(ToOwned::to_owned)
}

fn last_user_text(body: &Value) -> String {
    let from_messages = body["messages"].as_array().and_then(|messages| {
        messages
            .iter()
            .rev()
            .find(|message| message["role"] == "user")
            .and_then(|message| message["content"].as_str())
    });
    let from_contents = || {
        body["contents"].as_array().and_then(|contents| {
            contents
                .iter()
                .rev()
                .find(|content| content["role"] == "user")
                .and_then(|content| content["parts"][0]["text"].as_str())
        })
    };
    from_messages
        .or_else(from_contents)
        .unwrap_or("hello")
        .to_owned()
}

fn echo_chunks(provider: Option<Provider>, text: &str) -> Vec<Result<Vec<u8>, TransportError>> {
    let mut chunks = text
        .split_inclusive(' ')
        .map(|word| {
            let frame = match provider {
                Some(Provider::Gemini) => {
                    json!({"candidates": [{"content": {"parts": [{"text": word}]}}]})
                }
                _ => json!({"choices": [{"delta": {"content": word}}]}),
            };
            Ok(format!("data: {frame}\n\n").into_bytes())
        })
        .collect::<Vec<_>>();
    if provider != Some(Provider::Gemini) {
        chunks.push(Ok(b"data: [DONE]\n\n".to_vec()));
    }
    chunks
}
