use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use tracing::debug;

use crate::{
    adapter::{ProviderRequest, UploadRequest},
    transport::{Transport, TransportError, TransportResponse},
};

#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self, String> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| format!("failed to build HTTP client: {error}"))?;
        Ok(Self { client })
    }

    fn wrap_response(response: reqwest::Response) -> TransportResponse {
        let status = response.status().as_u16();
        let body = response
            .bytes_stream()
            .map(|next| next.map(|bytes| bytes.to_vec()).map_err(map_reqwest_error))
            .boxed();
        TransportResponse { status, body }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    fn name(&self) -> &str {
        "http"
    }

    async fn send(&self, request: &ProviderRequest) -> Result<TransportResponse, TransportError> {
        let mut builder = self.client.post(&request.url).json(&request.body);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if request.event_stream {
            builder = builder.header("accept", "text/event-stream");
        }

        let response = builder.send().await.map_err(map_reqwest_error)?;
        debug!(
            provider = %request.provider,
            url = %request.redacted_url(),
            status = response.status().as_u16(),
            "provider responded"
        );
        Ok(Self::wrap_response(response))
    }

    async fn upload(&self, request: &UploadRequest) -> Result<TransportResponse, TransportError> {
        let part = reqwest::multipart::Part::bytes(request.audio.clone())
            .file_name(request.file_name.clone())
            .mime_str(&request.mime_type)
            .map_err(|error| TransportError::InvalidRequest(error.to_string()))?;
        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("model", request.model.clone());

        let response = self
            .client
            .post(&request.url)
            .bearer_auth(&request.bearer)
            .multipart(form)
            .send()
            .await
            .map_err(map_reqwest_error)?;
        debug!(
            url = %request.url,
            status = response.status().as_u16(),
            "transcription endpoint responded"
        );
        Ok(Self::wrap_response(response))
    }
}

// reqwest errors can carry the request URL, which holds the Gemini key.
fn map_reqwest_error(error: reqwest::Error) -> TransportError {
    let timed_out = error.is_timeout();
    let message = error.without_url().to_string();
    if timed_out {
        TransportError::Timeout(message)
    } else {
        TransportError::Network(message)
    }
}
