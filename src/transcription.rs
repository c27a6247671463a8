use std::sync::Arc;

use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::{
    adapter::build_transcription_request,
    config::ProviderEndpoints,
    credentials::{
        classify, parse_credential_list, select_transcription_credential, CredentialSource,
    },
    errors::GenerationError,
    transport::{Transport, TransportError},
};

#[derive(Debug, Error)]
pub enum TranscriptionError {
    #[error("no transcription-capable API key available")]
    NoCredential,
    #[error("audio payload is empty")]
    EmptyAudio,
    #[error(transparent)]
    Settings(#[from] GenerationError),
    #[error("transcription request failed: {0}")]
    Transport(#[from] TransportError),
    #[error("transcription API failed ({status}): {body}")]
    Status { status: u16, body: String },
    #[error("invalid transcription response: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    #[serde(default)]
    text: Option<String>,
}

/// One-shot speech-to-text against the Groq-compatible audio endpoint.
#[derive(Clone)]
pub struct Transcriber {
    credentials: Arc<dyn CredentialSource>,
    transport: Arc<dyn Transport>,
    endpoints: Arc<ProviderEndpoints>,
    default_model: String,
}

impl Transcriber {
    pub fn new(
        credentials: Arc<dyn CredentialSource>,
        transport: Arc<dyn Transport>,
        endpoints: ProviderEndpoints,
        default_model: impl Into<String>,
    ) -> Self {
        Self {
            credentials,
            transport,
            endpoints: Arc::new(endpoints),
            default_model: default_model.into(),
        }
    }

    pub async fn transcribe(
        &self,
        audio: Vec<u8>,
        model: Option<&str>,
    ) -> Result<String, TranscriptionError> {
        if audio.is_empty() {
            return Err(TranscriptionError::EmptyAudio);
        }

        let raw = self.credentials.load().await?;
        let keys = parse_credential_list(&raw);
        let key =
            select_transcription_credential(&keys).ok_or(TranscriptionError::NoCredential)?;
        let credential = classify(key);
        let model = model
            .map(str::trim)
            .filter(|model| !model.is_empty())
            .unwrap_or(self.default_model.as_str());

        let request = build_transcription_request(&credential, audio, model, &self.endpoints);
        info!(
            credential = %credential.fingerprint(),
            model,
            audio_bytes = request.audio.len(),
            "transcription requested"
        );

        let response = self.transport.upload(&request).await?;
        let status = response.status;
        if !response.is_success() {
            let body = response.text().await;
            warn!(status, "transcription rejected");
            return Err(TranscriptionError::Status {
                status,
                body: body.chars().take(400).collect(),
            });
        }

        let bytes = response.bytes().await?;
        let parsed: TranscriptionResponse = serde_json::from_slice(&bytes)
            .map_err(|error| TranscriptionError::InvalidResponse(error.to_string()))?;
        let text = parsed.text.unwrap_or_default();
        info!(chars = text.chars().count(), "transcription completed");
        Ok(text)
    }
}
