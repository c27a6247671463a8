use axum::{
    http::{HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::{credentials::Provider, transcription::TranscriptionError};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GenerationError {
    #[error("no API keys configured")]
    NoCredentials,
    #[error("settings unavailable: {0}")]
    Settings(String),
    #[error("rate limit exceeded, retry in {retry_after_ms} ms")]
    RateLimited { retry_after_ms: u64 },
    #[error("{provider} rejected the API key ({status})")]
    AuthenticationRejected { provider: Provider, status: u16 },
    #[error("{provider} rate limited the request (429)")]
    ProviderRateLimited { provider: Provider },
    #[error("{provider} failed: {status} {body}")]
    ProviderStatus {
        provider: Provider,
        status: u16,
        body: String,
    },
    #[error("{provider} transport error: {message}")]
    Transport { provider: Provider, message: String },
    #[error("all providers failed")]
    AllProvidersFailed,
}

impl GenerationError {
    /// Maps an upstream HTTP status to the error recorded for that attempt.
    pub fn from_status(provider: Provider, status: u16, body: &str) -> Self {
        match status {
            401 | 403 => Self::AuthenticationRejected { provider, status },
            429 => Self::ProviderRateLimited { provider },
            _ => Self::ProviderStatus {
                provider,
                status,
                body: body.chars().take(400).collect(),
            },
        }
    }

    /// Statuses that mean "this key is unusable right now, try the next one".
    pub fn is_retryable_status(status: u16) -> bool {
        matches!(status, 401 | 403 | 429 | 503)
    }

    /// Text shown to the user, phrased around what they can do about it.
    pub fn user_message(&self) -> String {
        match self {
            Self::NoCredentials => {
                "No API keys configured. Add a key in settings.".to_owned()
            }
            Self::Settings(detail) => format!("Settings unavailable ({detail})."),
            Self::RateLimited { .. } => {
                "Rate limit exceeded. Wait a moment and try again.".to_owned()
            }
            Self::AuthenticationRejected { provider, status } => format!(
                "Authentication rejected by {provider} ({status}). Check or replace the API key."
            ),
            Self::ProviderRateLimited { provider } => format!(
                "Rate-limited by {provider}, all keys exhausted. Wait and retry, or add another key."
            ),
            Self::ProviderStatus { provider, status, .. } => {
                format!("Unknown provider failure: {provider} returned {status}.")
            }
            Self::Transport { provider, message } => {
                format!("Could not reach {provider}: {message}.")
            }
            Self::AllProvidersFailed => "Unknown provider failure: all providers failed.".to_owned(),
        }
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{message}")]
    RateLimited { message: String, retry_after_ms: u64 },
    #[error("{0}")]
    Configuration(String),
    #[error("{0}")]
    Upstream(String),
}

impl From<GenerationError> for AppError {
    fn from(value: GenerationError) -> Self {
        match value {
            GenerationError::RateLimited { retry_after_ms } => AppError::RateLimited {
                message: value.user_message(),
                retry_after_ms,
            },
            GenerationError::NoCredentials | GenerationError::Settings(_) => {
                AppError::Configuration(value.user_message())
            }
            other => AppError::Upstream(other.user_message()),
        }
    }
}

impl From<TranscriptionError> for AppError {
    fn from(value: TranscriptionError) -> Self {
        match value {
            TranscriptionError::EmptyAudio => AppError::BadRequest(value.to_string()),
            TranscriptionError::NoCredential => AppError::Configuration(value.to_string()),
            TranscriptionError::Settings(error) => AppError::from(error),
            other => AppError::Upstream(other.to_string()),
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorEnvelope {
    success: bool,
    error: ErrorBody,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    message: String,
    #[serde(rename = "type")]
    error_type: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::BadRequest(message) => {
                make_error_response(StatusCode::BAD_REQUEST, "invalid_request_error", message)
            }
            AppError::RateLimited {
                message,
                retry_after_ms,
            } => {
                let mut response =
                    make_error_response(StatusCode::TOO_MANY_REQUESTS, "rate_limit_error", message);
                let retry_after_secs = retry_after_ms.div_ceil(1_000).max(1);
                apply_header(
                    response.headers_mut(),
                    "retry-after",
                    &retry_after_secs.to_string(),
                );
                response
            }
            AppError::Configuration(message) => make_error_response(
                StatusCode::UNPROCESSABLE_ENTITY,
                "configuration_error",
                message,
            ),
            AppError::Upstream(message) => {
                make_error_response(StatusCode::BAD_GATEWAY, "upstream_error", message)
            }
        }
    }
}

fn make_error_response(status: StatusCode, error_type: &str, message: String) -> Response {
    let payload = ErrorEnvelope {
        success: false,
        error: ErrorBody {
            message,
            error_type: error_type.to_owned(),
        },
    };

    (status, Json(payload)).into_response()
}

pub fn apply_header(headers: &mut axum::http::HeaderMap, name: &str, value: &str) {
    let Ok(header_name) = HeaderName::from_bytes(name.as_bytes()) else {
        return;
    };
    let Ok(header_value) = HeaderValue::from_str(value) else {
        return;
    };
    headers.insert(header_name, header_value);
}
