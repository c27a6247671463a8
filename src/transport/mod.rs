pub mod http;
pub mod mock;

use async_trait::async_trait;
use futures_util::{stream::BoxStream, StreamExt};
use thiserror::Error;

use crate::adapter::{ProviderRequest, UploadRequest};

pub type ByteStream = BoxStream<'static, Result<Vec<u8>, TransportError>>;

/// The network seam. Everything above it is pure or scripted in tests.
#[async_trait]
pub trait Transport: Send + Sync {
    fn name(&self) -> &str;
    async fn send(&self, request: &ProviderRequest) -> Result<TransportResponse, TransportError>;
    async fn upload(&self, request: &UploadRequest) -> Result<TransportResponse, TransportError>;
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("network error: {0}")]
    Network(String),
    #[error("timed out: {0}")]
    Timeout(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

pub struct TransportResponse {
    pub status: u16,
    pub body: ByteStream,
}

impl TransportResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Drains the body. Used for error excerpts and one-shot JSON responses.
    pub async fn bytes(mut self) -> Result<Vec<u8>, TransportError> {
        let mut collected = Vec::new();
        while let Some(chunk) = self.body.next().await {
            collected.extend_from_slice(&chunk?);
        }
        Ok(collected)
    }

    pub async fn text(self) -> String {
        match self.bytes().await {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(error) => format!("unreadable body: {error}"),
        }
    }
}

impl std::fmt::Debug for TransportResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportResponse")
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}
