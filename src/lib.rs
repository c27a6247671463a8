pub mod adapter;
pub mod config;
pub mod credentials;
pub mod errors;
pub mod handlers;
pub mod limits;
pub mod metrics;
pub mod models;
pub mod orchestrator;
pub mod state;
pub mod stream;
pub mod transcription;
pub mod transport;

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use config::{CredentialSourceConfig, RouterConfig};
use credentials::{CredentialSource, EnvCredentials, SettingsFileCredentials};
use tracing::info;
use transport::{http::HttpTransport, mock::MockTransport, Transport};

pub fn build_state(config: &RouterConfig) -> Result<state::AppState, std::io::Error> {
    let credentials: Arc<dyn CredentialSource> = match &config.credentials {
        CredentialSourceConfig::Env { var } => Arc::new(EnvCredentials::new(var.clone())),
        CredentialSourceConfig::SettingsFile { path } => {
            Arc::new(SettingsFileCredentials::new(path.clone()))
        }
    };

    let transport: Arc<dyn Transport> = if config.mock_transport {
        Arc::new(MockTransport::echo())
    } else {
        Arc::new(HttpTransport::new(config.request_timeout).map_err(std::io::Error::other)?)
    };

    info!(
        credentials = credentials.name(),
        transport = transport.name(),
        history_limit = config.history_limit,
        min_call_interval_ms = config.min_call_interval.as_millis() as u64,
        "router configured"
    );
    Ok(state::AppState::new(config, credentials, transport))
}

pub fn build_app(state: state::AppState) -> Router {
    Router::new()
        .route("/healthz", get(handlers::healthz))
        .route("/metrics", get(handlers::metrics))
        .route("/v1/generate", post(handlers::generate))
        .route("/v1/transcribe", post(handlers::transcribe))
        .with_state(state)
}
