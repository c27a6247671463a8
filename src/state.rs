use std::sync::Arc;

use crate::{
    config::RouterConfig,
    credentials::CredentialSource,
    metrics::AppMetrics,
    orchestrator::{FailoverOrchestrator, FailoverPolicy},
    transcription::Transcriber,
    transport::Transport,
};

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<FailoverOrchestrator>,
    pub transcriber: Arc<Transcriber>,
    pub metrics: Arc<AppMetrics>,
    pub history_limit: usize,
    pub default_max_tokens: u32,
}

impl AppState {
    pub fn new(
        config: &RouterConfig,
        credentials: Arc<dyn CredentialSource>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let metrics = Arc::new(AppMetrics::new());
        let orchestrator = FailoverOrchestrator::new(
            credentials.clone(),
            transport.clone(),
            config.endpoints.clone(),
            config.min_call_interval,
        )
        .with_metrics(metrics.clone())
        .with_history_limit(config.history_limit)
        .with_policy(FailoverPolicy {
            short_circuit_client_errors: config.short_circuit_client_errors,
        });
        let transcriber = Transcriber::new(
            credentials,
            transport,
            config.endpoints.clone(),
            config.transcription_model.clone(),
        );

        Self {
            orchestrator: Arc::new(orchestrator),
            transcriber: Arc::new(transcriber),
            metrics,
            history_limit: config.history_limit,
            default_max_tokens: config.default_max_tokens,
        }
    }

    pub fn new_for_tests(
        credentials: Arc<dyn CredentialSource>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self::new(&RouterConfig::default(), credentials, transport)
    }
}
