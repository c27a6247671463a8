//! Sequential failover across a ranked credential list.

use std::{sync::Arc, time::Duration};

use futures_util::{stream::BoxStream, StreamExt};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    adapter::{build_request, ProviderRequest},
    config::{ProviderEndpoints, DEFAULT_HISTORY_LIMIT},
    credentials::{classify, parse_credential_list, Credential, CredentialSource},
    errors::GenerationError,
    limits::CallLimiter,
    metrics::AppMetrics,
    models::{GenerationEvent, GenerationRequest, GenerationResult, StreamDelta},
    stream::{normalize, DeltaStream},
    transport::Transport,
};

pub type GenerationStream = BoxStream<'static, GenerationEvent>;

/// How one credential's attempt ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    Success { full_text: String },
    RetryableFailure { status: u16 },
    FatalFailure { error: GenerationError },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouterState {
    Idle,
    Attempting(usize),
    Succeeded,
    Exhausted,
}

impl RouterState {
    pub fn start(credential_count: usize) -> Self {
        if credential_count == 0 {
            RouterState::Exhausted
        } else {
            RouterState::Attempting(0)
        }
    }

    /// Moves past a failed attempt.
    pub fn after_failure(self, credential_count: usize) -> Self {
        match self {
            RouterState::Attempting(index) if index + 1 < credential_count => {
                RouterState::Attempting(index + 1)
            }
            RouterState::Attempting(_) => RouterState::Exhausted,
            other => other,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RouterState::Succeeded | RouterState::Exhausted)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FailoverPolicy {
    /// Stop on client errors like 400 or 413 instead of trying the remaining keys.
    pub short_circuit_client_errors: bool,
}

impl FailoverPolicy {
    fn stops_on(&self, error: &GenerationError) -> bool {
        let GenerationError::ProviderStatus { status, .. } = error else {
            return false;
        };
        self.short_circuit_client_errors && (400..500).contains(status)
    }
}

#[derive(Clone)]
pub struct FailoverOrchestrator {
    credentials: Arc<dyn CredentialSource>,
    transport: Arc<dyn Transport>,
    limiter: Arc<CallLimiter>,
    endpoints: Arc<ProviderEndpoints>,
    metrics: Arc<AppMetrics>,
    policy: FailoverPolicy,
    history_limit: usize,
}

impl FailoverOrchestrator {
    pub fn new(
        credentials: Arc<dyn CredentialSource>,
        transport: Arc<dyn Transport>,
        endpoints: ProviderEndpoints,
        min_call_interval: Duration,
    ) -> Self {
        Self {
            credentials,
            transport,
            limiter: Arc::new(CallLimiter::new(min_call_interval)),
            endpoints: Arc::new(endpoints),
            metrics: Arc::new(AppMetrics::new()),
            policy: FailoverPolicy::default(),
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<AppMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_policy(mut self, policy: FailoverPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Most recent turns forwarded upstream; older history is dropped.
    pub fn with_history_limit(mut self, history_limit: usize) -> Self {
        self.history_limit = history_limit;
        self
    }

    pub fn history_limit(&self) -> usize {
        self.history_limit
    }

    pub fn credentials(&self) -> &Arc<dyn CredentialSource> {
        &self.credentials
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn endpoints(&self) -> &ProviderEndpoints {
        &self.endpoints
    }

    /// Starts a generation for `caller_id`.
    ///
    /// Fails fast with [`GenerationError::RateLimited`] when the caller is inside its
    /// minimum interval; no credential is read and nothing is sent. Otherwise the
    /// returned stream yields deltas as they arrive and always ends with exactly one
    /// [`GenerationEvent::Finished`]. Deltas from an attempt that later fails are not
    /// retracted. Dropping the stream aborts the in-flight attempt. History beyond the
    /// configured limit is dropped oldest first before any attempt is built.
    pub async fn generate(
        &self,
        caller_id: &str,
        request: GenerationRequest,
    ) -> Result<GenerationStream, GenerationError> {
        if let Err(rejected) = self.limiter.check_and_record(caller_id).await {
            let retry_after_ms = rejected.retry_after.as_millis() as u64;
            self.metrics.observe_rate_limited();
            warn!(caller_id, retry_after_ms, "generation rate limited");
            return Err(GenerationError::RateLimited { retry_after_ms });
        }

        let request = request.with_history_limit(self.history_limit);
        let generation_id = format!("gen_{}", Uuid::new_v4());
        let this = self.clone();
        let stream = async_stream::stream! {
            let metrics = this.metrics.clone();
            let _inflight = metrics.inflight_guard();

            let credentials = match this.load_credentials().await {
                Ok(credentials) => credentials,
                Err(error) => {
                    warn!(generation_id = %generation_id, error = %error, "credentials unavailable");
                    metrics.observe_generation(false);
                    yield GenerationEvent::Finished(GenerationResult::Failure {
                        error: error.user_message(),
                    });
                    return;
                }
            };

            let count = credentials.len();
            let mut state = RouterState::start(count);
            let mut last_error: Option<GenerationError> = if count == 0 {
                Some(GenerationError::NoCredentials)
            } else {
                None
            };
            info!(generation_id = %generation_id, credentials = count, "generation started");

            while let RouterState::Attempting(index) = state {
                let credential = &credentials[index];
                let provider = credential.provider();
                let provider_request =
                    build_request(credential, &request, index, &this.endpoints);
                let started = Instant::now();
                info!(
                    generation_id = %generation_id,
                    attempt = index,
                    provider = %provider,
                    credential = %credential.fingerprint(),
                    model = %provider_request.model,
                    "attempting provider"
                );

                let outcome = match this.open_attempt(&provider_request).await {
                    Ok(mut deltas) => {
                        let mut full_text = String::new();
                        let mut failure = None;
                        while let Some(next) = deltas.next().await {
                            match next {
                                Ok(delta) => {
                                    full_text.push_str(&delta.text);
                                    metrics.observe_delta(provider);
                                    yield GenerationEvent::Delta(delta);
                                }
                                Err(error) => {
                                    failure = Some(GenerationError::Transport {
                                        provider,
                                        message: error.to_string(),
                                    });
                                    break;
                                }
                            }
                        }
                        match failure {
                            Some(error) => AttemptOutcome::FatalFailure { error },
                            None => AttemptOutcome::Success { full_text },
                        }
                    }
                    Err(outcome) => outcome,
                };

                let latency_ms = started.elapsed().as_millis() as u64;
                match outcome {
                    AttemptOutcome::Success { full_text } => {
                        metrics.observe_attempt(provider, "success");
                        metrics.observe_generation(true);
                        info!(
                            generation_id = %generation_id,
                            attempt = index,
                            provider = %provider,
                            latency_ms,
                            chars = full_text.chars().count(),
                            "generation succeeded"
                        );
                        state = RouterState::Succeeded;
                        yield GenerationEvent::Complete;
                        yield GenerationEvent::Finished(GenerationResult::Success { full_text });
                    }
                    AttemptOutcome::RetryableFailure { status } => {
                        metrics.observe_attempt(provider, "retryable");
                        warn!(
                            generation_id = %generation_id,
                            attempt = index,
                            provider = %provider,
                            status,
                            latency_ms,
                            "provider unavailable, trying next key"
                        );
                        last_error = Some(GenerationError::from_status(provider, status, ""));
                        state = state.after_failure(count);
                    }
                    AttemptOutcome::FatalFailure { error } => {
                        metrics.observe_attempt(provider, "failed");
                        warn!(
                            generation_id = %generation_id,
                            attempt = index,
                            provider = %provider,
                            error = %error,
                            latency_ms,
                            "attempt failed"
                        );
                        let stop = this.policy.stops_on(&error);
                        last_error = Some(error);
                        state = if stop {
                            RouterState::Exhausted
                        } else {
                            state.after_failure(count)
                        };
                    }
                }
            }

            if state == RouterState::Exhausted {
                let error = last_error.unwrap_or(GenerationError::AllProvidersFailed);
                metrics.observe_generation(false);
                warn!(generation_id = %generation_id, error = %error, "all providers failed");
                yield GenerationEvent::Finished(GenerationResult::Failure {
                    error: error.user_message(),
                });
            }
        };

        Ok(stream.boxed())
    }

    async fn load_credentials(&self) -> Result<Vec<Credential>, GenerationError> {
        let raw = self.credentials.load().await?;
        let credentials = parse_credential_list(&raw)
            .iter()
            .map(|key| classify(key))
            .collect::<Vec<_>>();
        debug!(
            source = self.credentials.name(),
            count = credentials.len(),
            "credentials loaded"
        );
        Ok(credentials)
    }

    /// Sends the request and, on a 2xx, hands back the normalized delta stream.
    /// Non-2xx bodies are never parsed as stream content.
    async fn open_attempt(&self, request: &ProviderRequest) -> Result<DeltaStream, AttemptOutcome> {
        let provider = request.provider;
        let response = self
            .transport
            .send(request)
            .await
            .map_err(|error| AttemptOutcome::FatalFailure {
                error: GenerationError::Transport {
                    provider,
                    message: error.to_string(),
                },
            })?;

        if response.is_success() {
            return Ok(normalize(provider, response.body));
        }

        let status = response.status;
        if GenerationError::is_retryable_status(status) {
            return Err(AttemptOutcome::RetryableFailure { status });
        }

        let body = response.text().await;
        Err(AttemptOutcome::FatalFailure {
            error: GenerationError::from_status(provider, status, &body),
        })
    }
}

/// Drains a generation stream into its deltas and terminal result.
pub async fn collect_generation(mut stream: GenerationStream) -> (Vec<StreamDelta>, GenerationResult) {
    let mut deltas = Vec::new();
    let mut result = GenerationResult::Failure {
        error: GenerationError::AllProvidersFailed.user_message(),
    };
    while let Some(event) = stream.next().await {
        match event {
            GenerationEvent::Delta(delta) => deltas.push(delta),
            GenerationEvent::Complete => {}
            GenerationEvent::Finished(finished) => {
                result = finished;
                break;
            }
        }
    }
    (deltas, result)
}
