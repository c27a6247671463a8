use std::time::Duration;

use prometheus::{
    opts, Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Registry,
    TextEncoder,
};

use crate::credentials::Provider;

#[derive(Clone)]
pub struct AppMetrics {
    registry: Registry,
    request_total: IntCounterVec,
    request_duration_seconds: HistogramVec,
    inflight_generations: IntGauge,
    attempts_total: IntCounterVec,
    generations_total: IntCounterVec,
    rate_limited_total: IntCounter,
    deltas_total: IntCounterVec,
    transcriptions_total: IntCounterVec,
}

pub struct InflightGuard<'a> {
    metrics: &'a AppMetrics,
}

impl AppMetrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let request_total = IntCounterVec::new(
            opts!(
                "router_http_requests_total",
                "Total HTTP requests served by the local router"
            ),
            &["path", "status"],
        )
        .expect("valid request_total metric");

        let request_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "router_http_request_duration_seconds",
                "Time until the response head was ready, in seconds",
            ),
            &["path"],
        )
        .expect("valid request_duration_seconds metric");

        let inflight_generations = IntGauge::new(
            "router_inflight_generations",
            "Generations currently streaming",
        )
        .expect("valid inflight_generations metric");

        let attempts_total = IntCounterVec::new(
            opts!(
                "router_provider_attempts_total",
                "Provider attempts by provider and outcome"
            ),
            &["provider", "outcome"],
        )
        .expect("valid attempts_total metric");

        let generations_total = IntCounterVec::new(
            opts!(
                "router_generations_total",
                "Generation calls by terminal result"
            ),
            &["result"],
        )
        .expect("valid generations_total metric");

        let rate_limited_total = IntCounter::new(
            "router_rate_limited_total",
            "Generation calls rejected by the per-caller interval",
        )
        .expect("valid rate_limited_total metric");

        let deltas_total = IntCounterVec::new(
            opts!(
                "router_stream_deltas_total",
                "Text deltas forwarded to callers by provider"
            ),
            &["provider"],
        )
        .expect("valid deltas_total metric");

        let transcriptions_total = IntCounterVec::new(
            opts!(
                "router_transcriptions_total",
                "Transcription calls by result"
            ),
            &["result"],
        )
        .expect("valid transcriptions_total metric");

        registry
            .register(Box::new(request_total.clone()))
            .expect("register request_total");
        registry
            .register(Box::new(request_duration_seconds.clone()))
            .expect("register request_duration_seconds");
        registry
            .register(Box::new(inflight_generations.clone()))
            .expect("register inflight_generations");
        registry
            .register(Box::new(attempts_total.clone()))
            .expect("register attempts_total");
        registry
            .register(Box::new(generations_total.clone()))
            .expect("register generations_total");
        registry
            .register(Box::new(rate_limited_total.clone()))
            .expect("register rate_limited_total");
        registry
            .register(Box::new(deltas_total.clone()))
            .expect("register deltas_total");
        registry
            .register(Box::new(transcriptions_total.clone()))
            .expect("register transcriptions_total");

        Self {
            registry,
            request_total,
            request_duration_seconds,
            inflight_generations,
            attempts_total,
            generations_total,
            rate_limited_total,
            deltas_total,
            transcriptions_total,
        }
    }

    pub fn inflight_guard(&self) -> InflightGuard<'_> {
        self.inflight_generations.inc();
        InflightGuard { metrics: self }
    }

    pub fn observe_request(&self, path: &str, status: u16, duration: Duration) {
        let status_label = status.to_string();
        self.request_total
            .with_label_values(&[path, &status_label])
            .inc();
        self.request_duration_seconds
            .with_label_values(&[path])
            .observe(duration.as_secs_f64());
    }

    pub fn observe_attempt(&self, provider: Provider, outcome: &str) {
        self.attempts_total
            .with_label_values(&[provider.as_str(), outcome])
            .inc();
    }

    pub fn observe_delta(&self, provider: Provider) {
        self.deltas_total
            .with_label_values(&[provider.as_str()])
            .inc();
    }

    pub fn observe_generation(&self, success: bool) {
        let label = if success { "success" } else { "failure" };
        self.generations_total.with_label_values(&[label]).inc();
    }

    pub fn observe_rate_limited(&self) {
        self.rate_limited_total.inc();
    }

    pub fn observe_transcription(&self, success: bool) {
        let label = if success { "success" } else { "failure" };
        self.transcriptions_total.with_label_values(&[label]).inc();
    }

    pub fn render(&self) -> Result<String, String> {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        let families = self.registry.gather();
        encoder
            .encode(&families, &mut buffer)
            .map_err(|error| error.to_string())?;
        String::from_utf8(buffer).map_err(|error| error.to_string())
    }
}

impl Default for AppMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for InflightGuard<'_> {
    fn drop(&mut self) {
        self.metrics.inflight_generations.dec();
    }
}
