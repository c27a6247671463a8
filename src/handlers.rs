use std::{convert::Infallible, time::Instant};

use axum::{
    body::Bytes,
    extract::{rejection::JsonRejection, Query, State},
    http::{header::CONTENT_TYPE, HeaderMap},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use futures_util::StreamExt;
use serde::Deserialize;
use tracing::info;

use crate::{
    errors::AppError,
    models::{GenerateBody, GenerationEvent, ResultPayload, TranscriptionPayload},
    state::AppState,
};

pub const CALLER_HEADER: &str = "x-caller-id";
const DEFAULT_CALLER: &str = "default";

pub async fn healthz() -> &'static str {
    "ok"
}

pub async fn metrics(State(state): State<AppState>) -> Response {
    match state.metrics.render() {
        Ok(body) => (
            [(CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(error) => AppError::Upstream(format!("metrics render failed: {error}")).into_response(),
    }
}

pub async fn generate(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<GenerateBody>, JsonRejection>,
) -> Response {
    let started = Instant::now();
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => {
            let response = AppError::BadRequest(rejection.body_text()).into_response();
            state
                .metrics
                .observe_request("/v1/generate", response.status().as_u16(), started.elapsed());
            return response;
        }
    };
    let caller_id = caller_id(&headers);
    let request = body.into_request(state.default_max_tokens, state.history_limit);
    info!(
        caller_id = %caller_id,
        turns = request.history.len(),
        max_tokens = request.max_tokens,
        "generation requested"
    );

    let response = match state.orchestrator.generate(&caller_id, request).await {
        Ok(events) => {
            let outbound = events.map(|event| Ok::<Event, Infallible>(sse_event(&event)));
            Sse::new(outbound)
                .keep_alive(KeepAlive::new().interval(std::time::Duration::from_secs(10)))
                .into_response()
        }
        Err(error) => AppError::from(error).into_response(),
    };

    state
        .metrics
        .observe_request("/v1/generate", response.status().as_u16(), started.elapsed());
    response
}

#[derive(Debug, Deserialize)]
pub struct TranscribeQuery {
    #[serde(default)]
    pub model: Option<String>,
}

pub async fn transcribe(
    State(state): State<AppState>,
    Query(query): Query<TranscribeQuery>,
    audio: Bytes,
) -> Response {
    let started = Instant::now();
    let response = match state
        .transcriber
        .transcribe(audio.to_vec(), query.model.as_deref())
        .await
    {
        Ok(text) => {
            state.metrics.observe_transcription(true);
            Json(TranscriptionPayload {
                success: true,
                text,
            })
            .into_response()
        }
        Err(error) => {
            state.metrics.observe_transcription(false);
            AppError::from(error).into_response()
        }
    };

    state
        .metrics
        .observe_request("/v1/transcribe", response.status().as_u16(), started.elapsed());
    response
}

fn caller_id(headers: &HeaderMap) -> String {
    headers
        .get(CALLER_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or(DEFAULT_CALLER)
        .to_owned()
}

fn sse_event(event: &GenerationEvent) -> Event {
    match event {
        GenerationEvent::Delta(delta) => json_event("delta", delta),
        GenerationEvent::Complete => Event::default().event("complete").data("{}"),
        GenerationEvent::Finished(result) => json_event("result", &ResultPayload::from(result)),
    }
}

fn json_event<T: serde::Serialize>(name: &str, payload: &T) -> Event {
    match serde_json::to_string(payload) {
        Ok(serialized) => Event::default().event(name).data(serialized),
        Err(error) => {
            let fallback = serde_json::json!({
                "success": false,
                "error": format!("serialization error: {error}")
            });
            Event::default().event("result").data(fallback.to_string())
        }
    }
}
