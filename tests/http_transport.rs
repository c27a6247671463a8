use std::{sync::Arc, time::Duration};

use llm_failover_router::{
    config::ProviderEndpoints,
    credentials::StaticCredentials,
    models::{ChatTurn, GenerationRequest, GenerationResult},
    orchestrator::{collect_generation, FailoverOrchestrator},
    transcription::Transcriber,
    transport::http::HttpTransport,
};
use wiremock::{
    matchers::{body_string_contains, header, method, path, query_param},
    Mock, MockServer, ResponseTemplate,
};

fn request() -> GenerationRequest {
    GenerationRequest {
        system_prompt: "You are terse.".to_owned(),
        history: vec![
            ChatTurn::user("first question"),
            ChatTurn::assistant("first answer"),
            ChatTurn::user("second question"),
        ],
        max_tokens: 128,
    }
}

fn router(keys: &[&str], server: &MockServer) -> FailoverOrchestrator {
    FailoverOrchestrator::new(
        Arc::new(StaticCredentials::from_keys(keys)),
        Arc::new(HttpTransport::new(Duration::from_secs(5)).expect("http client")),
        ProviderEndpoints::with_base_url(&server.uri()),
        Duration::from_millis(1_000),
    )
}

#[tokio::test]
async fn groq_event_stream_is_normalized() {
    let server = MockServer::start().await;
    let body = concat!(
        "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n\n",
        "data: [DONE]\n\n",
    );
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer gsk_live"))
        .and(body_string_contains("llama-3.3-70b-versatile"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .expect(1)
        .mount(&server)
        .await;

    let stream = router(&["gsk_live"], &server)
        .generate("window-1", request())
        .await
        .expect("not rate limited");
    let (deltas, result) = collect_generation(stream).await;

    assert_eq!(deltas.len(), 2);
    assert_eq!(
        result,
        GenerationResult::Success {
            full_text: "Hello".to_owned()
        }
    );

    let received = server.received_requests().await.expect("recording enabled");
    let sent: serde_json::Value = received[0].body_json().expect("json body");
    assert_eq!(sent["stream"], true);
    assert_eq!(sent["max_tokens"], 128);
    assert_eq!(sent["messages"][0]["role"], "system");
    assert_eq!(sent["messages"][3]["content"], "second question");
}

#[tokio::test]
async fn rejected_groq_key_falls_through_to_gemini_query_key() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(401).set_body_string("{\"error\":\"invalid key\"}"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/models/gemini-1.5-flash:streamGenerateContent"))
        .and(query_param("alt", "sse"))
        .and(query_param("key", "AIzaGood"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"from gemini\"}]}}]}\r\n\r\n",
            "text/event-stream",
        ))
        .expect(1)
        .mount(&server)
        .await;

    let stream = router(&["gsk_revoked", "AIzaGood"], &server)
        .generate("window-1", request())
        .await
        .expect("not rate limited");
    let (_, result) = collect_generation(stream).await;

    assert_eq!(
        result,
        GenerationResult::Success {
            full_text: "from gemini".to_owned()
        }
    );

    let received = server.received_requests().await.expect("recording enabled");
    let gemini: serde_json::Value = received[1].body_json().expect("json body");
    assert_eq!(gemini["contents"][0]["parts"][0]["text"], "You are terse.");
    assert_eq!(gemini["contents"][2]["role"], "model");
    assert_eq!(gemini["generationConfig"]["maxOutputTokens"], 128);
    assert!(received[1].headers.get("authorization").is_none());
}

#[tokio::test]
async fn error_body_is_never_parsed_as_stream_content() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(500).set_body_string(
            "data: {\"choices\":[{\"delta\":{\"content\":\"not a delta\"}}]}\n",
        ))
        .mount(&server)
        .await;

    let stream = router(&["gsk_broken"], &server)
        .generate("window-1", request())
        .await
        .expect("not rate limited");
    let (deltas, result) = collect_generation(stream).await;

    assert!(deltas.is_empty());
    let GenerationResult::Failure { error } = result else {
        panic!("expected failure");
    };
    assert!(error.contains("500"));
}

#[tokio::test]
async fn transcription_uploads_multipart_audio_with_groq_key() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/audio/transcriptions"))
        .and(header("authorization", "Bearer gsk_voice"))
        .and(body_string_contains("whisper-large-v3"))
        .and(body_string_contains("filename=\"audio.webm\""))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({"text": "hello there"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let transcriber = Transcriber::new(
        Arc::new(StaticCredentials::from_keys(["hf_skip", "gsk_voice"])),
        Arc::new(HttpTransport::new(Duration::from_secs(5)).expect("http client")),
        ProviderEndpoints::with_base_url(&server.uri()),
        "whisper-large-v3",
    );

    let text = transcriber
        .transcribe(b"fake-webm-bytes".to_vec(), None)
        .await
        .expect("transcription succeeds");
    assert_eq!(text, "hello there");
}
