use std::fmt;

use serde_json::{json, Value};

use crate::{
    config::ProviderEndpoints,
    credentials::{AuthStyle, Credential, Provider},
    models::{ChatRole, GenerationRequest},
};

/// A fully-built upstream call. Pure data; the transport decides how to send it.
#[derive(Clone)]
pub struct ProviderRequest {
    pub provider: Provider,
    pub model: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Value,
    pub event_stream: bool,
}

impl ProviderRequest {
    /// The URL with any `key=` query value masked, safe to log.
    pub fn redacted_url(&self) -> String {
        redact_query_key(&self.url)
    }
}

impl fmt::Debug for ProviderRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let header_names = self
            .headers
            .iter()
            .map(|(name, _)| name.as_str())
            .collect::<Vec<_>>();
        f.debug_struct("ProviderRequest")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("url", &self.redacted_url())
            .field("headers", &header_names)
            .field("event_stream", &self.event_stream)
            .finish()
    }
}

pub fn build_request(
    credential: &Credential,
    request: &GenerationRequest,
    attempt_index: usize,
    endpoints: &ProviderEndpoints,
) -> ProviderRequest {
    let base_url = credential.endpoint(endpoints);
    let (url, model, body) = match credential.provider() {
        Provider::Groq => {
            let model = endpoints.groq_model.clone();
            let body = chat_completion_body(&model, request, endpoints.temperature);
            (format!("{base_url}/chat/completions"), model, body)
        }
        Provider::HuggingFace => {
            let model = huggingface_model(&endpoints.huggingface_models, attempt_index);
            let body = chat_completion_body(&model, request, endpoints.temperature);
            (format!("{base_url}/chat/completions"), model, body)
        }
        Provider::Gemini => {
            let model = endpoints.gemini_model.clone();
            (
                format!(
                    "{base_url}/models/{model}:streamGenerateContent?alt=sse&key={}",
                    credential.secret()
                ),
                model,
                gemini_body(request, endpoints.temperature),
            )
        }
    };

    let mut headers = vec![("content-type".to_owned(), "application/json".to_owned())];
    match credential.auth_style() {
        AuthStyle::BearerHeader => headers.push((
            "authorization".to_owned(),
            format!("Bearer {}", credential.secret()),
        )),
        AuthStyle::QueryParam => {}
    }

    ProviderRequest {
        provider: credential.provider(),
        model,
        url,
        headers,
        body,
        event_stream: true,
    }
}

/// Hugging Face keys rotate through the model list on each successive attempt.
fn huggingface_model(models: &[String], attempt_index: usize) -> String {
    if models.is_empty() {
        return crate::config::DEFAULT_HUGGINGFACE_MODELS[0].to_owned();
    }
    models[attempt_index % models.len()].clone()
}

fn chat_completion_body(model: &str, request: &GenerationRequest, temperature: f64) -> Value {
    let mut messages = Vec::with_capacity(request.history.len() + 1);
    messages.push(json!({"role": "system", "content": request.system_prompt}));
    messages.extend(
        request
            .history
            .iter()
            .map(|turn| json!({"role": turn.role.as_str(), "content": turn.content})),
    );

    json!({
        "model": model,
        "messages": messages,
        "temperature": temperature,
        "max_tokens": request.max_tokens,
        "stream": true
    })
}

fn gemini_body(request: &GenerationRequest, temperature: f64) -> Value {
    // Gemini has no system role; the prompt goes in as the opening user turn.
    let mut contents = Vec::with_capacity(request.history.len() + 1);
    contents.push(json!({"role": "user", "parts": [{"text": request.system_prompt}]}));
    contents.extend(request.history.iter().map(|turn| {
        let role = match turn.role {
            ChatRole::User => "user",
            ChatRole::Assistant => "model",
        };
        json!({"role": role, "parts": [{"text": turn.content}]})
    }));

    json!({
        "contents": contents,
        "generationConfig": {
            "temperature": temperature,
            "maxOutputTokens": request.max_tokens
        }
    })
}

/// One-shot multipart upload for speech-to-text.
#[derive(Clone)]
pub struct UploadRequest {
    pub url: String,
    pub bearer: String,
    pub model: String,
    pub file_name: String,
    pub mime_type: String,
    pub audio: Vec<u8>,
}

impl fmt::Debug for UploadRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadRequest")
            .field("url", &self.url)
            .field("model", &self.model)
            .field("file_name", &self.file_name)
            .field("audio_bytes", &self.audio.len())
            .finish()
    }
}

pub fn build_transcription_request(
    credential: &Credential,
    audio: Vec<u8>,
    model: &str,
    endpoints: &ProviderEndpoints,
) -> UploadRequest {
    UploadRequest {
        url: format!("{}/audio/transcriptions", endpoints.groq_base_url),
        bearer: credential.secret().to_owned(),
        model: model.to_owned(),
        file_name: "audio.webm".to_owned(),
        mime_type: "audio/webm".to_owned(),
        audio,
    }
}

fn redact_query_key(url: &str) -> String {
    let Some((base, query)) = url.split_once('?') else {
        return url.to_owned();
    };
    let query = query
        .split('&')
        .map(|pair| match pair.split_once('=') {
            Some(("key", _)) => "key=***".to_owned(),
            _ => pair.to_owned(),
        })
        .collect::<Vec<_>>()
        .join("&");
    format!("{base}?{query}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{credentials::classify, models::ChatTurn};

    fn request() -> GenerationRequest {
        GenerationRequest {
            system_prompt: "You are terse.".to_owned(),
            history: vec![ChatTurn::user("hello"), ChatTurn::assistant("hi there")],
            max_tokens: 512,
        }
    }

    fn header<'a>(request: &'a ProviderRequest, name: &str) -> Option<&'a str> {
        request
            .headers
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    #[test]
    fn groq_request_prepends_system_message() {
        let endpoints = ProviderEndpoints::default();
        let built = build_request(&classify("gsk_key"), &request(), 0, &endpoints);

        assert_eq!(built.url, "https://api.groq.com/openai/v1/chat/completions");
        assert_eq!(header(&built, "authorization"), Some("Bearer gsk_key"));
        assert_eq!(
            built.body,
            json!({
                "model": "llama-3.3-70b-versatile",
                "messages": [
                    {"role": "system", "content": "You are terse."},
                    {"role": "user", "content": "hello"},
                    {"role": "assistant", "content": "hi there"}
                ],
                "temperature": 0.7,
                "max_tokens": 512,
                "stream": true
            })
        );
    }

    #[test]
    fn huggingface_model_rotates_with_attempt_index() {
        let endpoints = ProviderEndpoints::default();
        let credential = classify("hf_key");
        let models = (0..4)
            .map(|attempt| build_request(&credential, &request(), attempt, &endpoints).model)
            .collect::<Vec<_>>();

        assert_eq!(models[0], "meta-llama/Meta-Llama-3-8B-Instruct");
        assert_eq!(models[1], "mistralai/Mistral-7B-Instruct-v0.3");
        assert_eq!(models[2], "microsoft/Phi-3-mini-4k-instruct");
        assert_eq!(models[3], models[0]);

        let built = build_request(&credential, &request(), 1, &endpoints);
        assert_eq!(built.url, "https://router.huggingface.co/v1/chat/completions");
        assert_eq!(built.body["model"], "mistralai/Mistral-7B-Instruct-v0.3");
    }

    #[test]
    fn gemini_request_uses_query_key_and_model_role() {
        let endpoints = ProviderEndpoints::default();
        let built = build_request(&classify("AIzaSecret"), &request(), 0, &endpoints);

        assert!(built.url.ends_with(
            "/models/gemini-1.5-flash:streamGenerateContent?alt=sse&key=AIzaSecret"
        ));
        assert_eq!(header(&built, "authorization"), None);
        assert_eq!(built.body["contents"][0]["role"], "user");
        assert_eq!(built.body["contents"][0]["parts"][0]["text"], "You are terse.");
        assert_eq!(built.body["contents"][2]["role"], "model");
        assert_eq!(built.body["generationConfig"]["maxOutputTokens"], 512);
    }

    #[test]
    fn temperature_serializes_exactly() {
        let endpoints = ProviderEndpoints::default();
        for key in ["gsk_key", "hf_key"] {
            let built = build_request(&classify(key), &request(), 0, &endpoints);
            let wire = built.body.to_string();
            assert!(wire.contains(r#""temperature":0.7}"#), "{wire}");
        }

        let gemini = build_request(&classify("AIzaSecret"), &request(), 0, &endpoints);
        let wire = gemini.body["generationConfig"].to_string();
        assert_eq!(wire, r#"{"maxOutputTokens":512,"temperature":0.7}"#);
    }

    #[test]
    fn debug_and_redacted_url_hide_gemini_key() {
        let endpoints = ProviderEndpoints::default();
        let built = build_request(&classify("AIzaSecret"), &request(), 0, &endpoints);

        assert!(built.redacted_url().ends_with("?alt=sse&key=***"));
        assert!(!format!("{built:?}").contains("AIzaSecret"));
    }
}
