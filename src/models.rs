use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

impl ChatRole {
    pub fn as_str(self) -> &'static str {
        match self {
            ChatRole::User => "user",
            ChatRole::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct ChatTurn {
    pub role: ChatRole,
    pub content: String,
}

impl ChatTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// Snapshot of everything a single generation call sends upstream.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub system_prompt: String,
    pub history: Vec<ChatTurn>,
    pub max_tokens: u32,
}

impl GenerationRequest {
    /// Keeps only the most recent `limit` turns; older turns are dropped from the front.
    pub fn bounded(
        system_prompt: impl Into<String>,
        history: Vec<ChatTurn>,
        max_tokens: u32,
        limit: usize,
    ) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            history,
            max_tokens,
        }
        .with_history_limit(limit)
    }

    /// Drops the oldest turns beyond `limit`.
    pub fn with_history_limit(mut self, limit: usize) -> Self {
        if self.history.len() > limit {
            self.history.drain(..self.history.len() - limit);
        }
        self
    }
}

/// Body accepted by `POST /v1/generate`.
#[derive(Debug, Clone, Deserialize)]
pub struct GenerateBody {
    pub system_prompt: String,
    #[serde(default)]
    pub history: Vec<ChatTurn>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

impl GenerateBody {
    pub fn into_request(self, default_max_tokens: u32, history_limit: usize) -> GenerationRequest {
        let max_tokens = self
            .max_tokens
            .filter(|value| *value > 0)
            .unwrap_or(default_max_tokens);
        GenerationRequest::bounded(self.system_prompt, self.history, max_tokens, history_limit)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreamDelta {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationResult {
    Success { full_text: String },
    Failure { error: String },
}

impl GenerationResult {
    pub fn is_success(&self) -> bool {
        matches!(self, GenerationResult::Success { .. })
    }
}

/// One element of the event stream returned by a generation call.
/// `Finished` is always the last event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationEvent {
    Delta(StreamDelta),
    Complete,
    Finished(GenerationResult),
}

/// Terminal payload sent to the UI, shaped like the desktop client expects.
#[derive(Debug, Serialize)]
pub struct ResultPayload {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&GenerationResult> for ResultPayload {
    fn from(value: &GenerationResult) -> Self {
        match value {
            GenerationResult::Success { full_text } => Self {
                success: true,
                content: Some(full_text.clone()),
                error: None,
            },
            GenerationResult::Failure { error } => Self {
                success: false,
                content: None,
                error: Some(error.clone()),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct TranscriptionPayload {
    pub success: bool,
    pub text: String,
}
