use std::{env, net::SocketAddr, path::PathBuf, time::Duration};

pub const DEFAULT_GROQ_BASE_URL: &str = "https://api.groq.com/openai/v1";
pub const DEFAULT_HUGGINGFACE_BASE_URL: &str = "https://router.huggingface.co/v1";
pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

pub const DEFAULT_GROQ_MODEL: &str = "llama-3.3-70b-versatile";
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-1.5-flash";
pub const DEFAULT_TRANSCRIPTION_MODEL: &str = "whisper-large-v3";
pub const DEFAULT_HISTORY_LIMIT: usize = 10;

pub const DEFAULT_HUGGINGFACE_MODELS: [&str; 3] = [
    "meta-llama/Meta-Llama-3-8B-Instruct",
    "mistralai/Mistral-7B-Instruct-v0.3",
    "microsoft/Phi-3-mini-4k-instruct",
];

/// Where each provider lives and which models it is asked for.
#[derive(Debug, Clone)]
pub struct ProviderEndpoints {
    pub groq_base_url: String,
    pub groq_model: String,
    pub huggingface_base_url: String,
    pub huggingface_models: Vec<String>,
    pub gemini_base_url: String,
    pub gemini_model: String,
    pub temperature: f64,
}

impl Default for ProviderEndpoints {
    fn default() -> Self {
        Self {
            groq_base_url: DEFAULT_GROQ_BASE_URL.to_owned(),
            groq_model: DEFAULT_GROQ_MODEL.to_owned(),
            huggingface_base_url: DEFAULT_HUGGINGFACE_BASE_URL.to_owned(),
            huggingface_models: DEFAULT_HUGGINGFACE_MODELS
                .iter()
                .map(|model| (*model).to_owned())
                .collect(),
            gemini_base_url: DEFAULT_GEMINI_BASE_URL.to_owned(),
            gemini_model: DEFAULT_GEMINI_MODEL.to_owned(),
            temperature: 0.7,
        }
    }
}

impl ProviderEndpoints {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let huggingface_models = env::var("ROUTER_HF_MODELS")
            .ok()
            .map(|value| {
                value
                    .split(',')
                    .map(str::trim)
                    .filter(|model| !model.is_empty())
                    .map(ToOwned::to_owned)
                    .collect::<Vec<_>>()
            })
            .filter(|models| !models.is_empty())
            .unwrap_or(defaults.huggingface_models);

        Self {
            groq_base_url: read_url("ROUTER_GROQ_BASE_URL", defaults.groq_base_url),
            groq_model: read_string("ROUTER_GROQ_MODEL", defaults.groq_model),
            huggingface_base_url: read_url("ROUTER_HF_BASE_URL", defaults.huggingface_base_url),
            huggingface_models,
            gemini_base_url: read_url("ROUTER_GEMINI_BASE_URL", defaults.gemini_base_url),
            gemini_model: read_string("ROUTER_GEMINI_MODEL", defaults.gemini_model),
            temperature: read_f64("ROUTER_TEMPERATURE", defaults.temperature),
        }
    }

    /// Points every provider at one base URL. Used against local mock servers.
    pub fn with_base_url(base_url: &str) -> Self {
        let base_url = base_url.trim_end_matches('/').to_owned();
        Self {
            groq_base_url: base_url.clone(),
            huggingface_base_url: base_url.clone(),
            gemini_base_url: base_url,
            ..Self::default()
        }
    }
}

/// Where the ranked credential string comes from.
#[derive(Debug, Clone)]
pub enum CredentialSourceConfig {
    Env { var: String },
    SettingsFile { path: PathBuf },
}

#[derive(Debug, Clone)]
pub struct RouterConfig {
    pub bind_addr: SocketAddr,
    pub request_timeout: Duration,
    pub history_limit: usize,
    pub default_max_tokens: u32,
    pub min_call_interval: Duration,
    pub transcription_model: String,
    pub credentials: CredentialSourceConfig,
    pub endpoints: ProviderEndpoints,
    pub short_circuit_client_errors: bool,
    pub mock_transport: bool,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8787)),
            request_timeout: Duration::from_secs(60),
            history_limit: DEFAULT_HISTORY_LIMIT,
            default_max_tokens: 800,
            min_call_interval: Duration::from_millis(1_000),
            transcription_model: DEFAULT_TRANSCRIPTION_MODEL.to_owned(),
            credentials: CredentialSourceConfig::Env {
                var: "ROUTER_API_KEYS".to_owned(),
            },
            endpoints: ProviderEndpoints::default(),
            short_circuit_client_errors: false,
            mock_transport: false,
        }
    }
}

impl RouterConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let credentials = match env::var("ROUTER_SETTINGS_PATH")
            .ok()
            .filter(|value| !value.trim().is_empty())
        {
            Some(path) => CredentialSourceConfig::SettingsFile {
                path: PathBuf::from(path),
            },
            None => defaults.credentials,
        };

        Self {
            bind_addr: env::var("ROUTER_BIND_ADDR")
                .ok()
                .and_then(|value| value.parse::<SocketAddr>().ok())
                .unwrap_or(defaults.bind_addr),
            request_timeout: Duration::from_secs(read_u64("ROUTER_TIMEOUT_SECS", 60)),
            history_limit: read_u64("ROUTER_HISTORY_LIMIT", defaults.history_limit as u64)
                as usize,
            default_max_tokens: read_u32("ROUTER_DEFAULT_MAX_TOKENS", defaults.default_max_tokens),
            min_call_interval: Duration::from_millis(read_u64("ROUTER_MIN_CALL_INTERVAL_MS", 1_000)),
            transcription_model: read_string(
                "ROUTER_TRANSCRIPTION_MODEL",
                defaults.transcription_model,
            ),
            credentials,
            endpoints: ProviderEndpoints::from_env(),
            short_circuit_client_errors: read_bool("ROUTER_SHORT_CIRCUIT_4XX"),
            mock_transport: read_bool("ROUTER_MOCK_TRANSPORT"),
        }
    }
}

fn read_string(name: &str, default: String) -> String {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
        .unwrap_or(default)
}

fn read_url(name: &str, default: String) -> String {
    read_string(name, default).trim_end_matches('/').to_owned()
}

fn read_u32(name: &str, default: u32) -> u32 {
    env::var(name)
        .ok()
        .and_then(|value| value.parse::<u32>().ok())
        .unwrap_or(default)
}

fn read_u64(name: &str, default: u64) -> u64 {
    env::var(name)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .unwrap_or(default)
}

fn read_bool(name: &str) -> bool {
    env::var(name)
        .map(|value| matches!(value.trim(), "1" | "true" | "yes"))
        .unwrap_or(false)
}

fn read_f64(name: &str, default: f64) -> f64 {
    env::var(name)
        .ok()
        .and_then(|value| value.parse::<f64>().ok())
        .unwrap_or(default)
}
