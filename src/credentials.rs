//! Credential classification and the sources credentials are read from.

use std::{
    env, fmt,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::{config::ProviderEndpoints, errors::GenerationError};

const SETTINGS_KEY: &str = "groq-api-key";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Provider {
    Groq,
    HuggingFace,
    Gemini,
}

impl Provider {
    pub fn as_str(self) -> &'static str {
        match self {
            Provider::Groq => "groq",
            Provider::HuggingFace => "huggingface",
            Provider::Gemini => "gemini",
        }
    }

    pub fn auth_style(self) -> AuthStyle {
        match self {
            Provider::Groq | Provider::HuggingFace => AuthStyle::BearerHeader,
            Provider::Gemini => AuthStyle::QueryParam,
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStyle {
    BearerHeader,
    QueryParam,
}

/// A raw secret tagged with the provider it routes to.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    secret: String,
    provider: Provider,
}

impl Credential {
    pub fn provider(&self) -> Provider {
        self.provider
    }

    pub fn auth_style(&self) -> AuthStyle {
        self.provider.auth_style()
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }

    /// Base URL this credential is sent to. Resolved from `endpoints` so base URLs
    /// stay configurable without re-classifying keys.
    pub fn endpoint<'a>(&self, endpoints: &'a ProviderEndpoints) -> &'a str {
        match self.provider {
            Provider::Groq => &endpoints.groq_base_url,
            Provider::HuggingFace => &endpoints.huggingface_base_url,
            Provider::Gemini => &endpoints.gemini_base_url,
        }
    }

    /// Short stable tag for logs. Never reveals the secret.
    pub fn fingerprint(&self) -> String {
        fingerprint(&self.secret)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("provider", &self.provider)
            .field("fingerprint", &self.fingerprint())
            .finish()
    }
}

/// Routes a raw credential by prefix. First match wins, unknown prefixes go to Groq.
pub fn classify(raw: &str) -> Credential {
    let provider = if raw.starts_with("hf_") {
        Provider::HuggingFace
    } else if raw.starts_with("AIza") {
        Provider::Gemini
    } else {
        Provider::Groq
    };

    Credential {
        secret: raw.to_owned(),
        provider,
    }
}

/// Splits a stored credential string on newlines, carriage returns and commas.
pub fn parse_credential_list(raw: &str) -> Vec<String> {
    raw.split(['\n', '\r', ','])
        .map(str::trim)
        .filter(|key| !key.is_empty())
        .map(ToOwned::to_owned)
        .collect()
}

/// Picks the key used for speech-to-text: a `gsk_` key if present, otherwise the
/// first key that is neither a Hugging Face nor a Gemini key.
pub fn select_transcription_credential(keys: &[String]) -> Option<&str> {
    keys.iter()
        .find(|key| key.starts_with("gsk_"))
        .or_else(|| {
            keys.iter()
                .find(|key| classify(key).provider() == Provider::Groq)
        })
        .map(String::as_str)
}

pub fn fingerprint(secret: &str) -> String {
    let digest = Sha256::digest(secret.as_bytes());
    let mut encoded = String::with_capacity(12);
    for byte in digest.iter().take(6) {
        encoded.push_str(&format!("{byte:02x}"));
    }
    encoded
}

/// Supplies the raw, ranked credential string. Implementations must read fresh on
/// every call so settings changes apply to the next generation.
#[async_trait]
pub trait CredentialSource: Send + Sync {
    fn name(&self) -> &str;
    async fn load(&self) -> Result<String, GenerationError>;
}

#[derive(Debug, Clone)]
pub struct StaticCredentials {
    raw: String,
}

impl StaticCredentials {
    pub fn new(raw: impl Into<String>) -> Self {
        Self { raw: raw.into() }
    }

    pub fn from_keys<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let raw = keys
            .into_iter()
            .map(|key| key.as_ref().to_owned())
            .collect::<Vec<_>>()
            .join("\n");
        Self { raw }
    }
}

#[async_trait]
impl CredentialSource for StaticCredentials {
    fn name(&self) -> &str {
        "static"
    }

    async fn load(&self) -> Result<String, GenerationError> {
        Ok(self.raw.clone())
    }
}

#[derive(Debug, Clone)]
pub struct EnvCredentials {
    var: String,
}

impl EnvCredentials {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

#[async_trait]
impl CredentialSource for EnvCredentials {
    fn name(&self) -> &str {
        "env"
    }

    async fn load(&self) -> Result<String, GenerationError> {
        Ok(env::var(&self.var).unwrap_or_default())
    }
}

/// Reads a JSON settings store where each user keeps their own keys:
/// `{"auth-session": {"username": "alice"}, "users": {"alice": {"settings": {"groq-api-key": "..."}}}}`.
/// Keys are only ever read for the signed-in user.
#[derive(Debug, Clone)]
pub struct SettingsFileCredentials {
    path: PathBuf,
}

impl SettingsFileCredentials {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl CredentialSource for SettingsFileCredentials {
    fn name(&self) -> &str {
        "settings-file"
    }

    async fn load(&self) -> Result<String, GenerationError> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(String::new()),
            Err(error) => {
                return Err(GenerationError::Settings(format!(
                    "failed to read settings: {error}"
                )))
            }
        };
        let settings: Value = serde_json::from_str(&contents)
            .map_err(|error| GenerationError::Settings(format!("invalid settings file: {error}")))?;
        user_credentials(&settings)
    }
}

fn user_credentials(settings: &Value) -> Result<String, GenerationError> {
    let username = settings
        .get("auth-session")
        .and_then(|session| session.get("username"))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .ok_or_else(|| {
            GenerationError::Settings("no active session for settings access".to_owned())
        })?
        .to_lowercase();

    Ok(settings
        .get("users")
        .and_then(|users| users.get(&username))
        .and_then(|user| user.get("settings"))
        .and_then(|user_settings| user_settings.get(SETTINGS_KEY))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_owned())
}
