use crate::error::{GenerationError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Settings for one named provider, as found under `providers.<name>` in a
/// provider file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderSettings {
    #[serde(rename = "type", default)]
    pub provider_type: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_output_tokens: Option<u32>,
    #[serde(default)]
    pub endpoint_type: Option<String>,
}

impl ProviderSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_type(mut self, provider_type: impl Into<String>) -> Self {
        self.provider_type = Some(provider_type.into());
        self
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_output_tokens(mut self, tokens: u32) -> Self {
        self.max_output_tokens = Some(tokens);
        self
    }

    pub fn with_endpoint_type(mut self, endpoint_type: impl Into<String>) -> Self {
        self.endpoint_type = Some(endpoint_type.into());
        self
    }

    /// The `type` discriminator; a missing or blank type means `openai_compatible`.
    pub fn type_name(&self) -> &str {
        match self.provider_type.as_deref().map(str::trim) {
            Some(t) if !t.is_empty() => t,
            _ => "openai_compatible",
        }
    }

    /// Returns the API key or a configuration error naming the provider.
    pub fn require_api_key(&self, provider: &str) -> Result<String> {
        match self.api_key.as_deref().map(str::trim) {
            Some(key) if !key.is_empty() => Ok(key.to_string()),
            _ => Err(GenerationError::ConfigError(format!(
                "{} API key is required",
                provider
            ))),
        }
    }

    pub(crate) fn model_override(&self) -> Option<&str> {
        self.model.as_deref().filter(|m| !m.trim().is_empty())
    }
}

/// One provider role (text or image): which provider is active plus every
/// configured provider by name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderGroupConfig {
    #[serde(default)]
    pub active_provider: String,
    #[serde(default)]
    pub providers: HashMap<String, ProviderSettings>,
}

impl ProviderGroupConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_active(mut self, name: impl Into<String>) -> Self {
        self.active_provider = name.into();
        self
    }

    pub fn with_provider(mut self, name: impl Into<String>, settings: ProviderSettings) -> Self {
        self.providers.insert(name.into(), settings);
        self
    }

    pub fn from_json_str(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|e| {
            GenerationError::ConfigError(format!("Malformed provider config: {}", e))
        })
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            GenerationError::ConfigError(format!("Cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&raw)
    }

    /// Settings of the active provider.
    pub fn active_settings(&self) -> Result<(&str, &ProviderSettings)> {
        let active = self.active_provider.trim();
        if active.is_empty() {
            return Err(GenerationError::ConfigError(
                "No active provider configured".into(),
            ));
        }
        self.providers
            .get_key_value(active)
            .map(|(name, settings)| (name.as_str(), settings))
            .ok_or_else(|| {
                GenerationError::ConfigError(format!(
                    "Config for provider {} is missing",
                    active
                ))
            })
    }
}

/// What to do when a generated page cannot be written to disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PersistFailurePolicy {
    /// Report the page as failed with an `error` event.
    #[default]
    EmitError,
    /// Log a warning and still report the page as complete.
    LogAndContinue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        RetryPolicy {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Policy without sleeps between attempts.
    pub fn immediate(max_attempts: u32) -> Self {
        Self::new(max_attempts, Duration::ZERO)
    }

    /// Delay after the given failed attempt (1-based): base * 2^(attempt-1).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        self.base_delay * (1u32 << shift)
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub history_dir: PathBuf,
    pub prompts_dir: Option<PathBuf>,
    pub text: ProviderGroupConfig,
    pub image: ProviderGroupConfig,
    pub use_short_prompt: bool,
    pub persist_failure: PersistFailurePolicy,
    pub retry: RetryPolicy,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            history_dir: PathBuf::from("history"),
            prompts_dir: None,
            text: ProviderGroupConfig::default(),
            image: ProviderGroupConfig::default(),
            use_short_prompt: false,
            persist_failure: PersistFailurePolicy::default(),
            retry: RetryPolicy::default(),
        }
    }
}

impl AppConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(dir) = env::var("HISTORY_DIR") {
            config.history_dir = PathBuf::from(dir);
        }
        config.prompts_dir = env::var("PROMPTS_DIR").ok().map(PathBuf::from);

        if let Ok(path) = env::var("TEXT_PROVIDERS_FILE") {
            config.text = ProviderGroupConfig::from_json_file(path)?;
        }
        if let Ok(path) = env::var("IMAGE_PROVIDERS_FILE") {
            config.image = ProviderGroupConfig::from_json_file(path)?;
        }
        if let Ok(active) = env::var("TEXT_ACTIVE_PROVIDER") {
            config.text.active_provider = active;
        }
        if let Ok(active) = env::var("IMAGE_ACTIVE_PROVIDER") {
            config.image.active_provider = active;
        }
        config.use_short_prompt = env::var("USE_SHORT_PROMPT")
            .ok()
            .map_or(false, |val| val == "true" || val == "1");

        Ok(config)
    }

    pub fn with_history_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.history_dir = dir.into();
        self
    }

    pub fn with_prompts_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.prompts_dir = Some(dir.into());
        self
    }

    pub fn with_text(mut self, group: ProviderGroupConfig) -> Self {
        self.text = group;
        self
    }

    pub fn with_image(mut self, group: ProviderGroupConfig) -> Self {
        self.image = group;
        self
    }

    pub fn with_short_prompt(mut self, enabled: bool) -> Self {
        self.use_short_prompt = enabled;
        self
    }

    pub fn with_persist_failure(mut self, policy: PersistFailurePolicy) -> Self {
        self.persist_failure = policy;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}
