pub mod gemini;
pub mod media;
pub mod openai;
pub mod retry;
pub mod traits;

use crate::{
    config::{ProviderGroupConfig, ProviderSettings, RetryPolicy},
    error::{GenerationError, Result},
};
use std::collections::HashMap;
use std::sync::Arc;

pub use gemini::GeminiProvider;
pub use openai::OpenAiCompatibleProvider;
pub use traits::{ImageProvider, TextProvider};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderRole {
    Text,
    Image,
}

impl ProviderRole {
    fn label(&self) -> &'static str {
        match self {
            ProviderRole::Text => "text",
            ProviderRole::Image => "image",
        }
    }
}

/// Which adapter a provider's `type` selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    OpenAiCompatible,
    Gemini,
}

impl ProviderKind {
    pub fn from_settings(settings: &ProviderSettings, role: ProviderRole) -> Result<Self> {
        match (settings.type_name(), role) {
            ("openai" | "openai_compatible", _) => Ok(ProviderKind::OpenAiCompatible),
            ("image_api", ProviderRole::Image) => Ok(ProviderKind::OpenAiCompatible),
            ("google_gemini", _) => Ok(ProviderKind::Gemini),
            (other, role) => Err(GenerationError::ConfigError(format!(
                "Unsupported {} provider type: {}",
                role.label(),
                other
            ))),
        }
    }
}

pub fn build_text_provider(
    settings: &ProviderSettings,
    retry: &RetryPolicy,
) -> Result<Arc<dyn TextProvider>> {
    let provider: Arc<dyn TextProvider> =
        match ProviderKind::from_settings(settings, ProviderRole::Text)? {
            ProviderKind::OpenAiCompatible => Arc::new(
                OpenAiCompatibleProvider::new(settings.clone())?.with_retry(*retry),
            ),
            ProviderKind::Gemini => {
                Arc::new(GeminiProvider::new(settings.clone())?.with_retry(*retry))
            }
        };
    Ok(provider)
}

pub fn build_image_provider(
    settings: &ProviderSettings,
    retry: &RetryPolicy,
) -> Result<Arc<dyn ImageProvider>> {
    let provider: Arc<dyn ImageProvider> =
        match ProviderKind::from_settings(settings, ProviderRole::Image)? {
            ProviderKind::OpenAiCompatible => Arc::new(
                OpenAiCompatibleProvider::new(settings.clone())?.with_retry(*retry),
            ),
            ProviderKind::Gemini => {
                Arc::new(GeminiProvider::new(settings.clone())?.with_retry(*retry))
            }
        };
    Ok(provider)
}

/// Resolves the active text and image providers from configuration.
///
/// Providers are built on every call, so configuration changes take effect
/// for the next request. Instances registered with `with_text_provider` or
/// `with_image_provider` take precedence over configured settings of the
/// same name.
#[derive(Clone, Default)]
pub struct ProviderFactory {
    text: ProviderGroupConfig,
    image: ProviderGroupConfig,
    retry: RetryPolicy,
    text_overrides: HashMap<String, Arc<dyn TextProvider>>,
    image_overrides: HashMap<String, Arc<dyn ImageProvider>>,
}

impl ProviderFactory {
    pub fn new(text: ProviderGroupConfig, image: ProviderGroupConfig) -> Self {
        Self {
            text,
            image,
            ..Self::default()
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_text_provider(
        mut self,
        name: impl Into<String>,
        provider: Arc<dyn TextProvider>,
    ) -> Self {
        self.text_overrides.insert(name.into(), provider);
        self
    }

    pub fn with_image_provider(
        mut self,
        name: impl Into<String>,
        provider: Arc<dyn ImageProvider>,
    ) -> Self {
        self.image_overrides.insert(name.into(), provider);
        self
    }

    /// Settings of the active text provider, if one is configured.
    pub fn active_text_settings(&self) -> Option<&ProviderSettings> {
        self.text.active_settings().ok().map(|(_, settings)| settings)
    }

    pub fn text_provider(&self) -> Result<Arc<dyn TextProvider>> {
        let name = active_name(&self.text, ProviderRole::Text)?;
        if let Some(provider) = self.text_overrides.get(name) {
            return Ok(provider.clone());
        }
        let (name, settings) = self.text.active_settings()?;
        log::debug!("Resolving text provider '{}' ({})", name, settings.type_name());
        build_text_provider(settings, &self.retry)
    }

    pub fn image_provider(&self) -> Result<Arc<dyn ImageProvider>> {
        let name = active_name(&self.image, ProviderRole::Image)?;
        if let Some(provider) = self.image_overrides.get(name) {
            return Ok(provider.clone());
        }
        let (name, settings) = self.image.active_settings()?;
        log::debug!("Resolving image provider '{}' ({})", name, settings.type_name());
        build_image_provider(settings, &self.retry)
    }
}

fn active_name(group: &ProviderGroupConfig, role: ProviderRole) -> Result<&str> {
    let name = group.active_provider.trim();
    if name.is_empty() {
        return Err(GenerationError::ConfigError(format!(
            "No active {} provider configured",
            role.label()
        )));
    }
    Ok(name)
}
