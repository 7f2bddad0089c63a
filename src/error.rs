use thiserror::Error;

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("Provider error: {0}")]
    ProviderError(String),
    #[error("Response error: {0}")]
    ResponseError(String),
    #[error("Storage error: {0}")]
    StorageError(String),
    #[error("Template not found: {0}")]
    TemplateNotFound(String),
    #[error("Operation cancelled")]
    Cancelled,
}

impl GenerationError {
    /// Whether a failed image call may be attempted again.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            GenerationError::ConfigError(_)
                | GenerationError::TemplateNotFound(_)
                | GenerationError::Cancelled
        )
    }
}

pub type Result<T> = std::result::Result<T, GenerationError>;
