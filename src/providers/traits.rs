use crate::{
    error::Result,
    models::{ImageGenerationOptions, TextGenerationOptions},
};
use async_trait::async_trait;

#[async_trait]
pub trait TextProvider: Send + Sync {
    async fn generate_text(&self, prompt: &str, options: &TextGenerationOptions) -> Result<String>;

    /// Cheap local sanity check of the adapter's settings; never calls out.
    fn validate_config(&self) -> bool;
}

#[async_trait]
pub trait ImageProvider: Send + Sync {
    /// Returns the encoded image bytes produced for `prompt`.
    async fn generate_image(
        &self,
        prompt: &str,
        options: &ImageGenerationOptions,
    ) -> Result<Vec<u8>>;

    fn validate_config(&self) -> bool;
}
