use crate::{
    compress::{compress_image, sniff_mime, REFERENCE_MAX_KB},
    config::{ProviderSettings, RetryPolicy},
    error::{GenerationError, Result},
    models::{ImageGenerationOptions, TextGenerationOptions},
    providers::{
        media::{
            decode_base64, download_image, encode_base64, split_data_uri, status_error,
            DEFAULT_IMAGE_MIME,
        },
        retry::with_backoff,
        traits::{ImageProvider, TextProvider},
    },
};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";
const DEFAULT_TEXT_MODEL: &str = "gemini-2.0-flash";
const DEFAULT_IMAGE_MODEL: &str = "gemini-2.0-flash-preview-image-generation";
const DEFAULT_TEMPERATURE: f32 = 1.0;
const DEFAULT_MAX_TOKENS: u32 = 8000;
const REFERENCE_MIME: &str = "image/png";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    inline_data: Option<InlineData>,
}

impl Part {
    fn text(text: impl Into<String>) -> Self {
        Part {
            text: Some(text.into()),
            inline_data: None,
        }
    }

    fn inline(mime_type: impl Into<String>, data: impl Into<String>) -> Self {
        Part {
            text: None,
            inline_data: Some(InlineData {
                mime_type: mime_type.into(),
                data: data.into(),
            }),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_modalities: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
}

/// Adapter for the Gemini `generateContent` API.
#[derive(Clone)]
pub struct GeminiProvider {
    client: Client,
    api_key: String,
    base_url: String,
    settings: ProviderSettings,
    retry: RetryPolicy,
}

impl GeminiProvider {
    pub fn new(settings: ProviderSettings) -> Result<Self> {
        let api_key = settings.require_api_key("Gemini")?;
        let base_url = settings
            .base_url
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_BASE_URL)
            .trim_end_matches('/')
            .to_string();
        let client = Client::builder()
            .timeout(Duration::from_secs(300))
            .build()
            .map_err(|e| GenerationError::ConfigError(format!("HTTP client setup failed: {}", e)))?;

        Ok(Self {
            client,
            api_key,
            base_url,
            settings,
            retry: RetryPolicy::default(),
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn endpoint(&self, model: &str) -> String {
        format!("{}/v1beta/models/{}:generateContent", self.base_url, model)
    }

    async fn generate_content(
        &self,
        model: &str,
        request: &GenerateContentRequest,
    ) -> Result<GenerateContentResponse> {
        let url = self.endpoint(model);
        log::debug!("Sending request to: {}", url);

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| GenerationError::ProviderError(format!("Gemini request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(status_error("Gemini", response).await);
        }

        response.json().await.map_err(|e| {
            GenerationError::ResponseError(format!("Failed to decode Gemini response: {}", e))
        })
    }

    /// Turns a caller-supplied image (data URI, URL or bare base64) into an
    /// inline part. Returns `None` when the image cannot be used.
    async fn image_part(&self, image: &str) -> Option<Part> {
        if let Some((mime, payload)) = split_data_uri(image) {
            return match decode_base64(payload) {
                Ok(bytes) => Some(Part::inline(mime, encode_base64(&bytes))),
                Err(e) => {
                    log::warn!("Skipping undecodable image: {}", e);
                    None
                }
            };
        }

        if image.starts_with("http://") || image.starts_with("https://") {
            return match download_image(&self.client, image).await {
                Ok((bytes, content_type)) => Some(Part::inline(
                    content_type.unwrap_or_else(|| DEFAULT_IMAGE_MIME.to_string()),
                    encode_base64(&bytes),
                )),
                Err(e) => {
                    log::warn!("Skipping image {}: {}", image, e);
                    None
                }
            };
        }

        match decode_base64(image) {
            Ok(bytes) => Some(Part::inline(DEFAULT_IMAGE_MIME, encode_base64(&bytes))),
            Err(e) => {
                log::warn!("Skipping image that is not valid base64: {}", e);
                None
            }
        }
    }

    async fn request_image(&self, model: &str, request: &GenerateContentRequest) -> Result<Vec<u8>> {
        let response = self.generate_content(model, request).await?;
        let candidate = response.candidates.into_iter().next().ok_or_else(|| {
            GenerationError::ResponseError("Gemini returned no candidates".into())
        })?;

        let inline = candidate
            .content
            .into_iter()
            .flat_map(|content| content.parts)
            .find_map(|part| part.inline_data)
            .ok_or_else(|| {
                GenerationError::ResponseError("No image data in Gemini response".into())
            })?;
        decode_base64(&inline.data)
    }
}

#[async_trait]
impl TextProvider for GeminiProvider {
    async fn generate_text(&self, prompt: &str, options: &TextGenerationOptions) -> Result<String> {
        let model = self
            .settings
            .model_override()
            .or(options.model.as_deref())
            .unwrap_or(DEFAULT_TEXT_MODEL);

        let mut parts = Vec::with_capacity(options.images.len() + 2);
        if let Some(system) = options.system_prompt.as_deref().filter(|s| !s.is_empty()) {
            parts.push(Part::text(format!("{}\n\n", system)));
        }
        parts.push(Part::text(prompt));
        for image in &options.images {
            if let Some(part) = self.image_part(image).await {
                parts.push(part);
            }
        }

        let request = GenerateContentRequest {
            contents: vec![Content {
                role: Some("user".into()),
                parts,
            }],
            generation_config: Some(GenerationConfig {
                temperature: Some(
                    options
                        .temperature
                        .or(self.settings.temperature)
                        .unwrap_or(DEFAULT_TEMPERATURE)
                        .clamp(0.0, 2.0),
                ),
                max_output_tokens: Some(
                    options
                        .max_output_tokens
                        .or(self.settings.max_output_tokens)
                        .unwrap_or(DEFAULT_MAX_TOKENS),
                ),
                response_modalities: None,
            }),
        };

        log::info!("Invoking Gemini model: {}", model);
        let response = self.generate_content(model, &request).await?;
        let candidate = response.candidates.into_iter().next().ok_or_else(|| {
            GenerationError::ResponseError("Gemini returned no candidates".into())
        })?;

        let text: String = candidate
            .content
            .into_iter()
            .flat_map(|content| content.parts)
            .filter_map(|part| part.text)
            .collect();
        if text.is_empty() {
            return Err(GenerationError::ResponseError(
                "Gemini candidate contained no text".into(),
            ));
        }
        Ok(text)
    }

    fn validate_config(&self) -> bool {
        !self.api_key.is_empty()
    }
}

#[async_trait]
impl ImageProvider for GeminiProvider {
    async fn generate_image(
        &self,
        prompt: &str,
        options: &ImageGenerationOptions,
    ) -> Result<Vec<u8>> {
        let model = options
            .model
            .as_deref()
            .or(self.settings.model_override())
            .unwrap_or(DEFAULT_IMAGE_MODEL);

        let references = options.references();
        let mut parts: Vec<Part> = references
            .iter()
            .map(|img| {
                let compressed = compress_image(img, REFERENCE_MAX_KB);
                let mime = sniff_mime(&compressed).unwrap_or(REFERENCE_MIME);
                Part::inline(mime, encode_base64(&compressed))
            })
            .collect();
        if references.is_empty() {
            parts.push(Part::text(prompt));
        } else {
            parts.push(Part::text(style_transfer_prompt(prompt)));
        }

        let request = GenerateContentRequest {
            contents: vec![Content {
                role: Some("user".into()),
                parts,
            }],
            generation_config: Some(GenerationConfig {
                response_modalities: Some(vec!["TEXT".into(), "IMAGE".into()]),
                ..GenerationConfig::default()
            }),
        };

        log::info!("Generating image with Gemini model: {}", model);
        let request = &request;
        with_backoff(&self.retry, "Gemini image generation", |_| async move {
            self.request_image(model, request).await
        })
        .await
    }

    fn validate_config(&self) -> bool {
        !self.api_key.is_empty()
    }
}

fn style_transfer_prompt(prompt: &str) -> String {
    format!(
        "请参考上面的图片的视觉风格（包括配色、排版风格、字体风格、装饰元素风格），\
         生成一张风格一致的新图片。\n\n\
         新图片的内容要求：\n{}\n\n\
         重要：\n\
         1. 必须保持与参考图相同的配色方案\n\
         2. 必须保持相同的排版和布局风格\n\
         3. 必须保持相同的字体和装饰元素风格\n\
         4. 只替换内容，不改变整体视觉风格",
        prompt
    )
}
