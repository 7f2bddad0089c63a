use crate::{
    compress::{compress_image, sniff_mime, REFERENCE_MAX_KB},
    config::{ProviderSettings, RetryPolicy},
    error::{GenerationError, Result},
    models::{ImageGenerationOptions, TextGenerationOptions, DEFAULT_ASPECT_RATIO},
    providers::{
        media::{decode_inline_image, download_image, status_error, to_data_uri},
        retry::with_backoff,
        traits::{ImageProvider, TextProvider},
    },
};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://api.openai.com";
const CHAT_PATH: &str = "/v1/chat/completions";
const IMAGES_PATH: &str = "/v1/images/generations";

const DEFAULT_TEXT_MODEL: &str = "gpt-3.5-turbo";
const DEFAULT_TEMPERATURE: f32 = 0.7;
const DEFAULT_MAX_TOKENS: u32 = 2000;

const DEFAULT_IMAGE_MODEL: &str = "dall-e-3";
const DEFAULT_IMAGE_SIZE: &str = "1024x1024";
const CHAT_IMAGE_TEMPERATURE: f32 = 1.0;

static MARKDOWN_IMAGE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"!\[.*?\]\(((?:https?://|data:image/)[^\s)]+)\)").expect("valid regex")
});

#[derive(Debug, Clone, PartialEq, Eq)]
enum ImageEndpoint {
    Images(String),
    Chat(String),
}

/// Where a chat reply says the generated image lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ImageReply {
    Remote(String),
    Inline(String),
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct ImagesResponse {
    #[serde(default)]
    data: Vec<ImageDatum>,
}

#[derive(Debug, Deserialize)]
struct ImageDatum {
    #[serde(default)]
    b64_json: Option<String>,
    #[serde(default)]
    url: Option<String>,
}

/// Adapter for any endpoint speaking the OpenAI chat and images wire format.
#[derive(Clone)]
pub struct OpenAiCompatibleProvider {
    client: Client,
    api_key: String,
    base_url: String,
    settings: ProviderSettings,
    retry: RetryPolicy,
}

impl OpenAiCompatibleProvider {
    pub fn new(settings: ProviderSettings) -> Result<Self> {
        let api_key = settings.require_api_key("OpenAI")?;
        let base_url = normalize_base_url(settings.base_url.as_deref());
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

    fn image_endpoint(&self) -> ImageEndpoint {
        let raw = self
            .settings
            .endpoint_type
            .as_deref()
            .map(str::trim)
            .unwrap_or("");
        let is_chat = raw.contains("chat") || raw.contains("completions");

        if raw.starts_with('/') {
            let url = format!("{}{}", self.base_url, raw);
            return if is_chat {
                ImageEndpoint::Chat(url)
            } else {
                ImageEndpoint::Images(url)
            };
        }
        if is_chat {
            ImageEndpoint::Chat(format!("{}{}", self.base_url, CHAT_PATH))
        } else {
            ImageEndpoint::Images(format!("{}{}", self.base_url, IMAGES_PATH))
        }
    }

    async fn post_json(&self, url: &str, payload: &Value) -> Result<reqwest::Response> {
        log::debug!("Sending request to: {}", url);
        let response = self
            .client
            .post(url)
            .bearer_auth(&self.api_key)
            .json(payload)
            .send()
            .await
            .map_err(|e| GenerationError::ProviderError(format!("OpenAI request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(status_error("OpenAI", response).await);
        }
        Ok(response)
    }

    async fn chat_completion(&self, url: &str, payload: &Value) -> Result<String> {
        let response = self.post_json(url, payload).await?;
        let body: ChatCompletionResponse = response.json().await.map_err(|e| {
            GenerationError::ResponseError(format!("Failed to decode chat completion: {}", e))
        })?;

        let choice = body
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| GenerationError::ResponseError("No choices in response".into()))?;
        Ok(message_text(choice.message.content.as_ref()))
    }

    async fn generate_via_images_api(
        &self,
        url: &str,
        prompt: &str,
        options: &ImageGenerationOptions,
        model: &str,
        references: &[Vec<u8>],
    ) -> Result<Vec<u8>> {
        let mut payload = json!({
            "model": model,
            "prompt": prompt,
            "response_format": "b64_json",
            "aspect_ratio": options.aspect_ratio.as_deref().unwrap_or(DEFAULT_ASPECT_RATIO),
            "image_size": options.size.as_deref().unwrap_or(DEFAULT_IMAGE_SIZE),
        });

        if !references.is_empty() {
            log::debug!("Adding {} reference images", references.len());
            payload["image"] = json!(reference_data_uris(references));
            payload["prompt"] = json!(style_reference_prompt(references.len(), prompt));
        }

        let response = self.post_json(url, &payload).await?;
        let body: ImagesResponse = response.json().await.map_err(|e| {
            GenerationError::ResponseError(format!("Failed to decode image response: {}", e))
        })?;

        let first = body.data.into_iter().next().ok_or_else(|| {
            GenerationError::ResponseError("Failed to extract image data from response".into())
        })?;
        if let Some(b64) = first.b64_json.filter(|s| !s.is_empty()) {
            return decode_inline_image(&b64);
        }
        if let Some(url) = first.url.filter(|s| !s.is_empty()) {
            let (bytes, _) = download_image(&self.client, &url).await?;
            return Ok(bytes);
        }
        Err(GenerationError::ResponseError(
            "Failed to extract image data from response".into(),
        ))
    }

    async fn generate_via_chat(
        &self,
        url: &str,
        prompt: &str,
        model: &str,
        references: &[Vec<u8>],
    ) -> Result<Vec<u8>> {
        let mut content = vec![json!({"type": "text", "text": prompt})];
        content.extend(
            reference_data_uris(references)
                .into_iter()
                .map(|uri| json!({"type": "image_url", "image_url": {"url": uri}})),
        );

        let payload = json!({
            "model": model,
            "messages": [{"role": "user", "content": content}],
            "temperature": CHAT_IMAGE_TEMPERATURE,
        });

        let reply = self.chat_completion(url, &payload).await?;
        match extract_image_reply(&reply)? {
            ImageReply::Remote(url) => Ok(download_image(&self.client, &url).await?.0),
            ImageReply::Inline(uri) => decode_inline_image(&uri),
        }
    }
}

#[async_trait]
impl TextProvider for OpenAiCompatibleProvider {
    async fn generate_text(&self, prompt: &str, options: &TextGenerationOptions) -> Result<String> {
        let model = self
            .settings
            .model_override()
            .or(options.model.as_deref())
            .unwrap_or(DEFAULT_TEXT_MODEL);
        let temperature = options
            .temperature
            .or(self.settings.temperature)
            .unwrap_or(DEFAULT_TEMPERATURE)
            .clamp(0.0, 2.0);
        let max_tokens = options
            .max_output_tokens
            .or(self.settings.max_output_tokens)
            .unwrap_or(DEFAULT_MAX_TOKENS);

        let mut messages = Vec::new();
        if let Some(system) = options.system_prompt.as_deref().filter(|s| !s.is_empty()) {
            messages.push(json!({"role": "system", "content": system}));
        }
        if options.images.is_empty() {
            messages.push(json!({"role": "user", "content": prompt}));
        } else {
            let mut parts = vec![json!({"type": "text", "text": prompt})];
            parts.extend(options.images.iter().map(|img| {
                json!({"type": "image_url", "image_url": {"url": chat_image_url(img)}})
            }));
            messages.push(json!({"role": "user", "content": parts}));
        }

        let payload = json!({
            "model": model,
            "messages": messages,
            "temperature": temperature,
            "max_tokens": max_tokens,
        });

        log::info!("Invoking chat model: {}", model);
        let url = format!("{}{}", self.base_url, CHAT_PATH);
        self.chat_completion(&url, &payload).await
    }

    fn validate_config(&self) -> bool {
        !self.api_key.is_empty()
    }
}

#[async_trait]
impl ImageProvider for OpenAiCompatibleProvider {
    async fn generate_image(
        &self,
        prompt: &str,
        options: &ImageGenerationOptions,
    ) -> Result<Vec<u8>> {
        let model = options
            .model
            .as_deref()
            .or(self.settings.model_override())
            .unwrap_or(DEFAULT_IMAGE_MODEL)
            .to_string();
        let references: Vec<Vec<u8>> = options
            .references()
            .into_iter()
            .map(|img| compress_image(img, REFERENCE_MAX_KB))
            .collect();
        let endpoint = self.image_endpoint();

        log::info!("Generating image with model: {}", model);
        let (endpoint, references, model) = (&endpoint, references.as_slice(), model.as_str());
        with_backoff(&self.retry, "Image generation", |_| async move {
            match endpoint {
                ImageEndpoint::Images(url) => {
                    self.generate_via_images_api(url, prompt, options, model, references)
                        .await
                }
                ImageEndpoint::Chat(url) => {
                    self.generate_via_chat(url, prompt, model, references).await
                }
            }
        })
        .await
    }

    fn validate_config(&self) -> bool {
        !self.api_key.is_empty()
    }
}

fn normalize_base_url(raw: Option<&str>) -> String {
    let trimmed = raw
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(DEFAULT_BASE_URL)
        .trim_end_matches('/');
    trimmed.strip_suffix("/v1").unwrap_or(trimmed).to_string()
}

/// URLs and data URIs pass through; anything else is treated as bare base64.
fn chat_image_url(image: &str) -> String {
    if image.starts_with("http") || image.starts_with("data:") {
        image.to_string()
    } else {
        format!("data:image/jpeg;base64,{}", image)
    }
}

fn reference_data_uris(references: &[Vec<u8>]) -> Vec<String> {
    references
        .iter()
        .map(|img| to_data_uri(sniff_mime(img).unwrap_or("image/png"), img))
        .collect()
}

fn style_reference_prompt(count: usize, prompt: &str) -> String {
    format!(
        "参考提供的 {} 张图片的风格（色彩、光影、构图、氛围），生成一张新图片。\n\n\
         新图片内容：{}\n\n\
         要求：\n\
         1. 保持相似的色调和氛围\n\
         2. 使用相似的光影处理\n\
         3. 保持一致的画面质感\n\
         4. 参考图中的人物或产品可以适当融入",
        count, prompt
    )
}

fn message_text(content: Option<&Value>) -> String {
    match content {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(parts)) => parts
            .iter()
            .filter_map(|part| part.get("text").and_then(Value::as_str))
            .collect(),
        _ => String::new(),
    }
}

/// Finds the image in a chat reply: a markdown image link first, then a
/// reply that is itself a data URI, then a reply that is a bare URL.
pub(crate) fn extract_image_reply(content: &str) -> Result<ImageReply> {
    if let Some(target) = MARKDOWN_IMAGE
        .captures(content)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
    {
        return Ok(if target.starts_with("data:") {
            ImageReply::Inline(target.to_string())
        } else {
            ImageReply::Remote(target.to_string())
        });
    }

    let trimmed = content.trim();
    if trimmed.starts_with("data:image") {
        return Ok(ImageReply::Inline(trimmed.to_string()));
    }
    if trimmed.starts_with("http") {
        return Ok(ImageReply::Remote(trimmed.to_string()));
    }

    let preview: String = trimmed.chars().take(200).collect();
    Err(GenerationError::ResponseError(format!(
        "Could not extract image from chat response: {}",
        preview
    )))
}
