use crate::error::{GenerationError, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::Client;

pub(crate) const DEFAULT_IMAGE_MIME: &str = "image/jpeg";

/// Splits `data:<mime>;base64,<payload>` into its mime type and payload.
pub(crate) fn split_data_uri(uri: &str) -> Option<(&str, &str)> {
    let rest = uri.strip_prefix("data:")?;
    let (meta, payload) = rest.split_once(',')?;
    let mime = meta.strip_suffix(";base64").unwrap_or(meta);
    Some((mime, payload))
}

pub(crate) fn decode_base64(payload: &str) -> Result<Vec<u8>> {
    let cleaned: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
    STANDARD
        .decode(cleaned)
        .map_err(|e| GenerationError::ResponseError(format!("Invalid base64 image data: {}", e)))
}

/// Decodes either a data URI or a bare base64 string.
pub(crate) fn decode_inline_image(value: &str) -> Result<Vec<u8>> {
    match split_data_uri(value.trim()) {
        Some((_, payload)) => decode_base64(payload),
        None => decode_base64(value.trim()),
    }
}

pub(crate) fn to_data_uri(mime: &str, data: &[u8]) -> String {
    format!("data:{};base64,{}", mime, STANDARD.encode(data))
}

pub(crate) fn encode_base64(data: &[u8]) -> String {
    STANDARD.encode(data)
}

/// Fetches a remote image and returns its bytes with the reported content type.
pub(crate) async fn download_image(client: &Client, url: &str) -> Result<(Vec<u8>, Option<String>)> {
    log::info!("Downloading image from {}", url);
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| GenerationError::ProviderError(format!("Failed to download image: {}", e)))?;

    let status = response.status();
    if !status.is_success() {
        return Err(GenerationError::ProviderError(format!(
            "Failed to download image: {}",
            status
        )));
    }

    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.split(';').next().unwrap_or(v).trim().to_string())
        .filter(|v| !v.is_empty());

    let bytes = response.bytes().await.map_err(|e| {
        GenerationError::ProviderError(format!("Failed to read downloaded image body: {}", e))
    })?;
    Ok((bytes.to_vec(), content_type))
}

/// Reads a non-2xx response into a provider error.
pub(crate) async fn status_error(provider: &str, response: reqwest::Response) -> GenerationError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    GenerationError::ProviderError(format!(
        "{} API request failed (status {}): {}",
        provider,
        status.as_u16(),
        body
    ))
}
