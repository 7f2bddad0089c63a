/// Aspect ratio used for every page unless a caller asks otherwise.
pub const DEFAULT_ASPECT_RATIO: &str = "3:4";

/// Options for a text generation call. Unset fields fall back to the
/// adapter's own defaults.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TextGenerationOptions {
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub max_output_tokens: Option<u32>,
    /// URLs, `data:` URIs or bare base64 strings.
    pub images: Vec<String>,
    pub system_prompt: Option<String>,
}

impl TextGenerationOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, tokens: u32) -> Self {
        self.max_output_tokens = Some(tokens);
        self
    }

    pub fn with_images(mut self, images: Vec<String>) -> Self {
        self.images = images;
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// Requested temperature clamped into the 0.0..=2.0 range, or `default`.
    pub fn temperature_or(&self, default: f32) -> f32 {
        self.temperature.unwrap_or(default).clamp(0.0, 2.0)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImageGenerationOptions {
    pub model: Option<String>,
    pub aspect_ratio: Option<String>,
    pub size: Option<String>,
    pub reference_image: Option<Vec<u8>>,
    pub reference_images: Vec<Vec<u8>>,
}

impl ImageGenerationOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_aspect_ratio(mut self, ratio: impl Into<String>) -> Self {
        self.aspect_ratio = Some(ratio.into());
        self
    }

    pub fn with_size(mut self, size: impl Into<String>) -> Self {
        self.size = Some(size.into());
        self
    }

    pub fn with_reference_image(mut self, image: Vec<u8>) -> Self {
        self.reference_image = Some(image);
        self
    }

    pub fn with_reference_images(mut self, images: Vec<Vec<u8>>) -> Self {
        self.reference_images = images;
        self
    }

    /// Every reference image to send, in order, with byte-identical
    /// duplicates and empty buffers removed. The single reference image is
    /// appended after the sequence unless it is already part of it.
    pub fn references(&self) -> Vec<&[u8]> {
        let mut out: Vec<&[u8]> = Vec::with_capacity(self.reference_images.len() + 1);
        let candidates = self
            .reference_images
            .iter()
            .chain(self.reference_image.iter());
        for image in candidates {
            if image.is_empty() || out.iter().any(|seen| *seen == image.as_slice()) {
                continue;
            }
            out.push(image.as_slice());
        }
        out
    }
}
