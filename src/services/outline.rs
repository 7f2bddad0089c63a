use crate::{
    models::{OutlineResult, Page, PageType, TextGenerationOptions},
    providers::ProviderFactory,
    templates::{TemplateName, TemplateStore},
};
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;

const DEFAULT_TEMPERATURE: f32 = 1.0;
const DEFAULT_MAX_TOKENS: u32 = 8000;

const PAGE_BREAK: &str = "<page>";

static DASH_BREAK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^[ \t]*-{3,}[ \t]*\r?$").expect("valid regex"));
static PAGE_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\[([^\]\s]+)\]").expect("valid regex"));

/// Turns a topic into a page-by-page outline using the active text provider.
#[derive(Clone)]
pub struct OutlineService {
    factory: Arc<ProviderFactory>,
    templates: Arc<dyn TemplateStore>,
}

impl OutlineService {
    pub fn new(factory: Arc<ProviderFactory>, templates: Arc<dyn TemplateStore>) -> Self {
        Self { factory, templates }
    }

    /// Never fails: every problem is reported through the result's `error`.
    pub async fn generate_outline(&self, topic: &str, images: Vec<String>) -> OutlineResult {
        let template = match self.templates.load(TemplateName::Outline) {
            Ok(template) => template,
            Err(e) => {
                log::error!("Outline template unavailable: {}", e);
                return OutlineResult::failure(format!("Failed to load prompt template: {}", e));
            }
        };

        let mut prompt = template.replacen("{topic}", topic, 1);
        if !images.is_empty() {
            prompt.push_str(&format!(
                "\n\n注意：用户提供了 {} 张参考图片，请在生成大纲时考虑这些图片的内容和风格。\
                 这些图片可能是产品图、个人照片或场景图，请根据图片内容来优化大纲，使生成的内容与图片相关联。",
                images.len()
            ));
        }

        let provider = match self.factory.text_provider() {
            Ok(provider) => provider,
            Err(e) => {
                log::error!("Text provider unavailable: {}", e);
                return OutlineResult::failure(e.to_string());
            }
        };

        let has_images = !images.is_empty();
        let mut options = TextGenerationOptions::new()
            .with_temperature(DEFAULT_TEMPERATURE)
            .with_max_tokens(DEFAULT_MAX_TOKENS)
            .with_images(images);
        if let Some(settings) = self.factory.active_text_settings() {
            if let Some(model) = settings.model.as_deref().filter(|m| !m.is_empty()) {
                options = options.with_model(model);
            }
            if let Some(temperature) = settings.temperature {
                options = options.with_temperature(temperature);
            }
            if let Some(tokens) = settings.max_output_tokens {
                options = options.with_max_tokens(tokens);
            }
        }

        log::info!("📝 Generating outline ({} reference images)", options.images.len());
        match provider.generate_text(&prompt, &options).await {
            Ok(text) => {
                let pages = parse_outline(&text);
                log::info!("✅ Outline ready with {} pages", pages.len());
                OutlineResult::success(text, pages, has_images)
            }
            Err(e) => {
                log::error!("Outline generation failed: {}", e);
                OutlineResult::failure(format!("Text generation failed: {}", e))
            }
        }
    }
}

/// Splits outline text into pages on `<page>` markers, or on lines of
/// dashes when no marker is present. Blank segments are skipped and do not
/// take an index.
pub fn parse_outline(text: &str) -> Vec<Page> {
    let segments: Vec<&str> = if text.contains(PAGE_BREAK) {
        text.split(PAGE_BREAK).collect()
    } else {
        DASH_BREAK.split(text).collect()
    };

    segments
        .into_iter()
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .enumerate()
        .map(|(index, segment)| Page {
            index,
            page_type: page_type_of(segment),
            content: segment.to_string(),
        })
        .collect()
}

fn page_type_of(segment: &str) -> PageType {
    PAGE_TAG
        .captures(segment)
        .and_then(|caps| caps.get(1))
        .and_then(|tag| PageType::from_tag(tag.as_str()))
        .unwrap_or(PageType::Content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::{ProviderGroupConfig, ProviderSettings},
        error::{GenerationError, Result},
        providers::TextProvider,
        templates::BuiltinTemplates,
    };
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingText {
        reply: Option<String>,
        seen: Mutex<Vec<(String, TextGenerationOptions)>>,
    }

    #[async_trait]
    impl TextProvider for RecordingText {
        async fn generate_text(
            &self,
            prompt: &str,
            options: &TextGenerationOptions,
        ) -> Result<String> {
            self.seen
                .lock()
                .unwrap()
                .push((prompt.to_string(), options.clone()));
            self.reply
                .clone()
                .ok_or_else(|| GenerationError::ProviderError("quota exceeded".into()))
        }

        fn validate_config(&self) -> bool {
            true
        }
    }

    struct FixedTemplate(&'static str);

    impl TemplateStore for FixedTemplate {
        fn load(&self, _: TemplateName) -> Result<String> {
            Ok(self.0.to_string())
        }
    }

    fn service(
        provider: Arc<RecordingText>,
        settings: ProviderSettings,
        templates: Arc<dyn TemplateStore>,
    ) -> OutlineService {
        let text = ProviderGroupConfig::new()
            .with_active("stub")
            .with_provider("stub", settings);
        let factory = ProviderFactory::new(text, ProviderGroupConfig::new())
            .with_text_provider("stub", provider);
        OutlineService::new(Arc::new(factory), templates)
    }

    #[test]
    fn test_parse_dash_delimited_outline() {
        let pages = parse_outline("[封面]Title\n---\n[内容]Body\n---\n[总结]End");
        let types: Vec<PageType> = pages.iter().map(|p| p.page_type).collect();
        assert_eq!(
            types,
            vec![PageType::Cover, PageType::Content, PageType::Summary]
        );
        let indices: Vec<usize> = pages.iter().map(|p| p.index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        assert_eq!(pages[0].content, "[封面]Title");
    }

    #[test]
    fn test_parse_dash_delimited_outline_with_crlf() {
        let pages = parse_outline("[封面]Title\r\n---\r\n[内容]Body\r\n---\r\n[总结]End");
        let types: Vec<PageType> = pages.iter().map(|p| p.page_type).collect();
        assert_eq!(
            types,
            vec![PageType::Cover, PageType::Content, PageType::Summary]
        );
        assert_eq!(pages[2].content, "[总结]End");
    }

    #[test]
    fn test_parse_page_markers_take_priority() {
        let pages = parse_outline("[封面]A\n---\nstill cover<page>[总结]B");
        assert_eq!(pages.len(), 2);
        assert_eq!(pages[0].content, "[封面]A\n---\nstill cover");
        assert_eq!(pages[1].page_type, PageType::Summary);
    }

    #[test]
    fn test_untagged_and_unknown_tags_default_to_content() {
        let pages = parse_outline("just text<page>[附录]extra<page>text [封面] later");
        assert!(pages.iter().all(|p| p.page_type == PageType::Content));
    }

    #[test]
    fn test_empty_segments_do_not_take_an_index() {
        let pages = parse_outline("<page>[封面]A<page>  \n <page><page>[内容]B<page>");
        assert_eq!(pages.len(), 2);
        assert_eq!(pages[1].index, 1);
        assert_eq!(pages[1].content, "[内容]B");
        assert!(parse_outline("   ").is_empty());
    }

    #[tokio::test]
    async fn test_generate_outline_uses_defaults_and_image_note() {
        let provider = Arc::new(RecordingText {
            reply: Some("[封面]Hi<page>[内容]Body".into()),
            ..Default::default()
        });
        let outline = service(
            provider.clone(),
            ProviderSettings::new(),
            Arc::new(FixedTemplate("Topic: {topic} / {topic}")),
        );

        let result = outline
            .generate_outline("cats", vec!["data:image/png;base64,AA==".into()])
            .await;
        assert!(result.success);
        assert!(result.has_images);
        assert_eq!(result.pages.len(), 2);

        let seen = provider.seen.lock().unwrap();
        let (prompt, options) = &seen[0];
        assert!(prompt.starts_with("Topic: cats / {topic}"));
        assert!(prompt.contains("1 张参考图片"));
        assert_eq!(options.temperature, Some(1.0));
        assert_eq!(options.max_output_tokens, Some(8000));
        assert_eq!(options.images.len(), 1);
    }

    #[tokio::test]
    async fn test_generate_outline_applies_provider_overrides() {
        let provider = Arc::new(RecordingText {
            reply: Some("[封面]Only".into()),
            ..Default::default()
        });
        let settings = ProviderSettings::new()
            .with_model("m-1")
            .with_temperature(0.3)
            .with_max_output_tokens(100);
        let outline = service(provider.clone(), settings, Arc::new(BuiltinTemplates));

        let result = outline.generate_outline("dogs", Vec::new()).await;
        assert!(result.success);
        assert!(!result.has_images);

        let seen = provider.seen.lock().unwrap();
        let (prompt, options) = &seen[0];
        assert!(prompt.contains("dogs"));
        assert!(!prompt.contains("参考图片，请"));
        assert_eq!(options.model.as_deref(), Some("m-1"));
        assert_eq!(options.temperature, Some(0.3));
        assert_eq!(options.max_output_tokens, Some(100));
    }

    #[tokio::test]
    async fn test_provider_failure_becomes_failure_result() {
        let provider = Arc::new(RecordingText::default());
        let outline = service(provider, ProviderSettings::new(), Arc::new(BuiltinTemplates));

        let result = outline.generate_outline("x", Vec::new()).await;
        assert!(!result.success);
        assert!(result.pages.is_empty());
        let error = result.error.unwrap();
        assert!(error.starts_with("Text generation failed: "));
        assert!(error.contains("quota exceeded"));
    }

    #[tokio::test]
    async fn test_missing_template_becomes_failure_result() {
        let empty = tempfile::tempdir().unwrap();
        let templates = crate::templates::FileTemplateStore::new(vec![empty.path().to_path_buf()]);
        let outline = service(
            Arc::new(RecordingText::default()),
            ProviderSettings::new(),
            Arc::new(templates),
        );

        let result = outline.generate_outline("x", Vec::new()).await;
        assert!(result
            .error
            .unwrap()
            .starts_with("Failed to load prompt template: "));
    }
}
