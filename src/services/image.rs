use crate::{
    config::{AppConfig, PersistFailurePolicy},
    error::{GenerationError, Result},
    logger::Timer,
    models::{FinishSummary, GenerationEvent, ImageGenerationOptions, Page, DEFAULT_ASPECT_RATIO},
    providers::ProviderFactory,
    services::tasks::{TaskRegistry, TaskState},
    storage::{ImageStore, LocalImageStore},
    templates::{TemplateName, TemplateStore},
};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

const TOPIC_NOT_PROVIDED: &str = "未提供";

/// Everything needed to render one outline into images.
#[derive(Debug, Clone)]
pub struct ImageTaskRequest {
    pub task_id: String,
    pub pages: Vec<Page>,
    pub full_outline: String,
    pub reference_images: Vec<Vec<u8>>,
    pub user_topic: String,
    pub cancel: CancellationToken,
}

impl ImageTaskRequest {
    pub fn new(task_id: impl Into<String>, pages: Vec<Page>) -> Self {
        Self {
            task_id: task_id.into(),
            pages,
            full_outline: String::new(),
            reference_images: Vec::new(),
            user_topic: String::new(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_full_outline(mut self, outline: impl Into<String>) -> Self {
        self.full_outline = outline.into();
        self
    }

    pub fn with_reference_images(mut self, images: Vec<Vec<u8>>) -> Self {
        self.reference_images = images;
        self
    }

    pub fn with_user_topic(mut self, topic: impl Into<String>) -> Self {
        self.user_topic = topic.into();
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }
}

/// Result of regenerating a single page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegeneratedImage {
    pub index: usize,
    pub filename: String,
    pub image_url: String,
}

pub fn image_url(task_id: &str, filename: &str) -> String {
    format!("/api/images/{}/{}", task_id, filename)
}

/// Renders outline pages into images, one page at a time, and reports
/// progress as a stream of events.
#[derive(Clone)]
pub struct ImageService {
    factory: Arc<ProviderFactory>,
    templates: Arc<dyn TemplateStore>,
    store: Arc<dyn ImageStore>,
    tasks: TaskRegistry,
    use_short_prompt: bool,
    persist_failure: PersistFailurePolicy,
}

impl ImageService {
    pub fn new(
        factory: Arc<ProviderFactory>,
        templates: Arc<dyn TemplateStore>,
        store: Arc<dyn ImageStore>,
    ) -> Self {
        Self {
            factory,
            templates,
            store,
            tasks: TaskRegistry::new(),
            use_short_prompt: false,
            persist_failure: PersistFailurePolicy::default(),
        }
    }

    /// Service writing into `config.history_dir` with the configured prompt
    /// length and persistence policy.
    pub fn from_config(
        config: &AppConfig,
        factory: Arc<ProviderFactory>,
        templates: Arc<dyn TemplateStore>,
    ) -> Self {
        Self::new(
            factory,
            templates,
            Arc::new(LocalImageStore::new(config.history_dir.clone())),
        )
        .with_short_prompt(config.use_short_prompt)
        .with_persist_failure(config.persist_failure)
    }

    pub fn with_short_prompt(mut self, enabled: bool) -> Self {
        self.use_short_prompt = enabled;
        self
    }

    pub fn with_persist_failure(mut self, policy: PersistFailurePolicy) -> Self {
        self.persist_failure = policy;
        self
    }

    pub fn task_state(&self, task_id: &str) -> Option<TaskState> {
        self.tasks.get(task_id)
    }

    pub fn cleanup_task(&self, task_id: &str) -> bool {
        let removed = self.tasks.remove(task_id);
        if removed {
            log::info!("🧹 Cleaned up task {}", task_id);
        }
        removed
    }

    /// Starts rendering in the background and returns the event stream.
    ///
    /// Pages are processed in order. Each yields `progress` followed by
    /// either `complete` or `error`, and the stream ends with one `finish`.
    /// Dropping the stream stops the task at its next event.
    pub fn generate_images(&self, request: ImageTaskRequest) -> ReceiverStream<GenerationEvent> {
        let (tx, rx) = mpsc::channel(1);
        let service = self.clone();

        tokio::spawn(async move {
            service.run_task(request, tx).await;
        });

        ReceiverStream::new(rx)
    }

    async fn run_task(&self, request: ImageTaskRequest, tx: mpsc::Sender<GenerationEvent>) {
        let ImageTaskRequest {
            task_id,
            pages,
            full_outline,
            reference_images,
            user_topic,
            cancel,
        } = request;

        self.tasks
            .start(&task_id, &full_outline, &user_topic, reference_images.clone());

        let total = pages.len();
        let mut completed = 0;
        let mut failed_indices = Vec::new();
        log::info!("🎨 Starting image task {} with {} pages", task_id, total);

        for (position, page) in pages.iter().enumerate() {
            log::debug!("Processing page {}/{}", position + 1, total);
            let progress = GenerationEvent::Progress {
                index: page.index,
                current: position + 1,
                total,
            };
            if !self.emit(&tx, &task_id, progress).await {
                return;
            }

            let timer = Timer::new(&format!("task {} page {}", task_id, page.index));
            let outcome = self
                .render_page(
                    &task_id,
                    page,
                    &full_outline,
                    &user_topic,
                    reference_images.clone(),
                    &cancel,
                )
                .await;
            drop(timer);

            let event = match outcome {
                Ok(filename) => {
                    completed += 1;
                    self.tasks.record_success(&task_id, page.index, &filename);
                    GenerationEvent::Complete {
                        index: page.index,
                        image_url: image_url(&task_id, &filename),
                    }
                }
                Err(e) => {
                    log::error!("❌ Page {} of task {} failed: {}", page.index, task_id, e);
                    failed_indices.push(page.index);
                    self.tasks.record_failure(&task_id, page.index, &e.to_string());
                    GenerationEvent::Error {
                        index: page.index,
                        message: e.to_string(),
                    }
                }
            };
            if !self.emit(&tx, &task_id, event).await {
                return;
            }
        }

        self.tasks.mark_finished(&task_id);
        log::info!(
            "✅ Task {} finished: {} done, {} failed",
            task_id,
            completed,
            failed_indices.len()
        );

        let finish = GenerationEvent::Finish {
            task_id: task_id.clone(),
            summary: FinishSummary {
                total,
                completed,
                failed: failed_indices.len(),
                failed_indices,
            },
        };
        self.emit(&tx, &task_id, finish).await;
    }

    /// Sends one event, returning false once the consumer has gone away.
    async fn emit(
        &self,
        tx: &mpsc::Sender<GenerationEvent>,
        task_id: &str,
        event: GenerationEvent,
    ) -> bool {
        let name = event.name();
        if tx.send(event).await.is_err() {
            log::warn!(
                "Consumer of task {} disconnected before '{}' event, stopping",
                task_id,
                name
            );
            return false;
        }
        true
    }

    /// Regenerates one page outside of a streamed task.
    ///
    /// An empty `full_outline` or `user_topic` falls back to what the task
    /// was started with. With `use_reference` the task's reference images
    /// are attached again.
    pub async fn regenerate_image(
        &self,
        task_id: &str,
        page: &Page,
        full_outline: &str,
        user_topic: &str,
        use_reference: bool,
    ) -> Result<RegeneratedImage> {
        let stored = self.tasks.get(task_id).unwrap_or_default();
        let full_outline = if full_outline.is_empty() {
            stored.full_outline.as_str()
        } else {
            full_outline
        };
        let user_topic = if user_topic.is_empty() {
            stored.user_topic.as_str()
        } else {
            user_topic
        };
        let references = if use_reference {
            stored.reference_images.clone()
        } else {
            Vec::new()
        };

        log::info!("🔁 Regenerating page {} of task {}", page.index, task_id);
        let outcome = self
            .render_page(
                task_id,
                page,
                full_outline,
                user_topic,
                references,
                &CancellationToken::new(),
            )
            .await;

        match outcome {
            Ok(filename) => {
                self.tasks.record_success(task_id, page.index, &filename);
                Ok(RegeneratedImage {
                    index: page.index,
                    image_url: image_url(task_id, &filename),
                    filename,
                })
            }
            Err(e) => {
                self.tasks.record_failure(task_id, page.index, &e.to_string());
                Err(e)
            }
        }
    }

    async fn render_page(
        &self,
        task_id: &str,
        page: &Page,
        full_outline: &str,
        user_topic: &str,
        references: Vec<Vec<u8>>,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let prompt = self.page_prompt(page, full_outline, user_topic);
        let options = ImageGenerationOptions::new()
            .with_aspect_ratio(DEFAULT_ASPECT_RATIO)
            .with_reference_images(references);

        let provider = self.factory.image_provider()?;
        let image = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(GenerationError::Cancelled),
            result = provider.generate_image(&prompt, &options) => result?,
        };

        let filename = format!("{}.png", page.index);
        match self.store.save(task_id, &filename, &image).await {
            Ok(path) => log::debug!("Page {} saved to {}", page.index, path.display()),
            Err(e) => match self.persist_failure {
                PersistFailurePolicy::EmitError => return Err(e),
                PersistFailurePolicy::LogAndContinue => {
                    log::warn!("Could not persist page {}: {}", page.index, e)
                }
            },
        }
        Ok(filename)
    }

    fn page_prompt(&self, page: &Page, full_outline: &str, user_topic: &str) -> String {
        let name = if self.use_short_prompt {
            TemplateName::ImagePromptShort
        } else {
            TemplateName::ImagePrompt
        };

        match self.templates.load(name) {
            Ok(template) => {
                let topic = if user_topic.trim().is_empty() {
                    TOPIC_NOT_PROVIDED
                } else {
                    user_topic
                };
                template
                    .replace("{page_content}", &page.content)
                    .replace("{page_type}", page.page_type.as_str())
                    .replace("{full_outline}", full_outline)
                    .replace("{user_topic}", topic)
            }
            Err(e) => {
                log::warn!("Image prompt template unavailable, using plain prompt: {}", e);
                format!("Content: {}\nType: {}", page.content, page.page_type)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::ProviderGroupConfig,
        models::PageType,
        providers::ImageProvider,
    };
    use async_trait::async_trait;
    use std::path::PathBuf;
    use std::sync::Mutex;
    use tokio_stream::StreamExt;

    /// Fails any prompt mentioning FAIL; otherwise returns `png:<prompt>`.
    #[derive(Default)]
    struct StubImage {
        calls: Mutex<Vec<(String, usize)>>,
    }

    impl StubImage {
        fn prompts(&self) -> Vec<String> {
            self.calls.lock().unwrap().iter().map(|(p, _)| p.clone()).collect()
        }
    }

    #[async_trait]
    impl ImageProvider for StubImage {
        async fn generate_image(
            &self,
            prompt: &str,
            options: &ImageGenerationOptions,
        ) -> Result<Vec<u8>> {
            assert_eq!(options.aspect_ratio.as_deref(), Some("3:4"));
            self.calls
                .lock()
                .unwrap()
                .push((prompt.to_string(), options.references().len()));
            if prompt.contains("FAIL") {
                return Err(GenerationError::ProviderError("upstream said no".into()));
            }
            Ok(format!("png:{}", prompt).into_bytes())
        }

        fn validate_config(&self) -> bool {
            true
        }
    }

    struct NeverImage;

    #[async_trait]
    impl ImageProvider for NeverImage {
        async fn generate_image(&self, _: &str, _: &ImageGenerationOptions) -> Result<Vec<u8>> {
            std::future::pending().await
        }

        fn validate_config(&self) -> bool {
            true
        }
    }

    struct BrokenStore;

    #[async_trait]
    impl ImageStore for BrokenStore {
        async fn save(&self, _: &str, _: &str, _: &[u8]) -> Result<PathBuf> {
            Err(GenerationError::StorageError("disk full".into()))
        }
    }

    /// No templates at all, so prompts are the plain `Content/Type` form.
    struct NoTemplates;

    impl TemplateStore for NoTemplates {
        fn load(&self, name: TemplateName) -> Result<String> {
            Err(GenerationError::TemplateNotFound(name.file_name().into()))
        }
    }

    struct NamedTemplates;

    impl TemplateStore for NamedTemplates {
        fn load(&self, name: TemplateName) -> Result<String> {
            Ok(match name {
                TemplateName::ImagePromptShort => "SHORT {page_content} / {user_topic}".into(),
                _ => "LONG {page_type}: {page_content} | {full_outline} | {user_topic}".into(),
            })
        }
    }

    fn factory_with(provider: Arc<dyn ImageProvider>) -> Arc<ProviderFactory> {
        let image = ProviderGroupConfig::new().with_active("stub");
        Arc::new(
            ProviderFactory::new(ProviderGroupConfig::new(), image)
                .with_image_provider("stub", provider),
        )
    }

    fn page(index: usize, page_type: PageType, content: &str) -> Page {
        Page {
            index,
            page_type,
            content: content.to_string(),
        }
    }

    fn three_pages() -> Vec<Page> {
        vec![
            page(0, PageType::Cover, "cover"),
            page(1, PageType::Content, "FAIL here"),
            page(2, PageType::Summary, "the end"),
        ]
    }

    #[tokio::test]
    async fn test_failed_page_does_not_stop_the_task() {
        let dir = tempfile::tempdir().unwrap();
        let stub = Arc::new(StubImage::default());
        let service = ImageService::new(
            factory_with(stub.clone()),
            Arc::new(NoTemplates),
            Arc::new(LocalImageStore::new(dir.path())),
        );

        let events: Vec<GenerationEvent> = service
            .generate_images(ImageTaskRequest::new("task_a", three_pages()))
            .collect()
            .await;

        let names: Vec<&str> = events.iter().map(|e| e.name()).collect();
        assert_eq!(
            names,
            vec!["progress", "complete", "progress", "error", "progress", "complete", "finish"]
        );
        let indices: Vec<Option<usize>> = events.iter().map(|e| e.index()).collect();
        assert_eq!(
            indices,
            vec![Some(0), Some(0), Some(1), Some(1), Some(2), Some(2), None]
        );
        assert_eq!(
            events[1],
            GenerationEvent::Complete {
                index: 0,
                image_url: "/api/images/task_a/0.png".into()
            }
        );
        assert_eq!(
            events[2],
            GenerationEvent::Progress {
                index: 1,
                current: 2,
                total: 3
            }
        );
        match &events[6] {
            GenerationEvent::Finish { task_id, summary } => {
                assert_eq!(task_id, "task_a");
                assert_eq!(summary.completed, 2);
                assert_eq!(summary.failed_indices, vec![1]);
            }
            other => panic!("expected finish, got {:?}", other),
        }

        let task_dir = dir.path().join("task_a");
        assert_eq!(
            std::fs::read(task_dir.join("0.png")).unwrap(),
            b"png:Content: cover\nType: cover"
        );
        assert_eq!(
            std::fs::read(task_dir.join("2.png")).unwrap(),
            b"png:Content: the end\nType: summary"
        );
        assert!(!task_dir.join("1.png").exists());

        let state = service.task_state("task_a").unwrap();
        assert!(state.finished);
        assert_eq!(state.generated.len(), 2);
        assert!(state.failed[&1].contains("upstream said no"));
        assert!(service.cleanup_task("task_a"));
        assert!(service.task_state("task_a").is_none());
    }

    #[tokio::test]
    async fn test_duplicate_references_reach_provider_once() {
        let dir = tempfile::tempdir().unwrap();
        let stub = Arc::new(StubImage::default());
        let service = ImageService::new(
            factory_with(stub.clone()),
            Arc::new(NoTemplates),
            Arc::new(LocalImageStore::new(dir.path())),
        );

        let cover = vec![1u8, 2, 3];
        let request = ImageTaskRequest::new("task_b", vec![page(0, PageType::Cover, "c")])
            .with_reference_images(vec![cover.clone(), cover]);
        let _: Vec<GenerationEvent> = service.generate_images(request).collect().await;

        assert_eq!(stub.calls.lock().unwrap()[0].1, 1);
    }

    #[tokio::test]
    async fn test_templates_and_short_prompt() {
        let dir = tempfile::tempdir().unwrap();
        let stub = Arc::new(StubImage::default());
        let store = Arc::new(LocalImageStore::new(dir.path()));
        let long = ImageService::new(factory_with(stub.clone()), Arc::new(NamedTemplates), store);
        let short = long.clone().with_short_prompt(true);

        let pages = vec![page(0, PageType::Cover, "hello")];
        let request = ImageTaskRequest::new("task_c", pages.clone()).with_full_outline("OUTLINE");
        let _: Vec<GenerationEvent> = long.generate_images(request).collect().await;
        let request = ImageTaskRequest::new("task_d", pages).with_user_topic("travel");
        let _: Vec<GenerationEvent> = short.generate_images(request).collect().await;

        assert_eq!(
            stub.prompts(),
            vec![
                "LONG cover: hello | OUTLINE | 未提供".to_string(),
                "SHORT hello / travel".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_cancelled_task_reports_every_page_as_error() {
        let dir = tempfile::tempdir().unwrap();
        let service = ImageService::new(
            factory_with(Arc::new(NeverImage)),
            Arc::new(NoTemplates),
            Arc::new(LocalImageStore::new(dir.path())),
        );

        let token = CancellationToken::new();
        token.cancel();
        let request = ImageTaskRequest::new("task_e", three_pages()).with_cancellation(token);
        let events: Vec<GenerationEvent> = service.generate_images(request).collect().await;

        assert_eq!(events.len(), 7);
        let errors: Vec<&GenerationEvent> =
            events.iter().filter(|e| e.name() == "error").collect();
        assert_eq!(errors.len(), 3);
        assert_eq!(
            *errors[0],
            GenerationEvent::Error {
                index: 0,
                message: GenerationError::Cancelled.to_string()
            }
        );
        assert!(events[6].is_terminal());
    }

    #[tokio::test]
    async fn test_unresolvable_provider_becomes_page_errors() {
        let dir = tempfile::tempdir().unwrap();
        let service = ImageService::new(
            Arc::new(ProviderFactory::default()),
            Arc::new(NoTemplates),
            Arc::new(LocalImageStore::new(dir.path())),
        );

        let events: Vec<GenerationEvent> = service
            .generate_images(ImageTaskRequest::new("task_f", three_pages()))
            .collect()
            .await;
        assert_eq!(events.iter().filter(|e| e.name() == "error").count(), 3);
        assert_eq!(events.last().map(|e| e.name()), Some("finish"));
    }

    #[tokio::test]
    async fn test_persist_failure_policy() {
        let stub = Arc::new(StubImage::default());
        let strict = ImageService::new(
            factory_with(stub.clone()),
            Arc::new(NoTemplates),
            Arc::new(BrokenStore),
        );
        let lenient = strict
            .clone()
            .with_persist_failure(PersistFailurePolicy::LogAndContinue);
        let pages = vec![page(0, PageType::Cover, "c")];

        let events: Vec<GenerationEvent> = strict
            .generate_images(ImageTaskRequest::new("task_g", pages.clone()))
            .collect()
            .await;
        match &events[1] {
            GenerationEvent::Error { message, .. } => assert!(message.contains("disk full")),
            other => panic!("expected error, got {:?}", other),
        }

        let events: Vec<GenerationEvent> = lenient
            .generate_images(ImageTaskRequest::new("task_h", pages))
            .collect()
            .await;
        assert_eq!(events[1].name(), "complete");
    }

    #[tokio::test]
    async fn test_dropped_stream_stops_the_task() {
        let dir = tempfile::tempdir().unwrap();
        let stub = Arc::new(StubImage::default());
        let service = ImageService::new(
            factory_with(stub.clone()),
            Arc::new(NoTemplates),
            Arc::new(LocalImageStore::new(dir.path())),
        );

        let pages: Vec<Page> = (0..10)
            .map(|i| page(i, PageType::Content, "body"))
            .collect();
        let mut stream = service.generate_images(ImageTaskRequest::new("task_i", pages));
        let first = stream.next().await.unwrap();
        assert_eq!(first.name(), "progress");
        drop(stream);

        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        let state = service.task_state("task_i").unwrap();
        assert!(!state.finished);
        assert!(stub.calls.lock().unwrap().len() < 10);
    }

    #[tokio::test]
    async fn test_regenerate_uses_stored_task_context() {
        let dir = tempfile::tempdir().unwrap();
        let stub = Arc::new(StubImage::default());
        let service = ImageService::new(
            factory_with(stub.clone()),
            Arc::new(NamedTemplates),
            Arc::new(LocalImageStore::new(dir.path())),
        );

        let request = ImageTaskRequest::new("task_j", vec![page(0, PageType::Content, "FAIL")])
            .with_full_outline("OUTLINE")
            .with_user_topic("food")
            .with_reference_images(vec![vec![7u8; 4]]);
        let _: Vec<GenerationEvent> = service.generate_images(request).collect().await;
        assert_eq!(service.task_state("task_j").unwrap().failed_indices(), vec![0]);

        let fixed = page(0, PageType::Content, "better");
        let regenerated = service
            .regenerate_image("task_j", &fixed, "", "", true)
            .await
            .unwrap();
        assert_eq!(
            regenerated,
            RegeneratedImage {
                index: 0,
                filename: "0.png".into(),
                image_url: "/api/images/task_j/0.png".into(),
            }
        );

        let (prompt, references) = stub.calls.lock().unwrap().last().cloned().unwrap();
        assert_eq!(prompt, "LONG content: better | OUTLINE | food");
        assert_eq!(references, 1);
        assert!(dir.path().join("task_j").join("0.png").exists());

        let state = service.task_state("task_j").unwrap();
        assert!(state.failed.is_empty());
        assert_eq!(state.generated[&0], "0.png");

        let err = service
            .regenerate_image("task_j", &page(0, PageType::Content, "FAIL"), "", "", false)
            .await
            .unwrap_err();
        assert!(matches!(err, GenerationError::ProviderError(_)));
    }
}
