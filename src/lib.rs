//! Topic-to-illustrated-pages generation pipeline.
//!
//! [`OutlineService`] asks the active text provider for a page outline and
//! parses it into [`Page`]s. [`ImageService`] renders those pages one by one
//! through the active image provider, saving each image under the history
//! directory and streaming [`GenerationEvent`]s back to the caller.

pub mod compress;
pub mod config;
pub mod error;
pub mod logger;
pub mod models;
pub mod providers;
pub mod services;
pub mod storage;
pub mod templates;

pub use config::{
    AppConfig, PersistFailurePolicy, ProviderGroupConfig, ProviderSettings, RetryPolicy,
};
pub use error::{GenerationError, Result};
pub use models::{
    FinishSummary, GenerationEvent, ImageGenerationOptions, OutlineResult, Page, PageType,
    TextGenerationOptions,
};
pub use providers::{
    GeminiProvider, ImageProvider, OpenAiCompatibleProvider, ProviderFactory, TextProvider,
};
pub use services::{ImageService, ImageTaskRequest, OutlineService, RegeneratedImage, TaskState};
pub use storage::{ImageStore, LocalImageStore};
pub use templates::{BuiltinTemplates, FileTemplateStore, TemplateName, TemplateStore};
