use crate::error::{GenerationError, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TemplateName {
    Outline,
    ImagePrompt,
    ImagePromptShort,
}

impl TemplateName {
    pub fn file_name(&self) -> &'static str {
        match self {
            TemplateName::Outline => "outline_prompt.txt",
            TemplateName::ImagePrompt => "image_prompt.txt",
            TemplateName::ImagePromptShort => "image_prompt_short.txt",
        }
    }
}

pub trait TemplateStore: Send + Sync {
    fn load(&self, name: TemplateName) -> Result<String>;
}

/// Prompt texts compiled into the binary.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinTemplates;

impl TemplateStore for BuiltinTemplates {
    fn load(&self, name: TemplateName) -> Result<String> {
        let text = match name {
            TemplateName::Outline => include_str!("../prompts/outline_prompt.txt"),
            TemplateName::ImagePrompt => include_str!("../prompts/image_prompt.txt"),
            TemplateName::ImagePromptShort => include_str!("../prompts/image_prompt_short.txt"),
        };
        Ok(text.to_string())
    }
}

/// Reads templates from the first directory that holds the requested file.
pub struct FileTemplateStore {
    search_dirs: Vec<PathBuf>,
    fallback: Option<Arc<dyn TemplateStore>>,
}

impl FileTemplateStore {
    pub fn new(search_dirs: Vec<PathBuf>) -> Self {
        Self {
            search_dirs,
            fallback: None,
        }
    }

    /// Standard lookup order: the configured directory, then `prompts/` and
    /// `backend/prompts/` relative to the working directory.
    pub fn with_default_dirs(prompts_dir: Option<&Path>) -> Self {
        let mut dirs = Vec::new();
        if let Some(dir) = prompts_dir {
            dirs.push(dir.to_path_buf());
        }
        dirs.push(PathBuf::from("prompts"));
        dirs.push(PathBuf::from("backend/prompts"));
        Self::new(dirs)
    }

    pub fn with_fallback(mut self, fallback: Arc<dyn TemplateStore>) -> Self {
        self.fallback = Some(fallback);
        self
    }
}

impl TemplateStore for FileTemplateStore {
    fn load(&self, name: TemplateName) -> Result<String> {
        for dir in &self.search_dirs {
            let path = dir.join(name.file_name());
            if let Ok(content) = std::fs::read_to_string(&path) {
                log::debug!("Loaded template {}", path.display());
                return Ok(content);
            }
        }
        match &self.fallback {
            Some(fallback) => fallback.load(name),
            None => Err(GenerationError::TemplateNotFound(
                name.file_name().to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_templates_have_placeholders() {
        let outline = BuiltinTemplates.load(TemplateName::Outline).unwrap();
        assert!(outline.contains("{topic}"));
        assert!(outline.contains("<page>"));

        let image = BuiltinTemplates.load(TemplateName::ImagePrompt).unwrap();
        for placeholder in ["{page_content}", "{page_type}", "{full_outline}", "{user_topic}"] {
            assert!(image.contains(placeholder), "missing {}", placeholder);
        }
    }

    #[test]
    fn test_file_store_prefers_first_directory() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        std::fs::write(second.path().join("outline_prompt.txt"), "second {topic}").unwrap();
        std::fs::write(first.path().join("outline_prompt.txt"), "first {topic}").unwrap();

        let store = FileTemplateStore::new(vec![
            first.path().to_path_buf(),
            second.path().to_path_buf(),
        ]);
        assert_eq!(store.load(TemplateName::Outline).unwrap(), "first {topic}");
    }

    #[test]
    fn test_file_store_not_found_and_fallback() {
        let empty = tempfile::tempdir().unwrap();
        let store = FileTemplateStore::new(vec![empty.path().to_path_buf()]);
        assert!(matches!(
            store.load(TemplateName::ImagePrompt),
            Err(GenerationError::TemplateNotFound(_))
        ));

        let store = store.with_fallback(Arc::new(BuiltinTemplates));
        assert!(store.load(TemplateName::ImagePrompt).is_ok());
    }
}
