use crate::{
    error::{GenerationError, Result},
    storage::traits::ImageStore,
};
use async_trait::async_trait;
use std::path::PathBuf;

/// Stores task images under `<root>/<task_id>/<filename>`.
#[derive(Debug, Clone)]
pub struct LocalImageStore {
    root: PathBuf,
}

impl LocalImageStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn task_dir(&self, task_id: &str) -> Result<PathBuf> {
        check_component("task id", task_id)?;
        Ok(self.root.join(task_id))
    }

    fn file_path(&self, task_id: &str, filename: &str) -> Result<PathBuf> {
        check_component("file name", filename)?;
        Ok(self.task_dir(task_id)?.join(filename))
    }
}

// Task ids come from callers; keep every write inside the root.
fn check_component(what: &str, value: &str) -> Result<()> {
    let bad = value.is_empty()
        || value == "."
        || value == ".."
        || value.contains(['/', '\\'])
        || value.contains('\0');
    if bad {
        return Err(GenerationError::StorageError(format!(
            "Invalid {}: {:?}",
            what, value
        )));
    }
    Ok(())
}

#[async_trait]
impl ImageStore for LocalImageStore {
    async fn save(&self, task_id: &str, filename: &str, data: &[u8]) -> Result<PathBuf> {
        let dir = self.task_dir(task_id)?;
        let path = self.file_path(task_id, filename)?;

        tokio::fs::create_dir_all(&dir).await.map_err(|e| {
            GenerationError::StorageError(format!("Cannot create {}: {}", dir.display(), e))
        })?;
        tokio::fs::write(&path, data).await.map_err(|e| {
            GenerationError::StorageError(format!("Cannot write {}: {}", path.display(), e))
        })?;

        log::debug!("Saved {} bytes to {}", data.len(), path.display());
        Ok(path)
    }
}
