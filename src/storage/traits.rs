use crate::error::Result;
use async_trait::async_trait;
use std::path::PathBuf;

/// Durable storage for generated page images, keyed by task id and file name.
#[async_trait]
pub trait ImageStore: Send + Sync {
    /// Writes the whole file, creating the task directory when absent.
    async fn save(&self, task_id: &str, filename: &str, data: &[u8]) -> Result<PathBuf>;
}
