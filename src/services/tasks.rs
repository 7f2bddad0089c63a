use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::Arc;

/// What is known about one image task.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskState {
    /// Saved file name per page index.
    pub generated: BTreeMap<usize, String>,
    /// Last failure message per page index.
    pub failed: BTreeMap<usize, String>,
    pub full_outline: String,
    pub user_topic: String,
    pub reference_images: Vec<Vec<u8>>,
    pub finished: bool,
}

impl TaskState {
    pub fn failed_indices(&self) -> Vec<usize> {
        self.failed.keys().copied().collect()
    }
}

/// Process-wide map of task id to task state, shared by every clone.
#[derive(Debug, Clone, Default)]
pub struct TaskRegistry {
    inner: Arc<DashMap<String, TaskState>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(DashMap::new()),
        }
    }

    /// Registers a task, replacing any earlier state under the same id.
    pub fn start(
        &self,
        task_id: &str,
        full_outline: &str,
        user_topic: &str,
        reference_images: Vec<Vec<u8>>,
    ) {
        self.inner.insert(
            task_id.to_string(),
            TaskState {
                full_outline: full_outline.to_string(),
                user_topic: user_topic.to_string(),
                reference_images,
                ..TaskState::default()
            },
        );
    }

    pub fn record_success(&self, task_id: &str, index: usize, filename: &str) {
        let mut state = self.inner.entry(task_id.to_string()).or_default();
        state.failed.remove(&index);
        state.generated.insert(index, filename.to_string());
    }

    pub fn record_failure(&self, task_id: &str, index: usize, message: &str) {
        let mut state = self.inner.entry(task_id.to_string()).or_default();
        state.failed.insert(index, message.to_string());
    }

    pub fn mark_finished(&self, task_id: &str) {
        if let Some(mut state) = self.inner.get_mut(task_id) {
            state.finished = true;
        }
    }

    pub fn get(&self, task_id: &str) -> Option<TaskState> {
        self.inner.get(task_id).map(|state| state.value().clone())
    }

    pub fn reference_images(&self, task_id: &str) -> Vec<Vec<u8>> {
        self.inner
            .get(task_id)
            .map(|state| state.reference_images.clone())
            .unwrap_or_default()
    }

    pub fn remove(&self, task_id: &str) -> bool {
        self.inner.remove(task_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}
