use serde::Serialize;
use serde_json::{json, Value};

pub const PHASE_CONTENT: &str = "content";

/// Summary attached to the terminal `finish` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FinishSummary {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub failed_indices: Vec<usize>,
}

/// One item of an image task's event stream.
#[derive(Debug, Clone, PartialEq)]
pub enum GenerationEvent {
    Progress {
        index: usize,
        current: usize,
        total: usize,
    },
    Error {
        index: usize,
        message: String,
    },
    Complete {
        index: usize,
        image_url: String,
    },
    Finish {
        task_id: String,
        summary: FinishSummary,
    },
}

impl GenerationEvent {
    /// Event name used by transports (`progress`, `error`, `complete`, `finish`).
    pub fn name(&self) -> &'static str {
        match self {
            GenerationEvent::Progress { .. } => "progress",
            GenerationEvent::Error { .. } => "error",
            GenerationEvent::Complete { .. } => "complete",
            GenerationEvent::Finish { .. } => "finish",
        }
    }

    pub fn index(&self) -> Option<usize> {
        match self {
            GenerationEvent::Progress { index, .. }
            | GenerationEvent::Error { index, .. }
            | GenerationEvent::Complete { index, .. } => Some(*index),
            GenerationEvent::Finish { .. } => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, GenerationEvent::Finish { .. })
    }

    /// The JSON payload a transport writes next to the event name.
    pub fn payload(&self) -> Value {
        match self {
            GenerationEvent::Progress {
                index,
                current,
                total,
            } => json!({
                "index": index,
                "status": "generating",
                "current": current,
                "total": total,
                "phase": PHASE_CONTENT,
            }),
            GenerationEvent::Error { index, message } => json!({
                "index": index,
                "status": "error",
                "message": message,
                "phase": PHASE_CONTENT,
            }),
            GenerationEvent::Complete { index, image_url } => json!({
                "index": index,
                "status": "done",
                "image_url": image_url,
                "phase": PHASE_CONTENT,
            }),
            // A finish is always reported as a success; page failures only
            // show up through their own error events and the counters.
            GenerationEvent::Finish { task_id, summary } => json!({
                "success": true,
                "task_id": task_id,
                "total": summary.total,
                "completed": summary.completed,
                "failed": summary.failed,
                "failed_indices": summary.failed_indices,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_payload() {
        let event = GenerationEvent::Progress {
            index: 2,
            current: 3,
            total: 5,
        };
        assert_eq!(event.name(), "progress");
        assert_eq!(
            event.payload(),
            json!({"index": 2, "status": "generating", "current": 3, "total": 5, "phase": "content"})
        );
    }

    #[test]
    fn test_finish_is_terminal_and_successful() {
        let event = GenerationEvent::Finish {
            task_id: "task_1".into(),
            summary: FinishSummary {
                total: 2,
                completed: 1,
                failed: 1,
                failed_indices: vec![1],
            },
        };
        assert!(event.is_terminal());
        assert_eq!(event.index(), None);
        let payload = event.payload();
        assert_eq!(payload["success"], true);
        assert_eq!(payload["task_id"], "task_1");
        assert_eq!(payload["failed_indices"], json!([1]));
    }
}
