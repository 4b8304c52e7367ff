use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::modules::location_session::DeliveryCompletion;
use crate::modules::position::Position;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskEvent {
    Started {
        task_id: String,
    },
    Accepted {
        task_id: String,
    },
    Rejected {
        task_id: String,
    },
    DeliveryCompleted {
        task_id: String,
        position: Position,
        tracked_for_secs: Option<i64>,
    },
}

impl TaskEvent {
    pub fn task_id(&self) -> &str {
        match self {
            TaskEvent::Started { task_id }
            | TaskEvent::Accepted { task_id }
            | TaskEvent::Rejected { task_id }
            | TaskEvent::DeliveryCompleted { task_id, .. } => task_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub recorded_at: DateTime<Utc>,
    pub event: TaskEvent,
}

/// In-memory log of task events. Nothing is persisted.
#[derive(Debug, Clone, Default)]
pub struct TaskStore {
    records: Arc<Mutex<Vec<TaskRecord>>>,
}

impl TaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record(&self, event: TaskEvent) {
        log::info!("Task {} event recorded", event.task_id());
        self.records.lock().await.push(TaskRecord {
            recorded_at: Utc::now(),
            event,
        });
    }

    pub async fn record_completion(&self, task_id: &str, completion: &DeliveryCompletion) {
        self.record(TaskEvent::DeliveryCompleted {
            task_id: task_id.to_string(),
            position: completion.position.clone(),
            tracked_for_secs: completion.tracked_for_secs,
        })
        .await;
    }

    pub async fn history(&self, task_id: &str) -> Vec<TaskRecord> {
        self.records
            .lock()
            .await
            .iter()
            .filter(|record| record.event.task_id() == task_id)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::position::{PositionId, Reading};

    fn completion() -> DeliveryCompletion {
        let reading = Reading::new(40.0, -73.0, Utc::now());
        DeliveryCompletion {
            position: Position::from_reading(PositionId(1), &reading, None).unwrap(),
            completed_at: Utc::now(),
            tracked_for_secs: Some(42),
        }
    }

    #[tokio::test]
    async fn records_events_per_task() {
        let store = TaskStore::new();
        store.record(TaskEvent::Accepted { task_id: "T-1".into() }).await;
        store.record(TaskEvent::Started { task_id: "T-1".into() }).await;
        store.record(TaskEvent::Rejected { task_id: "T-2".into() }).await;

        let history = store.history("T-1").await;
        assert_eq!(history.len(), 2);
        assert!(matches!(history[0].event, TaskEvent::Accepted { .. }));
        assert!(store.history("T-3").await.is_empty());
    }

    #[tokio::test]
    async fn completion_carries_final_position() {
        let store = TaskStore::new();
        store.record_completion("T-9", &completion()).await;

        let history = store.history("T-9").await;
        assert_eq!(history.len(), 1);
        match &history[0].event {
            TaskEvent::DeliveryCompleted {
                position,
                tracked_for_secs,
                ..
            } => {
                assert_eq!(position.latitude, 40.0);
                assert_eq!(*tracked_for_secs, Some(42));
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn events_serialize_with_type_tag() {
        let json = serde_json::to_value(TaskEvent::Started { task_id: "T-3".into() }).unwrap();
        assert_eq!(json["type"], "started");
        assert_eq!(json["task_id"], "T-3");
    }
}
