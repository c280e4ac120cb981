//! Backlog data model: an ordered list of task items with pass/fail tracking.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Lifecycle status of a task item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Passed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Passed => "passed",
            TaskStatus::Failed => "failed",
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TaskItem {
    pub id: String,
    pub description: String,
    /// Lower values are selected first; ties fall back to file order.
    #[serde(default)]
    pub priority: i64,
    pub status: TaskStatus,
    /// Failed attempts since the item last passed.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub consecutive_failures: u32,
    /// Author-supplied fields the runner does not interpret, kept verbatim.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn is_zero(value: &u32) -> bool {
    *value == 0
}

impl TaskItem {
    pub fn new(id: impl Into<String>, description: impl Into<String>, priority: i64) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            priority,
            status: TaskStatus::Pending,
            consecutive_failures: 0,
            extra: Map::new(),
        }
    }

    /// Apply a status transition, maintaining the failure streak.
    pub fn transition(&mut self, status: TaskStatus) {
        match status {
            TaskStatus::Passed => self.consecutive_failures = 0,
            TaskStatus::Failed => {
                self.consecutive_failures = self.consecutive_failures.saturating_add(1);
            }
            TaskStatus::Pending => {}
        }
        self.status = status;
    }
}

/// Ordered backlog as persisted on disk (a JSON array of items).
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct Backlog {
    items: Vec<TaskItem>,
}

impl Backlog {
    pub fn new(items: Vec<TaskItem>) -> Self {
        Self { items }
    }

    pub fn items(&self) -> &[TaskItem] {
        &self.items
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn get(&self, id: &str) -> Option<&TaskItem> {
        self.items.iter().find(|item| item.id == id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut TaskItem> {
        self.items.iter_mut().find(|item| item.id == id)
    }

    /// True when every item has passed. An empty backlog counts as passed.
    pub fn all_passed(&self) -> bool {
        self.items
            .iter()
            .all(|item| item.status == TaskStatus::Passed)
    }

    pub fn count(&self, status: TaskStatus) -> usize {
        self.items.iter().filter(|item| item.status == status).count()
    }

    /// Ids of failed items, in file order.
    pub fn failed_ids(&self) -> Vec<String> {
        self.items
            .iter()
            .filter(|item| item.status == TaskStatus::Failed)
            .map(|item| item.id.clone())
            .collect()
    }
}
