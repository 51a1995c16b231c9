//! Jobs whose retries ran out, kept for operators to inspect or requeue.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::JobId;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    pub job_id: JobId,
    pub queue: String,
    pub payload: Value,
    pub error: String,
    pub attempts: u32,
    pub dead_lettered_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct DeadLetterQueue {
    entries: Mutex<Vec<DeadLetterEntry>>,
}

impl DeadLetterQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, entry: DeadLetterEntry) {
        self.entries.lock().push(entry);
    }

    /// Oldest first
    pub fn list(&self) -> Vec<DeadLetterEntry> {
        self.entries.lock().clone()
    }

    pub fn take(&self, job_id: JobId) -> Option<DeadLetterEntry> {
        let mut entries = self.entries.lock();
        let position = entries.iter().position(|entry| entry.job_id == job_id)?;
        Some(entries.remove(position))
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
