//! Start/completion timestamps shared by process and activity records.

use chrono::{DateTime, Utc};

/// Temporal bookkeeping for a tracked record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Temporal {
    pub time_started: DateTime<Utc>,
    pub time_completed: Option<DateTime<Utc>>,
}

impl Temporal {
    /// Start tracking now.
    pub fn started_now() -> Self {
        Self::started_at(Utc::now())
    }

    pub fn started_at(time_started: DateTime<Utc>) -> Self {
        Self {
            time_started,
            time_completed: None,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.time_completed.is_some()
    }

    /// Mark completion. The first completion instant is kept.
    pub fn complete(&mut self, at: DateTime<Utc>) {
        if self.time_completed.is_none() {
            self.time_completed = Some(at);
        }
    }
}

impl Default for Temporal {
    fn default() -> Self {
        Self::started_now()
    }
}
