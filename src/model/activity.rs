//! Activity definitions and per-instance activity progress.

use chrono::{DateTime, Utc};

use super::Temporal;
use crate::entity::EntityId;

/// Definition of one monitored activity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivityRules {
    /// Activity name, unique within a process definition.
    pub name: String,
    /// Messages the activity must receive before it counts as completed.
    pub expected_messages: u32,
}

impl ActivityRules {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            expected_messages: 1,
        }
    }

    pub fn with_expected_messages(mut self, expected_messages: u32) -> Self {
        self.expected_messages = expected_messages;
        self
    }
}

/// Progress of one activity within one process instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivityState {
    id: Option<EntityId>,
    activity: String,
    received_message_count: u32,
    temporal: Temporal,
}

impl ActivityState {
    /// Fresh state for the given activity, started now.
    pub fn new(rules: &ActivityRules) -> Self {
        Self::restore(None, rules.name.clone(), 0, Temporal::started_now())
    }

    /// Rebuild a state loaded from storage.
    pub fn restore(
        id: Option<EntityId>,
        activity: String,
        received_message_count: u32,
        temporal: Temporal,
    ) -> Self {
        Self {
            id,
            activity,
            received_message_count,
            temporal,
        }
    }

    pub fn id(&self) -> Option<EntityId> {
        self.id
    }

    pub fn set_id(&mut self, id: EntityId) {
        self.id = Some(id);
    }

    pub fn activity(&self) -> &str {
        &self.activity
    }

    pub fn received_message_count(&self) -> u32 {
        self.received_message_count
    }

    pub fn temporal(&self) -> &Temporal {
        &self.temporal
    }

    pub fn is_completed(&self) -> bool {
        self.temporal.is_completed()
    }

    /// Whether this state tracks the given activity.
    pub fn is_activity(&self, rules: &ActivityRules) -> bool {
        self.activity == rules.name
    }

    /// Record one received message, completing the activity once the
    /// expected count is reached.
    pub fn record_message(&mut self, rules: &ActivityRules, at: DateTime<Utc>) {
        self.received_message_count = self.received_message_count.saturating_add(1);
        if self.received_message_count >= rules.expected_messages {
            self.temporal.complete(at);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_activity_matches_by_name() {
        let rules = ActivityRules::new("shipment");
        let state = ActivityState::new(&rules);
        assert!(state.is_activity(&rules));
        assert!(!state.is_activity(&ActivityRules::new("invoice")));
    }

    #[test]
    fn test_record_message_completes_at_expected_count() {
        let rules = ActivityRules::new("shipment").with_expected_messages(2);
        let mut state = ActivityState::new(&rules);

        state.record_message(&rules, Utc::now());
        assert_eq!(state.received_message_count(), 1);
        assert!(!state.is_completed());

        state.record_message(&rules, Utc::now());
        assert_eq!(state.received_message_count(), 2);
        assert!(state.is_completed());
    }
}
