//! Process instance aggregate.

use std::fmt;
use std::sync::Arc;

use tracing::debug;

use super::{ActivityRules, ActivityState, ModelError, ProcessDefinition, Temporal};
use crate::entity::{CorrelationKey, Entity, EntityId, KeyBinding};

/// Property name of the correlation key binding.
pub const CORRELATION_KEY_PROPERTY: &str = "correlation_key";

const PROCESS_INSTANCE_KEYS: &[KeyBinding<ProcessInstance>] = &[KeyBinding {
    property: CORRELATION_KEY_PROPERTY,
    column: "correlation_key",
    unique: true,
    get: |instance| {
        instance
            .correlation_key
            .as_ref()
            .map(|k| CorrelationKey::Text(k.clone()))
    },
    set: |instance, key| instance.correlation_key = Some(key.to_string()),
}];

/// One tracked occurrence of a monitored business process.
#[derive(Debug, Clone)]
pub struct ProcessInstance {
    id: Option<EntityId>,
    correlation_key: Option<String>,
    process_definition: Option<Arc<ProcessDefinition>>,
    activity_states: Vec<ActivityState>,
    temporal: Temporal,
}

impl ProcessInstance {
    /// New instance, started now.
    pub fn new() -> Self {
        Self::with_temporal(Temporal::started_now())
    }

    /// New instance following the given definition.
    pub fn for_definition(definition: Arc<ProcessDefinition>) -> Self {
        let mut instance = Self::new();
        instance.process_definition = Some(definition);
        instance
    }

    /// Instance with explicit timestamps, used when loading from storage.
    pub fn with_temporal(temporal: Temporal) -> Self {
        Self {
            id: None,
            correlation_key: None,
            process_definition: None,
            activity_states: Vec::new(),
            temporal,
        }
    }

    pub fn correlation_key(&self) -> Option<&str> {
        self.correlation_key.as_deref()
    }

    pub fn set_correlation_key(&mut self, correlation_key: impl Into<String>) {
        self.correlation_key = Some(correlation_key.into());
    }

    pub fn process_definition(&self) -> Option<&Arc<ProcessDefinition>> {
        self.process_definition.as_ref()
    }

    pub fn set_process_definition(&mut self, definition: Arc<ProcessDefinition>) {
        self.process_definition = Some(definition);
    }

    pub fn temporal(&self) -> &Temporal {
        &self.temporal
    }

    pub fn temporal_mut(&mut self) -> &mut Temporal {
        &mut self.temporal
    }

    pub fn activity_states(&self) -> &[ActivityState] {
        &self.activity_states
    }

    /// Mutable access for stores assigning child identities.
    pub fn activity_states_mut(&mut self) -> &mut [ActivityState] {
        &mut self.activity_states
    }

    /// Replace the owned states. At most one state per activity.
    pub fn set_activity_states(&mut self, states: Vec<ActivityState>) -> Result<(), ModelError> {
        for (i, state) in states.iter().enumerate() {
            if states[..i].iter().any(|s| s.activity() == state.activity()) {
                return Err(ModelError::DuplicateActivityState {
                    activity: state.activity().to_string(),
                });
            }
        }
        self.activity_states = states;
        Ok(())
    }

    /// Take ownership of one more state.
    pub fn add_activity_state(&mut self, state: ActivityState) -> Result<(), ModelError> {
        if self
            .activity_states
            .iter()
            .any(|s| s.activity() == state.activity())
        {
            return Err(ModelError::DuplicateActivityState {
                activity: state.activity().to_string(),
            });
        }
        self.activity_states.push(state);
        Ok(())
    }

    /// Returns the activity state for the given activity, if any.
    pub fn get_activity_state(&self, rules: &ActivityRules) -> Option<&ActivityState> {
        debug!(
            activity = %rules.name,
            states = self.activity_states.len(),
            "Searching activity states"
        );
        self.activity_states.iter().find(|s| s.is_activity(rules))
    }

    pub fn get_activity_state_mut(&mut self, rules: &ActivityRules) -> Option<&mut ActivityState> {
        self.activity_states
            .iter_mut()
            .find(|s| s.is_activity(rules))
    }

    /// Returns the state for the activity, creating it on first use.
    pub fn get_or_create_activity_state(&mut self, rules: &ActivityRules) -> &mut ActivityState {
        let index = match self.activity_states.iter().position(|s| s.is_activity(rules)) {
            Some(index) => index,
            None => {
                self.activity_states.push(ActivityState::new(rules));
                self.activity_states.len() - 1
            }
        };
        &mut self.activity_states[index]
    }
}

impl Default for ProcessInstance {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ProcessInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let id = self
            .id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "unsaved".to_string());
        write!(
            f,
            "ProcessInstance[id: {}, key: {}]",
            id,
            self.correlation_key.as_deref().unwrap_or("")
        )
    }
}

impl Entity for ProcessInstance {
    const ENTITY_NAME: &'static str = "process_instances";

    fn id(&self) -> Option<EntityId> {
        self.id
    }

    fn set_id(&mut self, id: EntityId) {
        self.id = Some(id);
    }

    fn key_bindings() -> &'static [KeyBinding<Self>] {
        PROCESS_INSTANCE_KEYS
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_instance_is_started_and_unsaved() {
        let before = chrono::Utc::now();
        let instance = ProcessInstance::new();
        assert!(instance.temporal().time_started >= before);
        assert!(!instance.temporal().is_completed());
        assert!(instance.id().is_none());
        assert_eq!(instance.to_string(), "ProcessInstance[id: unsaved, key: ]");
    }

    #[test]
    fn test_get_activity_state_returns_unique_match() {
        let shipment = ActivityRules::new("shipment");
        let invoice = ActivityRules::new("invoice");
        let mut instance = ProcessInstance::new();
        instance
            .add_activity_state(ActivityState::new(&shipment))
            .unwrap();
        instance
            .add_activity_state(ActivityState::new(&invoice))
            .unwrap();

        let found = instance.get_activity_state(&invoice).unwrap();
        assert_eq!(found.activity(), "invoice");
    }

    #[test]
    fn test_get_activity_state_not_found() {
        let mut instance = ProcessInstance::new();
        instance
            .add_activity_state(ActivityState::new(&ActivityRules::new("shipment")))
            .unwrap();

        assert!(instance
            .get_activity_state(&ActivityRules::new("invoice"))
            .is_none());
    }

    #[test]
    fn test_add_activity_state_rejects_duplicate_activity() {
        let rules = ActivityRules::new("shipment");
        let mut instance = ProcessInstance::new();
        instance.add_activity_state(ActivityState::new(&rules)).unwrap();

        let result = instance.add_activity_state(ActivityState::new(&rules));
        assert!(matches!(
            result,
            Err(ModelError::DuplicateActivityState { activity }) if activity == "shipment"
        ));
        assert_eq!(instance.activity_states().len(), 1);
    }

    #[test]
    fn test_set_activity_states_rejects_duplicates() {
        let rules = ActivityRules::new("shipment");
        let mut instance = ProcessInstance::new();
        let result = instance
            .set_activity_states(vec![ActivityState::new(&rules), ActivityState::new(&rules)]);
        assert!(result.is_err());
        assert!(instance.activity_states().is_empty());
    }

    #[test]
    fn test_get_or_create_activity_state_reuses_existing() {
        let rules = ActivityRules::new("shipment");
        let mut instance = ProcessInstance::new();

        instance
            .get_or_create_activity_state(&rules)
            .record_message(&rules, chrono::Utc::now());
        instance.get_or_create_activity_state(&rules);

        assert_eq!(instance.activity_states().len(), 1);
        assert_eq!(instance.activity_states()[0].received_message_count(), 1);
    }

    #[test]
    fn test_key_binding_writes_correlation_key() {
        let binding = ProcessInstance::key_binding(CORRELATION_KEY_PROPERTY).unwrap();
        let mut instance = ProcessInstance::new();
        (binding.set)(&mut instance, &CorrelationKey::from("ORDER-123"));

        assert_eq!(instance.correlation_key(), Some("ORDER-123"));
        assert_eq!(
            (binding.get)(&instance),
            Some(CorrelationKey::from("ORDER-123"))
        );
    }

    #[test]
    fn test_display_includes_id_and_key() {
        let mut instance = ProcessInstance::new();
        instance.set_id(7);
        instance.set_correlation_key("ORDER-123");
        assert_eq!(instance.to_string(), "ProcessInstance[id: 7, key: ORDER-123]");
    }
}
