//! Processor dispatch for correlated entities.
//!
//! A correlator hands each loaded entity to one [`EntityHandler`]. Entities
//! that consume messages themselves are wrapped in [`EntityAsProcessor`];
//! process instances are usually driven by an [`ActivityHandler`].

use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::debug;

use crate::entity::{MessageProcessor, ProcessingError};
use crate::model::{ActivityRules, ProcessDefinition, ProcessInstance};

/// Processes a message against a loaded entity.
///
/// Runs once per attempt of the unit of work. Under
/// [`ConflictPolicy::Retry`](crate::config::ConflictPolicy::Retry) a
/// conflicting attempt is rolled back and rerun on a freshly loaded entity,
/// so `handle` may be called more than once for one message while its
/// store changes commit exactly once. Side effects outside the entity must
/// tolerate repeats.
#[async_trait]
pub trait EntityHandler<E, M>: Send + Sync {
    async fn handle(&self, entity: &mut E, message: &M) -> Result<(), ProcessingError>;
}

/// Delegates to the entity's own [`MessageProcessor`] implementation.
pub struct EntityAsProcessor<E, M> {
    _marker: PhantomData<fn(&mut E, &M)>,
}

impl<E, M> EntityAsProcessor<E, M> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<E, M> Default for EntityAsProcessor<E, M> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<E, M> EntityHandler<E, M> for EntityAsProcessor<E, M>
where
    E: MessageProcessor<M> + Send,
    M: Sync,
{
    async fn handle(&self, entity: &mut E, message: &M) -> Result<(), ProcessingError> {
        entity.process(message).await
    }
}

/// Records each message on the process instance's state for one activity.
///
/// Attaches the process definition to instances that do not have one yet,
/// creates the activity state on first use and completes it once the
/// activity has received its expected number of messages.
pub struct ActivityHandler {
    definition: Arc<ProcessDefinition>,
    rules: ActivityRules,
}

impl ActivityHandler {
    pub fn new(definition: Arc<ProcessDefinition>, rules: ActivityRules) -> Self {
        Self { definition, rules }
    }

    pub fn rules(&self) -> &ActivityRules {
        &self.rules
    }
}

#[async_trait]
impl<M: Sync> EntityHandler<ProcessInstance, M> for ActivityHandler {
    async fn handle(
        &self,
        instance: &mut ProcessInstance,
        _message: &M,
    ) -> Result<(), ProcessingError> {
        if instance.process_definition().is_none() {
            instance.set_process_definition(self.definition.clone());
        }

        let state = instance.get_or_create_activity_state(&self.rules);
        state.record_message(&self.rules, Utc::now());

        debug!(
            activity = %self.rules.name,
            received = state.received_message_count(),
            completed = state.is_completed(),
            "Recorded activity message"
        );
        Ok(())
    }
}
