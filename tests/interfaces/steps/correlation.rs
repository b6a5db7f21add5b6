//! Correlation interface step definitions.

use std::sync::Arc;

use bam::config::{ConflictPolicy, CorrelationConfig, RetryConfig};
use bam::correlation::{ActivityHandler, Correlator, CorrelatorBuilder, ProcessOutcome};
use bam::message::{HeaderKey, Message};
use bam::model::{ActivityRules, ProcessDefinition, ProcessInstance, CORRELATION_KEY_PROPERTY};
use bam::storage::EntityStore;
use bam::{CorrelationKey, Entity, FindByKeyQuery};
use cucumber::{given, then, when, World};

use crate::backend::{StorageBackend, StorageContext};

const KEY_HEADER: &str = "orderId";

/// Test context for correlation scenarios.
#[derive(World)]
#[world(init = Self::new)]
pub struct CorrelationWorld {
    backend: StorageBackend,
    context: Option<StorageContext>,
    correlator: Option<Arc<Correlator<ProcessInstance, Message>>>,
    rules: Option<ActivityRules>,
    last_key: Option<String>,
    outcomes: Vec<ProcessOutcome<ProcessInstance>>,
    last_error: Option<String>,
}

impl std::fmt::Debug for CorrelationWorld {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CorrelationWorld")
            .field("backend", &self.backend)
            .field("context", &self.context)
            .field("rules", &self.rules)
            .field("last_key", &self.last_key)
            .field("outcomes", &self.outcomes.len())
            .field("last_error", &self.last_error)
            .finish()
    }
}

impl CorrelationWorld {
    fn new() -> Self {
        Self {
            backend: StorageBackend::from_env(),
            context: None,
            correlator: None,
            rules: None,
            last_key: None,
            outcomes: Vec::new(),
            last_error: None,
        }
    }

    fn context(&self) -> &StorageContext {
        self.context
            .as_ref()
            .expect("Storage context not initialized")
    }

    fn correlator(&self) -> Arc<Correlator<ProcessInstance, Message>> {
        self.correlator
            .clone()
            .expect("Correlator not configured")
    }

    fn rules(&self, activity: &str) -> ActivityRules {
        let rules = self.rules.clone().expect("Activity not configured");
        assert_eq!(rules.name, activity, "Scenario monitors a different activity");
        rules
    }

    fn build_correlator(&mut self, rules: ActivityRules, policy: ConflictPolicy) {
        let correlator = CorrelatorBuilder::<ProcessInstance, Message>::new(
            self.context().store.clone(),
            Arc::new(HeaderKey(KEY_HEADER.to_string())),
        )
        .config(CorrelationConfig {
            conflict_policy: policy,
            retry: RetryConfig {
                min_delay_ms: 2,
                max_delay_ms: 50,
                max_times: 20,
            },
            ..CorrelationConfig::default()
        })
        .handler(ActivityHandler::new(
            Arc::new(ProcessDefinition::new("orders")),
            rules.clone(),
        ))
        .build()
        .expect("Failed to build correlator");

        self.rules = Some(rules);
        self.correlator = Some(Arc::new(correlator));
    }

    fn record(
        &mut self,
        result: Result<ProcessOutcome<ProcessInstance>, bam::CorrelationError>,
    ) {
        match result {
            Ok(outcome) => self.outcomes.push(outcome),
            Err(e) => self.last_error = Some(e.to_string()),
        }
    }

    fn last_outcome(&self) -> &ProcessOutcome<ProcessInstance> {
        if let Some(error) = &self.last_error {
            panic!("Correlation failed: {error}");
        }
        self.outcomes.last().expect("No message was correlated")
    }

    /// Reload the instance stored under the last key.
    async fn stored_instance(&self) -> ProcessInstance {
        let key = self.last_key.clone().expect("No message was sent");
        let binding = ProcessInstance::key_binding(CORRELATION_KEY_PROPERTY)
            .expect("Correlation key binding");
        let mut tx = self
            .context()
            .store
            .begin()
            .await
            .expect("Failed to begin transaction");
        let mut found = tx
            .find(
                &FindByKeyQuery::for_binding(&binding),
                &CorrelationKey::from(key),
            )
            .await
            .expect("Failed to find process instance");
        tx.rollback().await.expect("Failed to roll back");
        assert_eq!(found.len(), 1, "Expected exactly one stored instance");
        found.remove(0)
    }
}

fn order_message(key: &str) -> Message {
    Message::default().with_header(KEY_HEADER, key)
}

// --- Background ---

#[given("a process instance store")]
async fn given_store(world: &mut CorrelationWorld) {
    println!("Using backend: {}", world.backend.name());
    world.context = Some(StorageContext::new(world.backend).await);
}

// --- Given steps ---

#[given(expr = "a stored process instance with id {int} and correlation key {string}")]
async fn given_stored_instance(world: &mut CorrelationWorld, id: i64, key: String) {
    world.context().seed(id, &key).await;
}

#[given(expr = "a correlator recording activity {string}")]
async fn given_correlator(world: &mut CorrelationWorld, activity: String) {
    world.build_correlator(ActivityRules::new(activity), ConflictPolicy::Retry);
}

#[given(expr = "a correlator recording activity {string} expecting {int} messages")]
async fn given_correlator_expecting(world: &mut CorrelationWorld, activity: String, expected: u32) {
    world.build_correlator(
        ActivityRules::new(activity).with_expected_messages(expected),
        ConflictPolicy::Retry,
    );
}

#[given(expr = "a correlator recording activity {string} with the {word} conflict policy")]
async fn given_correlator_with_policy(world: &mut CorrelationWorld, activity: String, policy: String) {
    let policy = match policy.as_str() {
        "retry" => ConflictPolicy::Retry,
        "lock" => ConflictPolicy::Lock,
        other => panic!("Unknown conflict policy: {other}"),
    };
    world.build_correlator(ActivityRules::new(activity), policy);
}

#[given("a correlator without a processor")]
async fn given_correlator_without_processor(world: &mut CorrelationWorld) {
    let correlator = Correlator::<ProcessInstance, Message>::new(
        world.context().store.clone(),
        Arc::new(HeaderKey(KEY_HEADER.to_string())),
    )
    .expect("Failed to build correlator");
    world.correlator = Some(Arc::new(correlator));
}

// --- When steps ---

#[when(expr = "a message with correlation key {string} arrives")]
async fn when_message_arrives(world: &mut CorrelationWorld, key: String) {
    let result = world.correlator().process(&order_message(&key)).await;
    world.last_key = Some(key);
    world.record(result);
}

#[when("a message without a correlation key arrives")]
async fn when_message_without_key_arrives(world: &mut CorrelationWorld) {
    let result = world.correlator().process(&Message::default()).await;
    world.record(result);
}

#[when(expr = "{int} messages with correlation key {string} arrive one after another")]
async fn when_messages_arrive_sequentially(world: &mut CorrelationWorld, count: u32, key: String) {
    let correlator = world.correlator();
    for _ in 0..count {
        let result = correlator.process(&order_message(&key)).await;
        world.record(result);
    }
    world.last_key = Some(key);
}

#[when(expr = "{int} messages with correlation key {string} arrive concurrently")]
async fn when_messages_arrive_concurrently(world: &mut CorrelationWorld, count: u32, key: String) {
    let tasks: Vec<_> = (0..count)
        .map(|_| {
            let correlator = world.correlator();
            let message = order_message(&key);
            tokio::spawn(async move { correlator.process(&message).await })
        })
        .collect();

    for joined in futures::future::join_all(tasks).await {
        let result = joined.expect("Correlation task panicked");
        world.record(result);
    }
    world.last_key = Some(key);
}

// --- Then steps ---

#[then("a new process instance is created")]
async fn then_instance_created(world: &mut CorrelationWorld) {
    let outcome = world.last_outcome();
    assert!(outcome.created, "Expected a new process instance");
    assert!(outcome.entity.id().is_some(), "New instance must be persisted");
}

#[then(expr = "the process instance has correlation key {string}")]
async fn then_instance_has_key(world: &mut CorrelationWorld, key: String) {
    assert_eq!(world.last_outcome().entity.correlation_key(), Some(key.as_str()));
    assert_eq!(world.stored_instance().await.correlation_key(), Some(key.as_str()));
}

#[then(expr = "the process instance with id {int} is used")]
async fn then_instance_with_id_used(world: &mut CorrelationWorld, id: i64) {
    let outcome = world.last_outcome();
    assert!(!outcome.created, "Expected the stored instance to be reused");
    assert_eq!(outcome.entity.id(), Some(id));
}

#[then(expr = "the store holds {int} process instance(s)")]
async fn then_store_holds(world: &mut CorrelationWorld, count: usize) {
    assert_eq!(world.context().count().await, count);
}

#[then("every message resolved to the same process instance")]
async fn then_same_instance(world: &mut CorrelationWorld) {
    assert!(world.last_error.is_none(), "Correlation failed: {:?}", world.last_error);
    let first = world.outcomes.first().expect("No message was correlated");
    assert!(world
        .outcomes
        .iter()
        .all(|o| o.entity.id() == first.entity.id()));
}

#[then(expr = "exactly {int} message created the process instance")]
async fn then_created_count(world: &mut CorrelationWorld, count: usize) {
    assert_eq!(world.outcomes.iter().filter(|o| o.created).count(), count);
}

#[then(expr = "the activity {string} has received {int} message(s)")]
async fn then_activity_received(world: &mut CorrelationWorld, activity: String, count: u32) {
    let rules = world.rules(&activity);
    let instance = world.stored_instance().await;
    let state = instance
        .get_activity_state(&rules)
        .expect("Activity state missing");
    assert_eq!(state.received_message_count(), count);
}

#[then(expr = "the activity {string} is completed")]
async fn then_activity_completed(world: &mut CorrelationWorld, activity: String) {
    let rules = world.rules(&activity);
    let instance = world.stored_instance().await;
    assert!(instance
        .get_activity_state(&rules)
        .is_some_and(|state| state.is_completed()));
}

#[then(expr = "the activity {string} is not completed")]
async fn then_activity_not_completed(world: &mut CorrelationWorld, activity: String) {
    let rules = world.rules(&activity);
    let instance = world.stored_instance().await;
    assert!(!instance
        .get_activity_state(&rules)
        .is_some_and(|state| state.is_completed()));
}

#[then(expr = "correlation fails with {string}")]
async fn then_correlation_fails(world: &mut CorrelationWorld, message: String) {
    assert_eq!(world.last_error.as_deref(), Some(message.as_str()));
}
