//! Message-to-entity correlation.
//!
//! A [`Correlator`] computes a correlation key for each inbound message,
//! loads the entity stored under that key (creating and persisting one on
//! a miss) and hands the message to the configured processor, all inside
//! one store transaction.
//!
//! - `query`: the find-by-key query
//! - `dispatch`: processor capabilities (entity-as-processor, handlers)
//! - `locks`: per-key locks for the `lock` conflict policy

mod dispatch;
mod locks;
mod query;


pub use dispatch::{ActivityHandler, EntityAsProcessor, EntityHandler};
pub use locks::{KeyLockGuard, KeyLocks};
pub use query::FindByKeyQuery;

use std::sync::{Arc, OnceLock};

use backon::{BackoffBuilder, ExponentialBuilder};
use tracing::{debug, error, info, warn};

use crate::config::{ConfigError, ConflictPolicy, CorrelationConfig};
use crate::entity::{
    CorrelationKey, DefaultEntityFactory, Entity, EntityFactory, KeyBinding, MessageProcessor,
    ProcessingError,
};
use crate::message::KeyExtractor;
use crate::model::ModelError;
use crate::storage::{EntityStore, EntityTransaction, StorageError};
use crate::utils::retry::{conflict_backoff, is_retryable};
use crate::validation::{self, ValidationError};

/// Errors raised while correlating a message.
#[derive(Debug, thiserror::Error)]
pub enum CorrelationError {
    #[error("Message carries no correlation key")]
    MissingCorrelationKey,

    #[error("Invalid correlation key: {0}")]
    InvalidCorrelationKey(#[from] ValidationError),

    #[error("No processor defined for this route")]
    NoProcessor,

    #[error("Correlation key {key} matches {count} entities")]
    DuplicateEntities { key: String, count: usize },

    #[error("Processing failed: {0}")]
    Processing(#[source] ProcessingError),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Result of [`Correlator::load_entity`].
#[derive(Debug, Clone)]
pub struct LoadedEntity<E> {
    pub entity: E,
    /// True when no stored entity matched and this one was persisted.
    pub created: bool,
}

/// Result of [`Correlator::process`].
#[derive(Debug, Clone)]
pub struct ProcessOutcome<E> {
    pub key: CorrelationKey,
    /// Entity as committed.
    pub entity: E,
    pub created: bool,
    /// Units of work run, including conflict retries.
    pub attempts: u32,
}

/// Loads or creates the entity addressed by each message and dispatches
/// the message to it.
pub struct Correlator<E: Entity, M> {
    store: Arc<dyn EntityStore<E>>,
    extractor: Arc<dyn KeyExtractor<M>>,
    factory: Arc<dyn EntityFactory<E, M>>,
    handler: Option<Arc<dyn EntityHandler<E, M>>>,
    key_binding: KeyBinding<E>,
    find_by_key_query: OnceLock<FindByKeyQuery>,
    conflict_policy: ConflictPolicy,
    strict_uniqueness: bool,
    backoff: ExponentialBuilder,
    locks: KeyLocks,
}

impl<E, M> Correlator<E, M>
where
    E: Entity + Default,
    M: Send + Sync + 'static,
{
    /// Correlator with defaults: default key property, default factory,
    /// retry policy and no processor.
    ///
    /// Messages fail with [`CorrelationError::NoProcessor`] until a handler
    /// is configured; prefer [`CorrelatorBuilder`], which rejects that at
    /// build time.
    pub fn new(
        store: Arc<dyn EntityStore<E>>,
        extractor: Arc<dyn KeyExtractor<M>>,
    ) -> Result<Self, ConfigError> {
        CorrelatorBuilder::new(store, extractor).build_unchecked()
    }
}

impl<E, M> Correlator<E, M>
where
    E: Entity,
    M: Send + Sync + 'static,
{
    pub fn key_binding(&self) -> &KeyBinding<E> {
        &self.key_binding
    }

    pub fn conflict_policy(&self) -> ConflictPolicy {
        self.conflict_policy
    }

    /// The find-by-key query, derived on first use from the entity and key
    /// binding unless it was set explicitly.
    pub fn find_by_key_query(&self) -> &FindByKeyQuery {
        self.find_by_key_query
            .get_or_init(|| FindByKeyQuery::for_binding(&self.key_binding))
    }

    /// Replace the find-by-key query. Only effective before first use.
    pub fn set_find_by_key_query(&self, query: FindByKeyQuery) -> bool {
        self.find_by_key_query.set(query).is_ok()
    }

    /// Find the entity stored under `key`, or create and persist one.
    pub async fn load_entity(
        &self,
        tx: &mut dyn EntityTransaction<E>,
        message: &M,
        key: &CorrelationKey,
    ) -> Result<LoadedEntity<E>, CorrelationError> {
        let query = self.find_by_key_query();
        let found = tx.find(query, key).await?;

        if found.len() > 1 {
            if self.strict_uniqueness {
                return Err(CorrelationError::DuplicateEntities {
                    key: key.to_string(),
                    count: found.len(),
                });
            }
            warn!(
                entity = E::ENTITY_NAME,
                %key,
                count = found.len(),
                "Correlation key matches several entities, using the first"
            );
        }

        if let Some(entity) = found.into_iter().next() {
            debug!(entity = E::ENTITY_NAME, %key, id = ?entity.id(), "Found entity");
            return Ok(LoadedEntity {
                entity,
                created: false,
            });
        }

        let mut entity = self.factory.create(message, key);
        (self.key_binding.set)(&mut entity, key);
        tx.persist(&mut entity).await?;
        info!(entity = E::ENTITY_NAME, %key, id = ?entity.id(), "Created entity");

        Ok(LoadedEntity {
            entity,
            created: true,
        })
    }

    /// Hand the message to the configured processor.
    pub async fn process_entity(&self, message: &M, entity: &mut E) -> Result<(), CorrelationError> {
        let handler = self.handler.as_ref().ok_or(CorrelationError::NoProcessor)?;
        handler
            .handle(entity, message)
            .await
            .map_err(CorrelationError::Processing)
    }

    /// Correlate one message: load or create its entity, process it and
    /// commit, rolling back on any failure.
    ///
    /// Under [`ConflictPolicy::Retry`] a storage conflict reruns the whole
    /// unit of work with backoff; the rerun finds the entity created by the
    /// competing writer.
    #[tracing::instrument(name = "bam.correlate", skip_all, fields(entity = E::ENTITY_NAME))]
    pub async fn process(&self, message: &M) -> Result<ProcessOutcome<E>, CorrelationError> {
        if self.handler.is_none() {
            return Err(CorrelationError::NoProcessor);
        }

        let key = self
            .extractor
            .extract(message)
            .ok_or(CorrelationError::MissingCorrelationKey)?;
        validation::validate_correlation_key(&key)?;

        let _lock = match self.conflict_policy {
            ConflictPolicy::Lock => Some(self.locks.acquire(&key).await),
            ConflictPolicy::Retry => None,
        };

        let mut delays = self.backoff.clone().build();
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            match self.run_unit_of_work(message, &key).await {
                Ok(loaded) => {
                    return Ok(ProcessOutcome {
                        key,
                        entity: loaded.entity,
                        created: loaded.created,
                        attempts,
                    })
                }
                Err(e) if self.conflict_policy == ConflictPolicy::Retry && is_retryable(&e) => {
                    match delays.next() {
                        Some(delay) => {
                            warn!(
                                %key,
                                attempt = attempts,
                                error = %e,
                                "Storage conflict, retrying in {:?}",
                                delay
                            );
                            tokio::time::sleep(delay).await;
                        }
                        None => {
                            error!(%key, attempts, error = %e, "Storage conflict retries exhausted");
                            return Err(e);
                        }
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn run_unit_of_work(
        &self,
        message: &M,
        key: &CorrelationKey,
    ) -> Result<LoadedEntity<E>, CorrelationError> {
        let mut tx = self.store.begin().await?;

        match self.load_and_process(tx.as_mut(), message, key).await {
            Ok(loaded) => {
                tx.commit().await?;
                Ok(loaded)
            }
            Err(e) => {
                if let Err(rollback_error) = tx.rollback().await {
                    warn!(%key, error = %rollback_error, "Rollback failed");
                }
                Err(e)
            }
        }
    }

    async fn load_and_process(
        &self,
        tx: &mut dyn EntityTransaction<E>,
        message: &M,
        key: &CorrelationKey,
    ) -> Result<LoadedEntity<E>, CorrelationError> {
        let mut loaded = self.load_entity(&mut *tx, message, key).await?;
        self.process_entity(message, &mut loaded.entity).await?;
        tx.merge(&mut loaded.entity).await?;
        Ok(loaded)
    }
}

/// Builds a [`Correlator`], resolving its key binding, query and processor
/// up front so misconfiguration fails at startup rather than per message.
pub struct CorrelatorBuilder<E: Entity, M> {
    store: Arc<dyn EntityStore<E>>,
    extractor: Arc<dyn KeyExtractor<M>>,
    factory: Option<Arc<dyn EntityFactory<E, M>>>,
    handler: Option<Arc<dyn EntityHandler<E, M>>>,
    config: CorrelationConfig,
}

impl<E, M> CorrelatorBuilder<E, M>
where
    E: Entity,
    M: Send + Sync + 'static,
{
    pub fn new(store: Arc<dyn EntityStore<E>>, extractor: Arc<dyn KeyExtractor<M>>) -> Self {
        Self {
            store,
            extractor,
            factory: None,
            handler: None,
            config: CorrelationConfig::default(),
        }
    }

    /// Apply key property, query override, race policy and retry settings.
    pub fn config(mut self, config: CorrelationConfig) -> Self {
        self.config = config;
        self
    }

    pub fn key_property(mut self, property: impl Into<String>) -> Self {
        self.config.key_property = property.into();
        self
    }

    pub fn conflict_policy(mut self, policy: ConflictPolicy) -> Self {
        self.config.conflict_policy = policy;
        self
    }

    pub fn factory(mut self, factory: impl EntityFactory<E, M> + 'static) -> Self {
        self.factory = Some(Arc::new(factory));
        self
    }

    /// Dispatch messages to an external handler.
    pub fn handler(mut self, handler: impl EntityHandler<E, M> + 'static) -> Self {
        self.handler = Some(Arc::new(handler));
        self
    }

    /// Build, requiring a processor to be configured.
    pub fn build(self) -> Result<Correlator<E, M>, ConfigError>
    where
        E: Default,
    {
        if self.handler.is_none() {
            return Err(ConfigError::NoProcessor);
        }
        self.build_unchecked()
    }

    fn build_unchecked(self) -> Result<Correlator<E, M>, ConfigError>
    where
        E: Default,
    {
        let key_binding = E::key_binding(&self.config.key_property).ok_or_else(|| {
            ConfigError::UnknownKeyProperty {
                entity: E::ENTITY_NAME,
                property: self.config.key_property.clone(),
            }
        })?;

        let find_by_key_query = OnceLock::new();
        if let Some(query) = &self.config.find_by_key_query {
            let _ = find_by_key_query.set(FindByKeyQuery::from_override(query)?);
        }

        debug!(
            entity = E::ENTITY_NAME,
            key_property = key_binding.property,
            policy = ?self.config.conflict_policy,
            "Built correlator"
        );

        Ok(Correlator {
            store: self.store,
            extractor: self.extractor,
            factory: self
                .factory
                .unwrap_or_else(|| Arc::new(DefaultEntityFactory)),
            handler: self.handler,
            key_binding,
            find_by_key_query,
            conflict_policy: self.config.conflict_policy,
            strict_uniqueness: self.config.strict_uniqueness,
            backoff: conflict_backoff(&self.config.retry),
            locks: KeyLocks::new(),
        })
    }
}

impl<E, M> CorrelatorBuilder<E, M>
where
    E: Entity + MessageProcessor<M>,
    M: Send + Sync + 'static,
{
    /// Dispatch messages to the entity itself.
    pub fn entity_processor(self) -> Self {
        self.handler(EntityAsProcessor::<E, M>::new())
    }
}
