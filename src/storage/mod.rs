//! Entity storage.
//!
//! The correlator talks to storage through two narrow interfaces:
//! [`EntityStore`] opens a transaction, [`EntityTransaction`] runs the
//! find / persist / merge calls inside it. Commit and rollback stay with
//! the caller.
//!
//! Implementations:
//! - `InMemoryEntityStore`: generic in-memory store, always available
//! - `SqliteProcessInstanceStore`: SQLite storage for process instances

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::config::{StorageConfig, StorageType};
use crate::correlation::FindByKeyQuery;
use crate::entity::{CorrelationKey, Entity};
use crate::model::{ModelError, ProcessInstance};

pub mod memory;
pub mod schema;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use memory::InMemoryEntityStore;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteProcessInstanceStore;

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Duplicate key: {entity}.{column} = {key}")]
    DuplicateKey {
        entity: String,
        column: String,
        key: String,
    },

    #[error("Store busy: {0}")]
    Busy(String),

    #[error("Entity {entity} has not been persisted")]
    NotPersisted { entity: String },

    #[error("Unknown entity: {0}")]
    UnknownEntity(String),

    #[error("Unknown key column: {entity}.{column}")]
    UnknownColumn { entity: String, column: String },

    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("Invalid value in {column}: {value}")]
    InvalidColumnValue { column: String, value: String },

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error("Injected failure: {0}")]
    Injected(String),

    #[cfg(feature = "sqlite")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl StorageError {
    /// Conflicts come from concurrent writers and may succeed on a rerun.
    pub fn is_conflict(&self) -> bool {
        matches!(self, StorageError::DuplicateKey { .. } | StorageError::Busy(_))
    }
}

/// Opens units of work against stored entities of type `E`.
#[async_trait]
pub trait EntityStore<E: Entity>: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn EntityTransaction<E>>>;
}

/// One unit of work. Dropping it without commit discards its writes.
#[async_trait]
pub trait EntityTransaction<E: Entity>: Send {
    /// Entities whose key column equals `key`, in identity order.
    async fn find(&mut self, query: &FindByKeyQuery, key: &CorrelationKey) -> Result<Vec<E>>;

    /// Insert a new entity and assign its identity.
    async fn persist(&mut self, entity: &mut E) -> Result<()>;

    /// Write back a persisted entity, including the children it owns.
    async fn merge(&mut self, entity: &mut E) -> Result<()>;

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;
}

/// Initialize the process-instance store based on configuration.
pub async fn init_storage(
    config: &StorageConfig,
) -> std::result::Result<Arc<dyn EntityStore<ProcessInstance>>, Box<dyn std::error::Error>> {
    match config.storage_type {
        StorageType::Memory => {
            info!("Storage: in-memory");
            Ok(Arc::new(InMemoryEntityStore::<ProcessInstance>::new()))
        }
        #[cfg(feature = "sqlite")]
        StorageType::Sqlite => {
            info!("Storage: sqlite at {}", config.sqlite.path);
            if let Some(parent) = std::path::Path::new(&config.sqlite.path).parent() {
                std::fs::create_dir_all(parent)?;
            }

            let pool =
                sqlx::SqlitePool::connect(&format!("sqlite:{}?mode=rwc", config.sqlite.path))
                    .await?;

            let store = SqliteProcessInstanceStore::new(pool);
            store.init().await?;
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "sqlite"))]
        StorageType::Sqlite => {
            tracing::error!("SQLite storage requested but 'sqlite' feature is not enabled");
            Err(crate::config::ConfigError::FeatureDisabled("sqlite").into())
        }
    }
}
