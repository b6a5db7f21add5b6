//! Backend factory for interface tests.
//!
//! Provides a unified interface to create storage backends based on environment configuration.

use std::env;
use std::sync::Arc;

use bam::model::ProcessInstance;
use bam::storage::{EntityStore, InMemoryEntityStore, SqliteProcessInstanceStore};
use bam::Entity;
use tempfile::TempDir;

/// Storage backend type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Memory,
    Sqlite,
}

impl StorageBackend {
    pub fn from_env() -> Self {
        match env::var("STORAGE_BACKEND")
            .unwrap_or_else(|_| "sqlite".to_string())
            .to_lowercase()
            .as_str()
        {
            "memory" => StorageBackend::Memory,
            _ => StorageBackend::Sqlite,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            StorageBackend::Memory => "memory",
            StorageBackend::Sqlite => "sqlite",
        }
    }
}

enum Handle {
    Memory(Arc<InMemoryEntityStore<ProcessInstance>>),
    Sqlite {
        pool: sqlx::SqlitePool,
        /// Keeps the database file alive for the scenario.
        _dir: TempDir,
    },
}

/// Holds the process instance store for a backend.
pub struct StorageContext {
    pub store: Arc<dyn EntityStore<ProcessInstance>>,
    handle: Handle,
}

impl std::fmt::Debug for StorageContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let backend = match self.handle {
            Handle::Memory(_) => "memory",
            Handle::Sqlite { .. } => "sqlite",
        };
        f.debug_struct("StorageContext")
            .field("store", &"<dyn EntityStore>")
            .field("backend", &backend)
            .finish()
    }
}

impl StorageContext {
    /// Create a storage context for the configured backend.
    pub async fn new(backend: StorageBackend) -> Self {
        match backend {
            StorageBackend::Memory => Self::create_memory(),
            StorageBackend::Sqlite => Self::create_sqlite().await,
        }
    }

    fn create_memory() -> Self {
        let store = Arc::new(InMemoryEntityStore::<ProcessInstance>::new());
        Self {
            store: store.clone(),
            handle: Handle::Memory(store),
        }
    }

    async fn create_sqlite() -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let path = dir.path().join("bam.db");
        let pool = sqlx::SqlitePool::connect(&format!("sqlite:{}?mode=rwc", path.display()))
            .await
            .expect("Failed to connect to SQLite");

        let store = SqliteProcessInstanceStore::new(pool.clone());
        store.init().await.expect("Failed to create schema");

        Self {
            store: Arc::new(store),
            handle: Handle::Sqlite { pool, _dir: dir },
        }
    }

    /// Store an instance under an explicit identity, bypassing correlation.
    pub async fn seed(&self, id: i64, key: &str) {
        match &self.handle {
            Handle::Memory(store) => {
                let mut instance = ProcessInstance::new();
                instance.set_id(id);
                instance.set_correlation_key(key);
                store.seed(instance).await;
            }
            Handle::Sqlite { pool, .. } => {
                sqlx::query(
                    "INSERT INTO process_instances (id, correlation_key, time_started) VALUES (?, ?, ?)",
                )
                .bind(id)
                .bind(key)
                .bind(chrono::Utc::now().to_rfc3339())
                .execute(pool)
                .await
                .expect("Failed to seed process instance");
            }
        }
    }

    /// Number of stored process instances.
    pub async fn count(&self) -> usize {
        match &self.handle {
            Handle::Memory(store) => store.len().await,
            Handle::Sqlite { pool, .. } => {
                let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM process_instances")
                    .fetch_one(pool)
                    .await
                    .expect("Failed to count process instances");
                count as usize
            }
        }
    }
}
