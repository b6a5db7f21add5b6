//! In-memory entity store.
//!
//! Holds committed entities in a map keyed by identity. Transactions stage
//! their writes privately and publish them on commit. Unique key bindings
//! are checked on every persist and merge and again at commit, so two
//! transactions racing on the same key cannot both commit. Each row
//! carries a version; merging a row that another transaction committed
//! after it was read fails at commit with [`StorageError::Busy`].

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{EntityStore, EntityTransaction, Result, StorageError};
use crate::correlation::FindByKeyQuery;
use crate::entity::{CorrelationKey, Entity, EntityId, KeyBinding};


struct Row<E> {
    entity: E,
    version: u64,
}

struct Shared<E> {
    rows: RwLock<BTreeMap<EntityId, Row<E>>>,
    next_id: AtomicI64,
    fail_on_find: RwLock<bool>,
    fail_on_persist: RwLock<bool>,
    fail_on_commit: RwLock<bool>,
}

/// In-memory store for any [`Entity`] type.
pub struct InMemoryEntityStore<E> {
    shared: Arc<Shared<E>>,
}

impl<E: Entity> InMemoryEntityStore<E> {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                rows: RwLock::new(BTreeMap::new()),
                next_id: AtomicI64::new(1),
                fail_on_find: RwLock::new(false),
                fail_on_persist: RwLock::new(false),
                fail_on_commit: RwLock::new(false),
            }),
        }
    }

    pub async fn set_fail_on_find(&self, fail: bool) {
        *self.shared.fail_on_find.write().await = fail;
    }

    pub async fn set_fail_on_persist(&self, fail: bool) {
        *self.shared.fail_on_persist.write().await = fail;
    }

    pub async fn set_fail_on_commit(&self, fail: bool) {
        *self.shared.fail_on_commit.write().await = fail;
    }

    /// Store an entity directly, keeping its identity if it has one.
    pub async fn seed(&self, mut entity: E) -> E {
        let id = match entity.id() {
            Some(id) => {
                self.shared.next_id.fetch_max(id + 1, Ordering::SeqCst);
                id
            }
            None => {
                let id = self.shared.next_id.fetch_add(1, Ordering::SeqCst);
                entity.set_id(id);
                id
            }
        };
        let mut rows = self.shared.rows.write().await;
        let version = rows.get(&id).map_or(0, |row| row.version + 1);
        rows.insert(
            id,
            Row {
                entity: entity.clone(),
                version,
            },
        );
        entity
    }

    /// Committed entities in identity order.
    pub async fn entities(&self) -> Vec<E> {
        self.shared
            .rows
            .read()
            .await
            .values()
            .map(|row| row.entity.clone())
            .collect()
    }

    pub async fn get(&self, id: EntityId) -> Option<E> {
        self.shared
            .rows
            .read()
            .await
            .get(&id)
            .map(|row| row.entity.clone())
    }

    pub async fn len(&self) -> usize {
        self.shared.rows.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl<E: Entity> Default for InMemoryEntityStore<E> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<E: Entity> EntityStore<E> for InMemoryEntityStore<E> {
    async fn begin(&self) -> Result<Box<dyn EntityTransaction<E>>> {
        Ok(Box::new(InMemoryTransaction {
            shared: self.shared.clone(),
            staged: BTreeMap::new(),
            inserted: BTreeSet::new(),
            read_versions: BTreeMap::new(),
        }))
    }
}

struct InMemoryTransaction<E> {
    shared: Arc<Shared<E>>,
    staged: BTreeMap<EntityId, E>,
    inserted: BTreeSet<EntityId>,
    /// Version of each committed row when this transaction first saw it.
    read_versions: BTreeMap<EntityId, u64>,
}

/// Committed rows with this transaction's staged writes laid over them.
fn overlay<'a, E>(
    rows: &'a BTreeMap<EntityId, Row<E>>,
    staged: &'a BTreeMap<EntityId, E>,
) -> BTreeMap<EntityId, &'a E> {
    let mut view: BTreeMap<EntityId, &E> =
        rows.iter().map(|(id, row)| (*id, &row.entity)).collect();
    view.extend(staged.iter().map(|(id, e)| (*id, e)));
    view
}

/// Keys compare by rendered value, the way a text column compares.
fn holds_key<E>(binding: &KeyBinding<E>, entity: &E, key: &CorrelationKey) -> bool {
    (binding.get)(entity).is_some_and(|held| held.to_string() == key.to_string())
}

/// First unique binding whose key is already held by another entity.
///
/// Bindings whose key is unchanged from the committed row `previous` are
/// skipped; only writes that take a key can conflict.
fn conflicting_binding<'a, E: Entity>(
    entity: &E,
    previous: Option<&E>,
    others: impl Iterator<Item = &'a E> + Clone,
) -> Option<(KeyBinding<E>, CorrelationKey)> {
    E::key_bindings()
        .iter()
        .filter(|binding| binding.unique)
        .find_map(|binding| {
            let key = (binding.get)(entity)?;
            if previous.is_some_and(|prev| holds_key(binding, prev, &key)) {
                return None;
            }
            others
                .clone()
                .filter(|other| other.id() != entity.id())
                .any(|other| holds_key(binding, other, &key))
                .then_some((*binding, key))
        })
}

fn duplicate_key<E: Entity>(binding: KeyBinding<E>, key: CorrelationKey) -> StorageError {
    StorageError::DuplicateKey {
        entity: E::ENTITY_NAME.to_string(),
        column: binding.column.to_string(),
        key: key.to_string(),
    }
}

#[async_trait]
impl<E: Entity> EntityTransaction<E> for InMemoryTransaction<E> {
    async fn find(&mut self, query: &FindByKeyQuery, key: &CorrelationKey) -> Result<Vec<E>> {
        if *self.shared.fail_on_find.read().await {
            return Err(StorageError::Injected("find".to_string()));
        }
        if query.entity() != E::ENTITY_NAME {
            return Err(StorageError::UnknownEntity(query.entity().to_string()));
        }
        let binding = E::key_binding_for_column(query.key_column()).ok_or_else(|| {
            StorageError::UnknownColumn {
                entity: query.entity().to_string(),
                column: query.key_column().to_string(),
            }
        })?;

        let rows = self.shared.rows.read().await;
        let found: Vec<E> = overlay(&rows, &self.staged)
            .into_values()
            .filter(|e| holds_key(&binding, *e, key))
            .cloned()
            .collect();
        for id in found.iter().filter_map(|e| e.id()) {
            if let Some(row) = rows.get(&id) {
                self.read_versions.entry(id).or_insert(row.version);
            }
        }
        Ok(found)
    }

    async fn persist(&mut self, entity: &mut E) -> Result<()> {
        if *self.shared.fail_on_persist.read().await {
            return Err(StorageError::Injected("persist".to_string()));
        }

        {
            let rows = self.shared.rows.read().await;
            let view = overlay(&rows, &self.staged);
            if let Some((binding, key)) =
                conflicting_binding(entity, None, view.values().copied())
            {
                return Err(duplicate_key(binding, key));
            }
        }

        let id = self.shared.next_id.fetch_add(1, Ordering::SeqCst);
        entity.set_id(id);
        self.staged.insert(id, entity.clone());
        self.inserted.insert(id);
        Ok(())
    }

    async fn merge(&mut self, entity: &mut E) -> Result<()> {
        let not_persisted = || StorageError::NotPersisted {
            entity: E::ENTITY_NAME.to_string(),
        };
        let id = entity.id().ok_or_else(not_persisted)?;
        {
            let rows = self.shared.rows.read().await;
            if !self.staged.contains_key(&id) {
                let row = rows.get(&id).ok_or_else(not_persisted)?;
                self.read_versions.entry(id).or_insert(row.version);
            }
            let committed = rows.get(&id).map(|row| &row.entity);
            let view = overlay(&rows, &self.staged);
            if let Some((binding, key)) =
                conflicting_binding(entity, committed, view.values().copied())
            {
                return Err(duplicate_key(binding, key));
            }
        }
        self.staged.insert(id, entity.clone());
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let InMemoryTransaction {
            shared,
            staged,
            inserted,
            read_versions,
        } = *self;
        if *shared.fail_on_commit.read().await {
            return Err(StorageError::Injected("commit".to_string()));
        }

        let mut rows = shared.rows.write().await;
        for id in staged.keys() {
            if !inserted.contains(id)
                && rows.get(id).map(|row| row.version) != read_versions.get(id).copied()
            {
                return Err(StorageError::Busy(format!(
                    "{} {} was modified by another transaction",
                    E::ENTITY_NAME,
                    id
                )));
            }
        }
        {
            let view = overlay(&rows, &staged);
            for (id, entity) in &staged {
                let committed = rows
                    .get(id)
                    .filter(|_| !inserted.contains(id))
                    .map(|row| &row.entity);
                if let Some((binding, key)) =
                    conflicting_binding(entity, committed, view.values().copied())
                {
                    return Err(duplicate_key(binding, key));
                }
            }
        }

        for (id, entity) in staged {
            let version = rows.get(&id).map_or(0, |row| row.version + 1);
            rows.insert(id, Row { entity, version });
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}
