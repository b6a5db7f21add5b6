//! SQLite storage for process instances.
//!
//! Instances live in `process_instances`, their activity states in
//! `activity_states` and the definitions they follow in
//! `process_definitions`. The correlation key column is UNIQUE, so a second
//! writer inserting the same new key fails with a unique violation, which is
//! reported as [`StorageError::DuplicateKey`].

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_query::{Alias, Expr, OnConflict, Order, Query, SimpleExpr, SqliteQueryBuilder};
use sea_query_binder::SqlxBinder;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use tokio::sync::RwLock;
use tracing::debug;

use crate::correlation::FindByKeyQuery;
use crate::entity::{CorrelationKey, Entity, EntityId};
use crate::model::{ActivityState, ProcessDefinition, ProcessInstance, Temporal};
use crate::storage::schema::{
    ActivityStates, ProcessDefinitions, ProcessInstances, CREATE_ACTIVITY_STATES_INDEX,
    CREATE_ACTIVITY_STATES_TABLE, CREATE_PROCESS_DEFINITIONS_TABLE, CREATE_PROCESS_INSTANCES_TABLE,
};
use crate::storage::{EntityStore, EntityTransaction, Result, StorageError};

/// SQLite result codes for a locked or busy database (including extended codes).
const BUSY_CODES: &[&str] = &["5", "6", "261", "262", "517"];

type DefinitionCache = Arc<RwLock<HashMap<String, Arc<ProcessDefinition>>>>;

/// SQLite-backed process instance store.
pub struct SqliteProcessInstanceStore {
    pool: SqlitePool,
    definitions: DefinitionCache,
}

impl SqliteProcessInstanceStore {
    /// Create a new SQLite process instance store.
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            definitions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Create tables and indexes if they do not exist.
    pub async fn init(&self) -> Result<()> {
        sqlx::query("PRAGMA foreign_keys = ON")
            .execute(&self.pool)
            .await?;

        for statement in [
            CREATE_PROCESS_DEFINITIONS_TABLE,
            CREATE_PROCESS_INSTANCES_TABLE,
            CREATE_ACTIVITY_STATES_TABLE,
            CREATE_ACTIVITY_STATES_INDEX,
        ] {
            sqlx::query(statement).execute(&self.pool).await?;
        }

        debug!("Process instance schema ready");
        Ok(())
    }
}

#[async_trait]
impl EntityStore<ProcessInstance> for SqliteProcessInstanceStore {
    async fn begin(&self) -> Result<Box<dyn EntityTransaction<ProcessInstance>>> {
        let tx = self.pool.begin().await.map_err(classify)?;
        Ok(Box::new(SqliteProcessInstanceTransaction {
            tx,
            definitions: self.definitions.clone(),
        }))
    }
}

/// One SQLite transaction. Dropping it rolls back.
struct SqliteProcessInstanceTransaction {
    tx: Transaction<'static, Sqlite>,
    definitions: DefinitionCache,
}

/// Report lock contention as [`StorageError::Busy`].
fn classify(error: sqlx::Error) -> StorageError {
    if let sqlx::Error::Database(db) = &error {
        if db
            .code()
            .is_some_and(|code| BUSY_CODES.contains(&code.as_ref()))
        {
            return StorageError::Busy(db.message().to_string());
        }
    }
    StorageError::Database(error)
}

/// Report a unique violation on the correlation key as
/// [`StorageError::DuplicateKey`].
fn classify_key_write(error: sqlx::Error, key: &str) -> StorageError {
    if let sqlx::Error::Database(db) = &error {
        if db.is_unique_violation() {
            return StorageError::DuplicateKey {
                entity: ProcessInstance::ENTITY_NAME.to_string(),
                column: "correlation_key".to_string(),
                key: key.to_string(),
            };
        }
    }
    classify(error)
}

fn format_time(at: DateTime<Utc>) -> String {
    at.to_rfc3339()
}

fn parse_time(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| StorageError::InvalidTimestamp(value.to_string()))
}

fn read_temporal(row: &SqliteRow) -> Result<Temporal> {
    let started: String = row.try_get("time_started")?;
    let completed: Option<String> = row.try_get("time_completed")?;
    Ok(Temporal {
        time_started: parse_time(&started)?,
        time_completed: completed.as_deref().map(parse_time).transpose()?,
    })
}

impl SqliteProcessInstanceTransaction {
    async fn definition(&self, name: String) -> Arc<ProcessDefinition> {
        if let Some(definition) = self.definitions.read().await.get(&name) {
            return definition.clone();
        }
        self.definitions
            .write()
            .await
            .entry(name.clone())
            .or_insert_with(|| Arc::new(ProcessDefinition::new(name)))
            .clone()
    }

    async fn save_definition(&mut self, instance: &ProcessInstance) -> Result<()> {
        let Some(definition) = instance.process_definition() else {
            return Ok(());
        };

        let (sql, values) = Query::insert()
            .into_table(ProcessDefinitions::Table)
            .columns([ProcessDefinitions::Name])
            .values_panic([definition.name().into()])
            .on_conflict(
                OnConflict::column(ProcessDefinitions::Name)
                    .do_nothing()
                    .to_owned(),
            )
            .build_sqlx(SqliteQueryBuilder);

        sqlx::query_with(&sql, values)
            .execute(&mut *self.tx)
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn load_activity_states(&mut self, instance_id: EntityId) -> Result<Vec<ActivityState>> {
        let (sql, values) = Query::select()
            .columns([
                ActivityStates::Id,
                ActivityStates::Activity,
                ActivityStates::ReceivedMessageCount,
                ActivityStates::TimeStarted,
                ActivityStates::TimeCompleted,
            ])
            .from(ActivityStates::Table)
            .and_where(Expr::col(ActivityStates::ProcessInstanceId).eq(instance_id))
            .order_by(ActivityStates::Id, Order::Asc)
            .build_sqlx(SqliteQueryBuilder);

        let rows = sqlx::query_with(&sql, values)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(classify)?;

        let mut states = Vec::with_capacity(rows.len());
        for row in rows {
            let count: i64 = row.try_get("received_message_count")?;
            let count = u32::try_from(count).map_err(|_| StorageError::InvalidColumnValue {
                column: "received_message_count".to_string(),
                value: count.to_string(),
            })?;
            states.push(ActivityState::restore(
                Some(row.try_get("id")?),
                row.try_get("activity")?,
                count,
                read_temporal(&row)?,
            ));
        }
        Ok(states)
    }

    async fn insert_activity_states(&mut self, instance: &mut ProcessInstance) -> Result<()> {
        let Some(instance_id) = instance.id() else {
            return Err(StorageError::NotPersisted {
                entity: ProcessInstance::ENTITY_NAME.to_string(),
            });
        };

        for state in instance.activity_states_mut() {
            let mut insert = Query::insert();
            insert.into_table(ActivityStates::Table);
            let row: [SimpleExpr; 5] = [
                instance_id.into(),
                state.activity().into(),
                i64::from(state.received_message_count()).into(),
                format_time(state.temporal().time_started).into(),
                state.temporal().time_completed.map(format_time).into(),
            ];
            match state.id() {
                Some(id) => {
                    insert
                        .columns([
                            ActivityStates::Id,
                            ActivityStates::ProcessInstanceId,
                            ActivityStates::Activity,
                            ActivityStates::ReceivedMessageCount,
                            ActivityStates::TimeStarted,
                            ActivityStates::TimeCompleted,
                        ])
                        .values_panic(std::iter::once(id.into()).chain(row));
                }
                None => {
                    insert
                        .columns([
                            ActivityStates::ProcessInstanceId,
                            ActivityStates::Activity,
                            ActivityStates::ReceivedMessageCount,
                            ActivityStates::TimeStarted,
                            ActivityStates::TimeCompleted,
                        ])
                        .values_panic(row);
                }
            }

            let (sql, values) = insert.build_sqlx(SqliteQueryBuilder);
            let result = sqlx::query_with(&sql, values)
                .execute(&mut *self.tx)
                .await
                .map_err(classify)?;
            if state.id().is_none() {
                state.set_id(result.last_insert_rowid());
            }
        }
        Ok(())
    }
}

#[async_trait]
impl EntityTransaction<ProcessInstance> for SqliteProcessInstanceTransaction {
    async fn find(
        &mut self,
        query: &FindByKeyQuery,
        key: &CorrelationKey,
    ) -> Result<Vec<ProcessInstance>> {
        let (sql, values) = query
            .select(key)
            .order_by(Alias::new("id"), Order::Asc)
            .build_sqlx(SqliteQueryBuilder);

        let rows = sqlx::query_with(&sql, values)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(classify)?;

        let mut instances = Vec::with_capacity(rows.len());
        for row in rows {
            let id: EntityId = row.try_get("id")?;
            let mut instance = ProcessInstance::with_temporal(read_temporal(&row)?);
            instance.set_id(id);
            instance.set_correlation_key(row.try_get::<String, _>("correlation_key")?);
            if let Some(name) = row.try_get::<Option<String>, _>("process_definition")? {
                instance.set_process_definition(self.definition(name).await);
            }
            let states = self.load_activity_states(id).await?;
            instance.set_activity_states(states)?;
            instances.push(instance);
        }

        debug!(%key, found = instances.len(), "Loaded process instances");
        Ok(instances)
    }

    async fn persist(&mut self, instance: &mut ProcessInstance) -> Result<()> {
        self.save_definition(instance).await?;

        let key = instance.correlation_key().unwrap_or_default().to_string();
        let (sql, values) = Query::insert()
            .into_table(ProcessInstances::Table)
            .columns([
                ProcessInstances::CorrelationKey,
                ProcessInstances::ProcessDefinition,
                ProcessInstances::TimeStarted,
                ProcessInstances::TimeCompleted,
            ])
            .values_panic([
                instance.correlation_key().map(str::to_string).into(),
                instance
                    .process_definition()
                    .map(|d| d.name().to_string())
                    .into(),
                format_time(instance.temporal().time_started).into(),
                instance.temporal().time_completed.map(format_time).into(),
            ])
            .build_sqlx(SqliteQueryBuilder);

        let result = sqlx::query_with(&sql, values)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| classify_key_write(e, &key))?;
        instance.set_id(result.last_insert_rowid());

        self.insert_activity_states(instance).await?;
        debug!(id = ?instance.id(), %key, "Inserted process instance");
        Ok(())
    }

    async fn merge(&mut self, instance: &mut ProcessInstance) -> Result<()> {
        let not_persisted = || StorageError::NotPersisted {
            entity: ProcessInstance::ENTITY_NAME.to_string(),
        };
        let id = instance.id().ok_or_else(not_persisted)?;
        self.save_definition(instance).await?;

        let key = instance.correlation_key().unwrap_or_default().to_string();
        let (sql, values) = Query::update()
            .table(ProcessInstances::Table)
            .values([
                (
                    ProcessInstances::CorrelationKey,
                    instance.correlation_key().map(str::to_string).into(),
                ),
                (
                    ProcessInstances::ProcessDefinition,
                    instance
                        .process_definition()
                        .map(|d| d.name().to_string())
                        .into(),
                ),
                (
                    ProcessInstances::TimeStarted,
                    format_time(instance.temporal().time_started).into(),
                ),
                (
                    ProcessInstances::TimeCompleted,
                    instance.temporal().time_completed.map(format_time).into(),
                ),
            ])
            .and_where(Expr::col(ProcessInstances::Id).eq(id))
            .build_sqlx(SqliteQueryBuilder);

        let result = sqlx::query_with(&sql, values)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| classify_key_write(e, &key))?;
        if result.rows_affected() == 0 {
            return Err(not_persisted());
        }

        // Owned states are replaced wholesale; existing rows keep their ids.
        let (sql, values) = Query::delete()
            .from_table(ActivityStates::Table)
            .and_where(Expr::col(ActivityStates::ProcessInstanceId).eq(id))
            .build_sqlx(SqliteQueryBuilder);
        sqlx::query_with(&sql, values)
            .execute(&mut *self.tx)
            .await
            .map_err(classify)?;

        self.insert_activity_states(instance).await
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await.map_err(classify)
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.tx.rollback().await.map_err(classify)
    }
}
