//! Database schema definitions using sea-query.
//!
//! These define the table and column identifiers for type-safe query building.

use sea_query::Iden;

/// Process definitions table schema.
#[derive(Iden)]
pub enum ProcessDefinitions {
    Table,
    #[iden = "name"]
    Name,
}

/// Process instances table schema.
#[derive(Iden)]
pub enum ProcessInstances {
    Table,
    #[iden = "id"]
    Id,
    #[iden = "correlation_key"]
    CorrelationKey,
    #[iden = "process_definition"]
    ProcessDefinition,
    #[iden = "time_started"]
    TimeStarted,
    #[iden = "time_completed"]
    TimeCompleted,
}

/// Activity states table schema.
#[derive(Iden)]
pub enum ActivityStates {
    Table,
    #[iden = "id"]
    Id,
    #[iden = "process_instance_id"]
    ProcessInstanceId,
    #[iden = "activity"]
    Activity,
    #[iden = "received_message_count"]
    ReceivedMessageCount,
    #[iden = "time_started"]
    TimeStarted,
    #[iden = "time_completed"]
    TimeCompleted,
}

/// SQL for creating the process definitions table.
pub const CREATE_PROCESS_DEFINITIONS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS process_definitions (
    name TEXT PRIMARY KEY NOT NULL
)
"#;

/// SQL for creating the process instances table.
pub const CREATE_PROCESS_INSTANCES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS process_instances (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    correlation_key TEXT NOT NULL UNIQUE,
    process_definition TEXT REFERENCES process_definitions(name),
    time_started TEXT NOT NULL,
    time_completed TEXT
)
"#;

/// SQL for creating the activity states table.
pub const CREATE_ACTIVITY_STATES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS activity_states (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    process_instance_id INTEGER NOT NULL REFERENCES process_instances(id) ON DELETE CASCADE,
    activity TEXT NOT NULL,
    received_message_count INTEGER NOT NULL DEFAULT 0,
    time_started TEXT NOT NULL,
    time_completed TEXT,
    UNIQUE (process_instance_id, activity)
)
"#;

/// SQL for indexing activity states by owning instance.
pub const CREATE_ACTIVITY_STATES_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_activity_states_instance ON activity_states(process_instance_id)
"#;
