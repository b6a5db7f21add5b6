//! SQLite implementations of storage interfaces.

mod process_instance_store;

pub use process_instance_store::SqliteProcessInstanceStore;
