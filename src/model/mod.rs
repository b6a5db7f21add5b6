//! Process-instance model.
//!
//! A [`ProcessInstance`] exclusively owns its [`ActivityState`] records and
//! shares its [`ProcessDefinition`] by reference with every other instance
//! of the same process.

mod activity;
mod process_definition;
mod process_instance;
mod temporal;

pub use activity::{ActivityRules, ActivityState};
pub use process_definition::ProcessDefinition;
pub use process_instance::{ProcessInstance, CORRELATION_KEY_PROPERTY};
pub use temporal::Temporal;

/// Errors raised by model invariants.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("Process instance already holds a state for activity '{activity}'")]
    DuplicateActivityState { activity: String },
}
