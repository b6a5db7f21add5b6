//! BAM - Business Activity Monitoring
//!
//! Correlates inbound messages to persisted process instances: each message
//! yields a correlation key, the entity stored under that key is loaded (or
//! created on first sight) and the message is processed against it inside a
//! single store transaction.

pub mod config;
pub mod correlation;
pub mod entity;
pub mod message;
pub mod model;
pub mod storage;
pub mod utils;
pub mod validation;

pub use correlation::{
    ActivityHandler, CorrelationError, Correlator, CorrelatorBuilder, EntityHandler,
    FindByKeyQuery, ProcessOutcome,
};
pub use entity::{CorrelationKey, Entity, EntityId, KeyBinding, MessageProcessor};
pub use message::{KeyExtractor, Message};
pub use model::{ActivityRules, ActivityState, ProcessDefinition, ProcessInstance};
