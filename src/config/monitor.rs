//! Monitored activity configuration for the `bam-monitor` binary.

use std::sync::Arc;

use serde::Deserialize;

use crate::message::{BodyPointerKey, HeaderKey, KeyExtractor, Message};
use crate::model::{ActivityRules, ProcessDefinition};

/// Where the correlation key is read from.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeySource {
    /// Named message header.
    Header(String),
    /// JSON pointer into the message body.
    BodyPointer(String),
}

impl KeySource {
    pub fn extractor(&self) -> Arc<dyn KeyExtractor<Message>> {
        match self {
            KeySource::Header(name) => Arc::new(HeaderKey(name.clone())),
            KeySource::BodyPointer(pointer) => Arc::new(BodyPointerKey(pointer.clone())),
        }
    }
}

impl Default for KeySource {
    fn default() -> Self {
        KeySource::Header("correlationKey".to_string())
    }
}

/// One monitored activity of one process.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Process definition name.
    pub process: String,
    /// Activity name.
    pub activity: String,
    /// Messages the activity expects before it completes.
    pub expected_messages: u32,
    /// Correlation key source.
    pub key: KeySource,
}

impl MonitorConfig {
    pub fn process_definition(&self) -> Arc<ProcessDefinition> {
        Arc::new(ProcessDefinition::new(self.process.clone()))
    }

    pub fn activity_rules(&self) -> ActivityRules {
        ActivityRules::new(self.activity.clone()).with_expected_messages(self.expected_messages)
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            process: "default".to_string(),
            activity: "received".to_string(),
            expected_messages: 1,
            key: KeySource::default(),
        }
    }
}
