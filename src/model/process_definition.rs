//! Shared process definition.

/// Template describing the overall process an instance follows.
///
/// Identified by its unique name. Instances hold it through an `Arc`, so a
/// definition outlives any single instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProcessDefinition {
    name: String,
}

impl ProcessDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}
