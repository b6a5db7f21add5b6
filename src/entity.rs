//! Correlated entity contracts.
//!
//! An entity type opts into correlation by implementing [`Entity`], which
//! exposes its storage identity and an explicit table of key bindings.
//! Bindings replace by-name property assignment: the configured key
//! property is resolved against the table once, when a correlator is built.

use std::fmt;

use async_trait::async_trait;
use uuid::Uuid;

/// Store-assigned entity identity.
pub type EntityId = i64;

/// Boxed error returned by message processors.
pub type ProcessingError = Box<dyn std::error::Error + Send + Sync>;

/// Value used to address the entity associated with a message.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CorrelationKey {
    Text(String),
    Integer(i64),
    Uuid(Uuid),
}

impl fmt::Display for CorrelationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CorrelationKey::Text(s) => f.write_str(s),
            CorrelationKey::Integer(n) => write!(f, "{n}"),
            CorrelationKey::Uuid(u) => write!(f, "{u}"),
        }
    }
}

impl From<&str> for CorrelationKey {
    fn from(value: &str) -> Self {
        CorrelationKey::Text(value.to_string())
    }
}

impl From<String> for CorrelationKey {
    fn from(value: String) -> Self {
        CorrelationKey::Text(value)
    }
}

impl From<i64> for CorrelationKey {
    fn from(value: i64) -> Self {
        CorrelationKey::Integer(value)
    }
}

impl From<Uuid> for CorrelationKey {
    fn from(value: Uuid) -> Self {
        CorrelationKey::Uuid(value)
    }
}

impl From<&CorrelationKey> for sea_query::Value {
    fn from(key: &CorrelationKey) -> Self {
        match key {
            CorrelationKey::Text(s) => s.clone().into(),
            CorrelationKey::Integer(n) => (*n).into(),
            CorrelationKey::Uuid(u) => u.to_string().into(),
        }
    }
}

/// Typed accessor pair for one key-carrying property of an entity.
pub struct KeyBinding<E> {
    /// Property name used in configuration.
    pub property: &'static str,
    /// Storage column holding the property.
    pub column: &'static str,
    /// Whether the store enforces one entity per key value.
    pub unique: bool,
    /// Read the key currently held by the entity.
    pub get: fn(&E) -> Option<CorrelationKey>,
    /// Write a key onto the entity.
    pub set: fn(&mut E, &CorrelationKey),
}

impl<E> Clone for KeyBinding<E> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<E> Copy for KeyBinding<E> {}

impl<E> fmt::Debug for KeyBinding<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyBinding")
            .field("property", &self.property)
            .field("column", &self.column)
            .field("unique", &self.unique)
            .finish()
    }
}

/// A persisted type that can be located by correlation key.
pub trait Entity: Clone + Send + Sync + 'static {
    /// Storage name of the entity (table).
    const ENTITY_NAME: &'static str;

    /// Identity, once persisted.
    fn id(&self) -> Option<EntityId>;

    /// Assign the identity. Called by stores on persist.
    fn set_id(&mut self, id: EntityId);

    /// Key bindings this type supports.
    fn key_bindings() -> &'static [KeyBinding<Self>];

    /// Resolve a binding by configured property name.
    fn key_binding(property: &str) -> Option<KeyBinding<Self>> {
        Self::key_bindings()
            .iter()
            .find(|b| b.property == property)
            .copied()
    }

    /// Resolve a binding by storage column.
    fn key_binding_for_column(column: &str) -> Option<KeyBinding<Self>> {
        Self::key_bindings()
            .iter()
            .find(|b| b.column == column)
            .copied()
    }
}

/// Capability for entities that consume messages themselves.
#[async_trait]
pub trait MessageProcessor<M: Sync>: Send {
    async fn process(&mut self, message: &M) -> Result<(), ProcessingError>;
}

/// Produces a fresh entity for a key that has no stored entity yet.
pub trait EntityFactory<E, M>: Send + Sync {
    fn create(&self, message: &M, key: &CorrelationKey) -> E;
}

impl<E, M, F> EntityFactory<E, M> for F
where
    F: Fn(&M, &CorrelationKey) -> E + Send + Sync,
{
    fn create(&self, message: &M, key: &CorrelationKey) -> E {
        self(message, key)
    }
}

/// Factory that default-constructs the entity type.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultEntityFactory;

impl<E: Default, M> EntityFactory<E, M> for DefaultEntityFactory {
    fn create(&self, _message: &M, _key: &CorrelationKey) -> E {
        E::default()
    }
}
