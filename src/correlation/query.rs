//! Find-by-key query built from schema metadata.

use std::fmt;

use sea_query::{Alias, Asterisk, Expr, Query, SelectStatement, SqliteQueryBuilder};

use crate::config::{ConfigError, QueryOverride};
use crate::entity::{CorrelationKey, Entity, KeyBinding};
use crate::validation::validate_identifier;

/// Selects the entities of one type whose key column equals a bound key.
///
/// Names come either from an entity's key binding or from validated
/// configuration; the key itself is always a bound parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FindByKeyQuery {
    entity: String,
    key_column: String,
}

impl FindByKeyQuery {
    /// Derive the query from an entity type and one of its key bindings.
    pub fn for_binding<E: Entity>(binding: &KeyBinding<E>) -> Self {
        Self {
            entity: E::ENTITY_NAME.to_string(),
            key_column: binding.column.to_string(),
        }
    }

    /// Build a query from configured names.
    pub fn new(entity: &str, key_column: &str) -> Result<Self, ConfigError> {
        validate_identifier(entity).map_err(|source| ConfigError::InvalidIdentifier {
            field: "find_by_key_query.entity",
            source,
        })?;
        validate_identifier(key_column).map_err(|source| ConfigError::InvalidIdentifier {
            field: "find_by_key_query.key_column",
            source,
        })?;
        Ok(Self {
            entity: entity.to_string(),
            key_column: key_column.to_string(),
        })
    }

    pub fn from_override(query: &QueryOverride) -> Result<Self, ConfigError> {
        Self::new(&query.entity, &query.key_column)
    }

    pub fn entity(&self) -> &str {
        &self.entity
    }

    pub fn key_column(&self) -> &str {
        &self.key_column
    }

    /// The select statement with `key` bound.
    pub fn select(&self, key: &CorrelationKey) -> SelectStatement {
        Query::select()
            .column(Asterisk)
            .from(Alias::new(&self.entity))
            .and_where(Expr::col(Alias::new(&self.key_column)).eq(sea_query::Value::from(key)))
            .to_owned()
    }
}

impl fmt::Display for FindByKeyQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (sql, _) = self
            .select(&CorrelationKey::Integer(0))
            .build(SqliteQueryBuilder);
        f.write_str(&sql)
    }
}
