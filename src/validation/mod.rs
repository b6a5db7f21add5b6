//! Input validation.
//!
//! Validates values that come from messages (correlation keys) and from
//! configuration (schema identifiers used to build queries).

use crate::entity::CorrelationKey;

/// Length limits for validated fields.
pub mod limits {
    /// Maximum correlation key length in bytes.
    pub const MAX_CORRELATION_KEY_LENGTH: usize = 128;
    /// Maximum schema identifier length (table or column name).
    pub const MAX_IDENTIFIER_LENGTH: usize = 64;
}

/// Error constants for validation failures.
pub mod errmsg {
    pub const CORRELATION_KEY_EMPTY: &str = "correlation key cannot be empty";
    pub const CORRELATION_KEY_TOO_LONG: &str = "correlation key exceeds maximum length";
    pub const CORRELATION_KEY_CONTROL_CHARS: &str =
        "correlation key contains control characters";

    pub const IDENTIFIER_EMPTY: &str = "identifier cannot be empty";
    pub const IDENTIFIER_TOO_LONG: &str = "identifier exceeds maximum length";
    pub const IDENTIFIER_INVALID_START: &str = "identifier must start with a letter or underscore";
    pub const IDENTIFIER_INVALID_CHARS: &str =
        "identifier contains invalid characters (allowed: a-z, A-Z, 0-9, _)";
}

/// A rejected input value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct ValidationError(pub String);

/// Validate a correlation key.
///
/// Rules for text keys:
/// - Must not be empty
/// - Maximum 128 bytes
/// - Must not contain control characters
///
/// Integer and UUID keys are always valid.
pub fn validate_correlation_key(key: &CorrelationKey) -> Result<(), ValidationError> {
    let CorrelationKey::Text(text) = key else {
        return Ok(());
    };
    if text.is_empty() {
        return Err(ValidationError(errmsg::CORRELATION_KEY_EMPTY.to_string()));
    }
    if text.len() > limits::MAX_CORRELATION_KEY_LENGTH {
        return Err(ValidationError(format!(
            "{} (max: {}, got: {})",
            errmsg::CORRELATION_KEY_TOO_LONG,
            limits::MAX_CORRELATION_KEY_LENGTH,
            text.len()
        )));
    }
    if text.chars().any(char::is_control) {
        return Err(ValidationError(
            errmsg::CORRELATION_KEY_CONTROL_CHARS.to_string(),
        ));
    }
    Ok(())
}

/// Validate a schema identifier (table or column name).
///
/// Rules:
/// - Must not be empty
/// - Maximum 64 characters
/// - Must start with a letter or underscore
/// - May contain: letters, digits, underscore
pub fn validate_identifier(name: &str) -> Result<(), ValidationError> {
    if name.is_empty() {
        return Err(ValidationError(errmsg::IDENTIFIER_EMPTY.to_string()));
    }
    if name.len() > limits::MAX_IDENTIFIER_LENGTH {
        return Err(ValidationError(format!(
            "{} (max: {}, got: {})",
            errmsg::IDENTIFIER_TOO_LONG,
            limits::MAX_IDENTIFIER_LENGTH,
            name.len()
        )));
    }

    let mut chars = name.chars();
    if let Some(first) = chars.next() {
        if !matches!(first, 'a'..='z' | 'A'..='Z' | '_') {
            return Err(ValidationError(format!(
                "{}: '{}'",
                errmsg::IDENTIFIER_INVALID_START,
                name
            )));
        }
    }
    for ch in chars {
        if !matches!(ch, 'a'..='z' | 'A'..='Z' | '0'..='9' | '_') {
            return Err(ValidationError(format!(
                "{}: '{}'",
                errmsg::IDENTIFIER_INVALID_CHARS,
                name
            )));
        }
    }

    Ok(())
}
