//! Error types for memberlink value types.

use thiserror::Error;

/// Errors raised when constructing memberlink value types.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TypesError {
    /// Identifier is not a valid UUID
    #[error("invalid {kind} id: {value:?}")]
    InvalidId {
        /// Which identifier was being parsed (user, team, ...).
        kind: &'static str,
        /// The rejected input.
        value: String,
    },

    /// Watermarks are milliseconds since the Unix epoch and cannot be negative
    #[error("watermark must be >= 0, got {0}")]
    NegativeWatermark(i64),

    /// Acting principal must be attributable
    #[error("principal must not be empty")]
    EmptyPrincipal,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = TypesError::NegativeWatermark(-5);
        assert_eq!(err.to_string(), "watermark must be >= 0, got -5");

        let err = TypesError::InvalidId {
            kind: "team",
            value: "nope".into(),
        };
        assert_eq!(err.to_string(), "invalid team id: \"nope\"");
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<TypesError>();
    }
}
