//! Firewall rule errors

use thiserror::Error;

/// Errors raised while compiling or evaluating a firewall rule
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FirewallError {
    /// Expression text is malformed
    #[error("parse error at offset {offset}: {message}")]
    Parse {
        /// Byte offset of the offending token.
        offset: usize,
        /// What went wrong.
        message: String,
    },

    /// Infix operator is not registered
    #[error("unknown operator '{0}'")]
    UnknownOperator(String),

    /// Fact path is not part of the fact map
    #[error("unknown fact '{0}'")]
    UnknownFact(String),

    /// Operand types do not fit the operation
    #[error("type mismatch: {0}")]
    TypeMismatch(String),

    /// A registered operator reported an error
    #[error("operator '{name}' failed: {message}")]
    Operator {
        /// Operator name.
        name: String,
        /// Failure message.
        message: String,
    },
}

/// Result type for firewall operations
pub type FirewallResult<T> = Result<T, FirewallError>;

impl FirewallError {
    pub(crate) fn parse(offset: usize, message: impl Into<String>) -> Self {
        Self::Parse {
            offset,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = FirewallError::parse(7, "expected ')'");
        assert_eq!(err.to_string(), "parse error at offset 7: expected ')'");

        let err = FirewallError::UnknownOperator("like".to_string());
        assert!(err.to_string().contains("like"));
    }
}
