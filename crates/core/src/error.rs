//! Domain error model.

use core::fmt;

use thiserror::Error;

pub type DomainResult<T> = Result<T, DomainError>;

/// Deterministic failures of the domain layer. IO and transport errors live in infra.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Malformed caller input.
    #[error("validation failed: {0}")]
    Validation(String),

    /// A state the model must never reach (counter regression, overflow).
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A status move missing from the entity's transition table.
    #[error("illegal {entity} transition: {from} -> {to}")]
    IllegalTransition {
        entity: &'static str,
        from: String,
        to: String,
    },
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        DomainError::Validation(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        DomainError::InvariantViolation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        DomainError::InvalidId(msg.into())
    }

    pub fn illegal_transition(entity: &'static str, from: impl fmt::Display, to: impl fmt::Display) -> Self {
        DomainError::IllegalTransition {
            entity,
            from: from.to_string(),
            to: to.to_string(),
        }
    }
}
