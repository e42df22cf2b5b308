//! Error types for KyroTMS.
//!
//! All errors are strongly typed using thiserror so callers can match on
//! specific conditions. Conflicts between beliefs are *not* errors; they are
//! reported as [`crate::conflict::Conflict`] values.

use thiserror::Error;

/// Validation errors raised before any state is touched.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("Belief name cannot be empty")]
    EmptyBeliefName,

    #[error("Agent id cannot be empty")]
    EmptyAgentId,

    #[error("Confidence value {value} is out of range [0.0, 1.0]")]
    ConfidenceOutOfRange {
        value: f32,
    },

    #[error("Justification for '{conclusion}' lists its own conclusion as both premise and negative premise")]
    SelfDefeatingJustification {
        conclusion: String,
    },

    #[error("Required field '{field}' is missing")]
    MissingField {
        field: String,
    },

    #[error("Field '{field}' exceeds maximum length of {max_length}")]
    FieldTooLong {
        field: String,
        max_length: usize,
    },

    #[error("Invalid field '{field}': {reason}")]
    InvalidField {
        field: String,
        reason: String,
    },

    #[error("Invalid configuration: {reason}")]
    InvalidConfig {
        reason: String,
    },
}

/// Execution errors that occur while running an operation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExecutionError {
    #[error("Belief not found: {name}")]
    BeliefNotFound {
        name: String,
    },

    #[error("Agent not found: {agent}")]
    AgentNotFound {
        agent: String,
    },

    #[error("Checkpoint not found: {id}")]
    CheckpointNotFound {
        id: String,
    },

    #[error("Sync operation not found: {id}")]
    SyncOperationNotFound {
        id: String,
    },

    #[error("Collaboration not found: {id}")]
    CollaborationNotFound {
        id: String,
    },

    #[error("Message not found: {id}")]
    MessageNotFound {
        id: String,
    },

    #[error("Agent '{agent}' is already registered")]
    DuplicateRegistration {
        agent: String,
    },

    #[error("Sync operation {operation} left {unresolved} conflict(s) unresolved")]
    SyncConflict {
        operation: String,
        unresolved: usize,
    },

    #[error("Sync operation {id} cannot be cancelled in status '{status}'")]
    NotCancellable {
        id: String,
        status: String,
    },

    #[error("Operation timed out after {duration_ms}ms")]
    Timeout {
        duration_ms: u64,
    },

    #[error("Queue '{path}' is full (capacity {capacity})")]
    QueueFull {
        path: String,
        capacity: usize,
    },

    #[error("Channel '{path}' disconnected")]
    Disconnected {
        path: String,
    },

    #[error("Poisoned lock: {context}")]
    LockPoisoned {
        context: String,
    },

    #[error("Archive error: {message}")]
    Archive {
        message: String,
    },
}

/// Failures of external collaborators (text generation, formal logic).
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CollaboratorError {
    #[error("Collaborator '{collaborator}' is not available")]
    Unavailable {
        collaborator: String,
    },

    #[error("Collaborator '{collaborator}' failed: {message}")]
    Failed {
        collaborator: String,
        message: String,
    },

    #[error("Collaborator '{collaborator}' returned empty output")]
    EmptyOutput {
        collaborator: String,
    },
}

/// Top-level error type for KyroTMS.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TmsError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    #[error("Collaborator error: {0}")]
    Collaborator(#[from] CollaboratorError),

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl TmsError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Shorthand for a missing belief.
    #[must_use]
    pub fn belief_not_found(name: impl Into<String>) -> Self {
        Self::Execution(ExecutionError::BeliefNotFound { name: name.into() })
    }

    /// Shorthand for an unknown agent.
    #[must_use]
    pub fn agent_not_found(agent: impl Into<String>) -> Self {
        Self::Execution(ExecutionError::AgentNotFound { agent: agent.into() })
    }

    /// Shorthand for a poisoned lock.
    #[must_use]
    pub fn lock_poisoned(context: impl Into<String>) -> Self {
        Self::Execution(ExecutionError::LockPoisoned {
            context: context.into(),
        })
    }

    /// Returns true if this is a validation error.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if this is an execution error.
    #[must_use]
    pub const fn is_execution(&self) -> bool {
        matches!(self, Self::Execution(_))
    }

    /// Returns true if an external collaborator failed or is absent.
    #[must_use]
    pub const fn is_collaborator(&self) -> bool {
        matches!(self, Self::Collaborator(_))
    }

    /// Returns true if this is an internal error.
    #[must_use]
    pub const fn is_internal(&self) -> bool {
        matches!(self, Self::Internal { .. })
    }

    /// Returns true if an unknown belief, agent, or record was referenced.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::Execution(
                ExecutionError::BeliefNotFound { .. }
                    | ExecutionError::AgentNotFound { .. }
                    | ExecutionError::CheckpointNotFound { .. }
                    | ExecutionError::SyncOperationNotFound { .. }
                    | ExecutionError::CollaborationNotFound { .. }
                    | ExecutionError::MessageNotFound { .. }
            )
        )
    }

    /// Returns true if this error is retryable.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Validation(_) => false,
            Self::Execution(e) => matches!(
                e,
                ExecutionError::Timeout { .. } | ExecutionError::QueueFull { .. }
            ),
            Self::Collaborator(e) => matches!(e, CollaboratorError::Failed { .. }),
            Self::Internal { .. } => false,
        }
    }
}

/// Result type alias for KyroTMS operations.
pub type TmsResult<T> = Result<T, TmsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_confidence() {
        let err = ValidationError::ConfidenceOutOfRange { value: 1.5 };
        let msg = format!("{err}");
        assert!(msg.contains("1.5"));
        assert!(msg.contains("out of range"));
    }

    #[test]
    fn test_self_defeating_justification_message() {
        let err = ValidationError::SelfDefeatingJustification {
            conclusion: "guilty".to_string(),
        };
        assert!(format!("{err}").contains("guilty"));
    }

    #[test]
    fn test_not_found_predicates() {
        assert!(TmsError::belief_not_found("x").is_not_found());
        assert!(TmsError::agent_not_found("a").is_not_found());
        let dup: TmsError = ExecutionError::DuplicateRegistration {
            agent: "a".to_string(),
        }
        .into();
        assert!(!dup.is_not_found());
        assert!(dup.is_execution());
    }

    #[test]
    fn test_sync_conflict_message() {
        let err = ExecutionError::SyncConflict {
            operation: "op-1".to_string(),
            unresolved: 3,
        };
        let msg = format!("{err}");
        assert!(msg.contains("op-1"));
        assert!(msg.contains('3'));
    }

    #[test]
    fn test_collaborator_error() {
        let err: TmsError = CollaboratorError::Unavailable {
            collaborator: "text_generator".to_string(),
        }
        .into();
        assert!(err.is_collaborator());
        assert!(!err.is_retryable());

        let failed: TmsError = CollaboratorError::Failed {
            collaborator: "text_generator".to_string(),
            message: "503".to_string(),
        }
        .into();
        assert!(failed.is_retryable());
    }

    #[test]
    fn test_tms_error_retryable() {
        let err1: TmsError = ValidationError::EmptyBeliefName.into();
        assert!(!err1.is_retryable());

        let err2: TmsError = ExecutionError::Timeout { duration_ms: 100 }.into();
        assert!(err2.is_retryable());

        let err3 = TmsError::internal("unexpected state");
        assert!(err3.is_internal());
        assert!(!err3.is_retryable());
        assert!(format!("{err3}").contains("unexpected state"));
    }
}
