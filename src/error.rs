//! Typed failures for the query-resolution pipeline.
//!
//! The orchestrator routes on error kind: [`PipelineError::ValidationRejected`]
//! and [`PipelineError::ExecutionFailed`] drive the bounded repair loop, while
//! [`PipelineError::CollaboratorUnavailable`] is fatal to the turn and is never
//! counted against the repair ceiling. Everything terminates at a user-legible
//! answer; nothing propagates past `Orchestrator::run`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// The guardrail validator rejected a candidate statement.
    #[error("validation rejected: {reason}")]
    ValidationRejected { reason: String },

    /// The target database rejected an otherwise valid statement
    /// (unknown column, type mismatch, malformed SQL it accepted to parse).
    #[error("execution failed: {message}")]
    ExecutionFailed { message: String },

    /// An external collaborator (completion API, database connection) is
    /// unreachable or exceeded its deadline. Fatal to the turn.
    #[error("collaborator unavailable: {message}")]
    CollaboratorUnavailable { message: String },

    /// The generator declined to produce SQL for the question
    /// (unanswerable against the schema, or out of scope). Terminal,
    /// not eligible for repair.
    #[error("generation refused: {explanation}")]
    GenerationRefused { explanation: String },

    /// An annotation targeted a table or column that is not in the graph.
    #[error("entity not found: {entity}")]
    EntityNotFound { entity: String },
}

impl PipelineError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::CollaboratorUnavailable {
            message: message.into(),
        }
    }

    /// Whether this failure is eligible for the repair loop.
    pub fn is_repairable(&self) -> bool {
        matches!(
            self,
            Self::ValidationRejected { .. } | Self::ExecutionFailed { .. }
        )
    }

    /// The error text handed back to the generator on a repair pass.
    pub fn repair_detail(&self) -> String {
        match self {
            Self::ValidationRejected { reason } => reason.clone(),
            Self::ExecutionFailed { message } => message.clone(),
            other => other.to_string(),
        }
    }
}
