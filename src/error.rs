// ⚠️ Error taxonomy for the payment pipeline
//
// Retryable I/O and database failures roll the whole step back.
// Data-quality problems travel as ValidationIssue lists.
// Business rejections are NOT errors: they are terminal states (see writeback.rs).
// Invariant violations abort the step and must never reach a writeback silently.

use crate::ach::NachaError;
use crate::state_log::{State, ValidationIssue};
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("NACHA encoding error: {0}")]
    Nacha(#[from] NachaError),

    #[error("validation failed: {}", format_issues(.0))]
    Validation(Vec<ValidationIssue>),

    #[error("unknown payment id {0} in returned file")]
    UnknownPayment(String),

    #[error("payment {payment_id} is in state '{actual}', expected '{expected}'")]
    UnexpectedState {
        payment_id: Uuid,
        expected: &'static str,
        actual: String,
    },

    #[error("file {0} has already been processed")]
    DuplicateFile(String),

    #[error("invariant violated: {0}")]
    InvariantViolation(String),
}

impl PipelineError {
    pub fn invariant(message: impl Into<String>) -> Self {
        PipelineError::InvariantViolation(message.into())
    }

    pub fn unexpected_state(payment_id: Uuid, expected: State, actual: Option<State>) -> Self {
        PipelineError::UnexpectedState {
            payment_id,
            expected: expected.description(),
            actual: actual
                .map(|s| s.description().to_string())
                .unwrap_or_else(|| "<none>".to_string()),
        }
    }

    /// Whether rerunning the whole step could succeed without any input change.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PipelineError::Database(_) | PipelineError::Io(_))
    }
}

fn format_issues(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_log::ValidationReason;

    #[test]
    fn test_retryable_classification() {
        let io = PipelineError::Io(std::io::Error::other("disk gone"));
        assert!(io.is_retryable());

        let invariant = PipelineError::invariant("rule ran twice");
        assert!(!invariant.is_retryable());

        let unknown = PipelineError::UnknownPayment("abc".to_string());
        assert!(!unknown.is_retryable());
    }

    #[test]
    fn test_validation_message_lists_every_issue() {
        let err = PipelineError::Validation(vec![
            ValidationIssue::new(ValidationReason::MissingField, "amount"),
            ValidationIssue::new(ValidationReason::InvalidValue, "period_end before period_start"),
        ]);

        let message = err.to_string();
        assert!(message.contains("amount"));
        assert!(message.contains("period_end before period_start"));
    }
}
