//! Settlement Error Types
//!
//! Errors for backend calls, session storage and the staff workflow.
//! The reconciler folds every failure into a `PaymentOutcome`; these types
//! only cross the workflow and storage boundaries.

use thiserror::Error;

use super::state::{WorkflowAction, WorkflowStage};

/// Message shown when a failed action carries no server message.
pub const GENERIC_ACTION_FAILURE: &str = "Action failed, please try again";

/// Errors from the transaction backend
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// Backend answered but refused the request
    #[error("Rejected by server: {0}")]
    Rejected(String),

    #[error("Transaction not found: {0}")]
    NotFound(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Malformed response: {0}")]
    Decode(String),
}

impl ApiError {
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Rejected(_) => "REJECTED",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::Transport(_) => "TRANSPORT_ERROR",
            ApiError::Decode(_) => "DECODE_ERROR",
        }
    }

    /// Text for the operator: the server's own message when it sent one.
    pub fn user_message(&self) -> String {
        match self {
            ApiError::Rejected(msg) if !msg.trim().is_empty() => msg.clone(),
            _ => GENERIC_ACTION_FAILURE.to_string(),
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            ApiError::Decode(e.to_string())
        } else {
            ApiError::Transport(e.to_string())
        }
    }
}

/// Session storage errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Storage IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Staff workflow errors
///
/// Every variant leaves the in-memory stage untouched, so the operator can
/// retry the same step.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WorkflowError {
    #[error("No transaction is active")]
    NoActiveTransaction,

    #[error("Cannot {action} while transaction is {stage}")]
    OutOfOrder {
        stage: WorkflowStage,
        action: WorkflowAction,
    },

    #[error("Another action is still being processed")]
    Busy,

    #[error("Action cancelled by operator")]
    Declined,

    #[error("Transaction already completed: {0}")]
    AlreadyCompleted(String),

    #[error("Transaction was cancelled: {0}")]
    TransactionCancelled(String),

    #[error("Workflow changed while the action was in flight")]
    Superseded,

    #[error("Gateway did not return a payment URL")]
    MissingRedirect,

    #[error("{0}")]
    Action(String),

    #[error("Lookup failed: {0}")]
    Lookup(String),
}

impl WorkflowError {
    pub fn code(&self) -> &'static str {
        match self {
            WorkflowError::NoActiveTransaction => "NO_ACTIVE_TRANSACTION",
            WorkflowError::OutOfOrder { .. } => "OUT_OF_ORDER",
            WorkflowError::Busy => "BUSY",
            WorkflowError::Declined => "DECLINED",
            WorkflowError::AlreadyCompleted(_) => "ALREADY_COMPLETED",
            WorkflowError::TransactionCancelled(_) => "TRANSACTION_CANCELLED",
            WorkflowError::Superseded => "SUPERSEDED",
            WorkflowError::MissingRedirect => "MISSING_REDIRECT",
            WorkflowError::Action(_) => "ACTION_FAILED",
            WorkflowError::Lookup(_) => "LOOKUP_FAILED",
        }
    }

    /// Whether the same step can simply be tried again
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            WorkflowError::Busy
                | WorkflowError::Declined
                | WorkflowError::Action(_)
                | WorkflowError::Lookup(_)
                | WorkflowError::MissingRedirect
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_message_prefers_server_text() {
        let err = ApiError::Rejected("Station is offline".into());
        assert_eq!(err.user_message(), "Station is offline");
    }

    #[test]
    fn test_user_message_fallback() {
        assert_eq!(
            ApiError::Transport("connection reset".into()).user_message(),
            GENERIC_ACTION_FAILURE
        );
        assert_eq!(
            ApiError::Rejected("  ".into()).user_message(),
            GENERIC_ACTION_FAILURE
        );
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(ApiError::NotFound("T1".into()).code(), "NOT_FOUND");
        assert_eq!(WorkflowError::Busy.code(), "BUSY");
        assert_eq!(
            WorkflowError::OutOfOrder {
                stage: WorkflowStage::LookedUp,
                action: WorkflowAction::TakePayment,
            }
            .code(),
            "OUT_OF_ORDER"
        );
    }

    #[test]
    fn test_out_of_order_display() {
        let err = WorkflowError::OutOfOrder {
            stage: WorkflowStage::LookedUp,
            action: WorkflowAction::StartSwap,
        };
        assert_eq!(err.to_string(), "Cannot START_SWAP while transaction is LOOKED_UP");
    }

    #[test]
    fn test_retryable() {
        assert!(WorkflowError::Action("x".into()).is_retryable());
        assert!(!WorkflowError::NoActiveTransaction.is_retryable());
    }
}
