//! Swap Workflow State Definitions
//!
//! ```text
//! LOOKED_UP → ARRIVAL_CONFIRMED → PAID → SWAP_STARTED → COMPLETED
//! ```
//!
//! Strictly ordered: each action is legal from exactly one stage.

use std::fmt;

use serde::Serialize;

use super::types::{TransactionRecord, TransactionStatus};

/// Stage of the in-person swap transaction
///
/// Ordered: a later variant never precedes an earlier one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(i16)]
pub enum WorkflowStage {
    /// Transaction found by staff, nothing confirmed yet
    LookedUp = 0,
    ArrivalConfirmed = 10,
    /// Payment completed (cash, or gateway return already settled)
    Paid = 20,
    SwapStarted = 30,
    /// Terminal
    Completed = 40,
}

/// Operator action driving one transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowAction {
    ConfirmArrival,
    TakePayment,
    StartSwap,
    CompleteSwap,
}

impl WorkflowStage {
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkflowStage::Completed)
    }

    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowStage::LookedUp => "LOOKED_UP",
            WorkflowStage::ArrivalConfirmed => "ARRIVAL_CONFIRMED",
            WorkflowStage::Paid => "PAID",
            WorkflowStage::SwapStarted => "SWAP_STARTED",
            WorkflowStage::Completed => "COMPLETED",
        }
    }

    /// The one action allowed from this stage
    pub fn next_action(&self) -> Option<WorkflowAction> {
        match self {
            WorkflowStage::LookedUp => Some(WorkflowAction::ConfirmArrival),
            WorkflowStage::ArrivalConfirmed => Some(WorkflowAction::TakePayment),
            WorkflowStage::Paid => Some(WorkflowAction::StartSwap),
            WorkflowStage::SwapStarted => Some(WorkflowAction::CompleteSwap),
            WorkflowStage::Completed => None,
        }
    }

    /// Transition function. Out-of-order actions return `None`.
    pub fn advance(self, action: WorkflowAction) -> Option<WorkflowStage> {
        if self.next_action() != Some(action) {
            return None;
        }
        Some(action.target_stage())
    }

    /// Derive the stage of a looked-up transaction from backend state,
    /// so a lookup after a gateway return resumes where it left off.
    pub fn from_record(record: &TransactionRecord) -> WorkflowStage {
        if record.status == TransactionStatus::Completed {
            WorkflowStage::Completed
        } else if record.swapping_started || record.status == TransactionStatus::InProgress {
            WorkflowStage::SwapStarted
        } else if record.arrival_confirmed && record.has_completed_payment() {
            // A payment taken ahead of arrival does not skip the arrival step
            WorkflowStage::Paid
        } else if record.arrival_confirmed {
            WorkflowStage::ArrivalConfirmed
        } else {
            WorkflowStage::LookedUp
        }
    }

    pub fn flags(&self) -> ProgressFlags {
        ProgressFlags {
            arrival_confirmed: *self >= WorkflowStage::ArrivalConfirmed,
            payment_completed: *self >= WorkflowStage::Paid,
            swapping_started: *self >= WorkflowStage::SwapStarted,
            completed: *self == WorkflowStage::Completed,
        }
    }
}

impl WorkflowAction {
    /// Stage the action must start from
    pub fn required_stage(&self) -> WorkflowStage {
        match self {
            WorkflowAction::ConfirmArrival => WorkflowStage::LookedUp,
            WorkflowAction::TakePayment => WorkflowStage::ArrivalConfirmed,
            WorkflowAction::StartSwap => WorkflowStage::Paid,
            WorkflowAction::CompleteSwap => WorkflowStage::SwapStarted,
        }
    }

    /// Stage reached when the action succeeds
    pub fn target_stage(&self) -> WorkflowStage {
        match self {
            WorkflowAction::ConfirmArrival => WorkflowStage::ArrivalConfirmed,
            WorkflowAction::TakePayment => WorkflowStage::Paid,
            WorkflowAction::StartSwap => WorkflowStage::SwapStarted,
            WorkflowAction::CompleteSwap => WorkflowStage::Completed,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowAction::ConfirmArrival => "CONFIRM_ARRIVAL",
            WorkflowAction::TakePayment => "TAKE_PAYMENT",
            WorkflowAction::StartSwap => "START_SWAP",
            WorkflowAction::CompleteSwap => "COMPLETE_SWAP",
        }
    }

    /// Question put to the operator before the action call
    pub fn prompt(&self, code: &str) -> String {
        match self {
            WorkflowAction::ConfirmArrival => {
                format!("Confirm customer arrival for transaction {code}?")
            }
            WorkflowAction::TakePayment => format!("Take payment for transaction {code}?"),
            WorkflowAction::StartSwap => format!("Start battery swap for transaction {code}?"),
            WorkflowAction::CompleteSwap => {
                format!("Mark battery swap for transaction {code} as completed?")
            }
        }
    }
}

impl fmt::Display for WorkflowStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl fmt::Display for WorkflowAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Boolean progress view for presentation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressFlags {
    pub arrival_confirmed: bool,
    pub payment_completed: bool,
    pub swapping_started: bool,
    pub completed: bool,
}
