//! Payment settlement for battery swaps
//!
//! Two cooperating parts:
//!
//! - **Return reconciliation**: turns a gateway return (direct redirect,
//!   foreign-origin interstitial, or a bare return after the backend already
//!   settled) plus the session's pending marker into one `PaymentOutcome`.
//! - **Swap workflow**: the operator-driven, strictly ordered sequence for
//!   one in-person transaction.
//!
//! # Return dispatch
//!
//! ```text
//! foreign origin? ── params ──────────▶ Navigate(canonical + same query)
//!        │         └─ no params ──────▶ inspect body ─▶ Navigate | error outcome
//!        ▼
//! noParams ▶ error ▶ backendProcessed ▶ gateway params ▶ (marker? poll : no-params)
//! ```
//!
//! # Invariants
//!
//! 1. **One outcome per return**: branches are exclusive, evaluated once
//! 2. **Clear iff success**: the pending marker is removed only by a
//!    successful outcome, so unsettled payments stay re-checkable
//! 3. **Whole units**: gateway amounts are divided by 100 on parse
//! 4. **No skipped stages**: each workflow action is legal from one stage only

pub mod api;
pub mod error;
pub mod marker;
pub mod outcome;
pub mod reconciler;
pub mod redirect;
pub mod return_params;
pub mod state;
pub mod types;
pub mod workflow;


// Re-exports for convenience
pub use api::{HttpPageSource, HttpTransactionApi, TransactionApi};
pub use error::{ApiError, StorageError, WorkflowError};
pub use marker::{
    FileSessionStorage, MemorySessionStorage, PendingMarkerStore, PendingTransactionMarker,
    SessionStorage,
};
pub use outcome::{OutcomeMessages, PaymentOutcome};
pub use reconciler::{ReturnAction, ReturnReconciler};
pub use redirect::{PageSource, RedirectRepair, RepairPlan};
pub use return_params::{BackendOutcome, GatewayReturnParams, ReturnSignal};
pub use state::{ProgressFlags, WorkflowAction, WorkflowStage};
pub use types::{
    PaymentInitiation, PaymentMethod, PaymentRecord, PaymentStatus, TransactionId,
    TransactionRecord, TransactionStatus,
};
pub use workflow::{ActiveTransaction, OperatorPrompt, PaymentStep, SwapTransactionWorkflow};
