//! Swap Settlement - payment settlement for battery-swap stations
//!
//! # Modules
//!
//! - [`settlement`] - Gateway return reconciliation and the staff swap workflow
//! - [`money`] - Gateway minor-unit and currency amount parsing
//! - [`config`] - YAML configuration per environment
//! - [`logging`] - tracing subscriber setup

pub mod config;
pub mod logging;
pub mod money;
pub mod settlement;

// Convenient re-exports at crate root
pub use config::{AppConfig, ConfigError};
pub use settlement::{
    ApiError, FileSessionStorage, HttpPageSource, HttpTransactionApi, MemorySessionStorage,
    OperatorPrompt, PaymentMethod, PaymentOutcome, PendingMarkerStore, PendingTransactionMarker,
    ReturnAction, ReturnReconciler, ReturnSignal, SwapTransactionWorkflow, TransactionApi,
    TransactionId, WorkflowError, WorkflowStage,
};
