//! Staff Swap Transaction Workflow
//!
//! Drives one transaction at a time through
//! `LOOKED_UP → ARRIVAL_CONFIRMED → PAID → SWAP_STARTED → COMPLETED`.
//!
//! Every step is: check stage → operator yes/no prompt → one action call →
//! advance on success. A failed call leaves the stage untouched so the same
//! step can be retried. Cancel only drops local state; server-side steps
//! already confirmed stay confirmed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use serde::Serialize;
use tracing::{info, warn};

use super::api::TransactionApi;
use super::error::{ApiError, WorkflowError};
use super::marker::{PendingMarkerStore, PendingTransactionMarker, SessionStorage};
use super::state::{ProgressFlags, WorkflowAction, WorkflowStage};
use super::types::{PaymentMethod, TransactionId, TransactionStatus};

/// Blocking yes/no confirmation shown to the operator
#[async_trait]
pub trait OperatorPrompt: Send + Sync {
    async fn confirm(&self, question: &str) -> bool;
}

/// Transaction currently handled by the operator
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveTransaction {
    pub transaction_id: TransactionId,
    pub code: String,
    pub stage: WorkflowStage,
    /// Backend already holds a completed payment
    pub payment_settled: bool,
}

impl ActiveTransaction {
    pub fn flags(&self) -> ProgressFlags {
        self.stage.flags()
    }
}

/// Result of the payment step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentStep {
    /// Cash taken, stage is now PAID
    Completed { message: Option<String> },
    /// Navigate to the gateway; the return page settles the payment
    Redirect(String),
}

/// Releases the `processing` flag even if the future is dropped mid-call
struct ProcessingGuard<'a>(&'a AtomicBool);

impl<'a> ProcessingGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Result<Self, WorkflowError> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| WorkflowError::Busy)?;
        Ok(Self(flag))
    }
}

impl Drop for ProcessingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct SwapTransactionWorkflow<A: ?Sized, S, P> {
    api: Arc<A>,
    markers: PendingMarkerStore<S>,
    prompt: P,
    active: Mutex<Option<ActiveTransaction>>,
    processing: AtomicBool,
}

impl<A, S, P> SwapTransactionWorkflow<A, S, P>
where
    A: TransactionApi + ?Sized,
    S: SessionStorage,
    P: OperatorPrompt,
{
    pub fn new(api: Arc<A>, markers: PendingMarkerStore<S>, prompt: P) -> Self {
        Self {
            api,
            markers,
            prompt,
            active: Mutex::new(None),
            processing: AtomicBool::new(false),
        }
    }

    fn active_slot(&self) -> MutexGuard<'_, Option<ActiveTransaction>> {
        // No await ever happens under this lock; a poisoned slot is still coherent
        self.active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn current(&self) -> Option<ActiveTransaction> {
        self.active_slot().clone()
    }

    /// True while an action call is outstanding (UI disables the control)
    pub fn is_processing(&self) -> bool {
        self.processing.load(Ordering::Acquire)
    }

    pub fn markers(&self) -> &PendingMarkerStore<S> {
        &self.markers
    }

    /// Look up a transaction and make it the active one.
    ///
    /// The stage is derived from backend state so a partially processed
    /// transaction resumes where it stopped.
    pub async fn lookup(&self, id: &TransactionId) -> Result<ActiveTransaction, WorkflowError> {
        let _guard = ProcessingGuard::acquire(&self.processing)?;

        let record = self
            .api
            .get_transaction(id)
            .await
            .map_err(|e| {
                WorkflowError::Lookup(match &e {
                    ApiError::NotFound(_) => e.to_string(),
                    _ => e.user_message(),
                })
            })?;

        match record.status {
            TransactionStatus::Completed => {
                return Err(WorkflowError::AlreadyCompleted(record.id.to_string()));
            }
            TransactionStatus::Cancelled => {
                return Err(WorkflowError::TransactionCancelled(record.id.to_string()));
            }
            _ => {}
        }

        let active = ActiveTransaction {
            transaction_id: record.id.clone(),
            code: record.display_code().to_string(),
            stage: WorkflowStage::from_record(&record),
            payment_settled: record.has_completed_payment(),
        };
        info!(
            transaction_id = %active.transaction_id,
            stage = %active.stage,
            "Transaction looked up"
        );
        *self.active_slot() = Some(active.clone());
        Ok(active)
    }

    pub async fn confirm_arrival(&self) -> Result<ActiveTransaction, WorkflowError> {
        self.run_step(WorkflowAction::ConfirmArrival, |api, id| async move {
            api.confirm_arrival(&id).await
        })
        .await
    }

    /// Take payment. CASH settles immediately; GATEWAY writes the pending
    /// marker and hands back the gateway URL, the stage stays unpaid.
    pub async fn take_payment(&self, method: PaymentMethod) -> Result<PaymentStep, WorkflowError> {
        let action = WorkflowAction::TakePayment;
        let _guard = ProcessingGuard::acquire(&self.processing)?;
        let active = self.expect_stage(action)?;

        if !self.prompt.confirm(&action.prompt(&active.code)).await {
            return Err(WorkflowError::Declined);
        }

        let initiation = self
            .api
            .process_payment(&active.transaction_id, method)
            .await
            .map_err(|e| self.action_failed(&active, action, e))?;

        match method {
            PaymentMethod::Cash => {
                self.apply(&active, action)?;
                if let Err(e) = self.markers.clear() {
                    warn!(error = %e, "Failed to clear pending payment marker");
                }
                Ok(PaymentStep::Completed {
                    message: initiation.message,
                })
            }
            PaymentMethod::Gateway => {
                let url = initiation
                    .payment_url
                    .filter(|u| !u.trim().is_empty())
                    .ok_or(WorkflowError::MissingRedirect)?;
                let marker = PendingTransactionMarker::new(
                    active.transaction_id.clone(),
                    Some(active.code.clone()),
                );
                // Held across the write so a cancel cannot slip in between
                let _slot = self.still_active(&active, action)?;
                // Marker must exist before the browser leaves
                if let Err(e) = self.markers.write(&marker) {
                    warn!(
                        transaction_id = %active.transaction_id,
                        error = %e,
                        "Failed to persist pending payment marker"
                    );
                    return Err(WorkflowError::Action(
                        "Cannot remember the pending payment, please retry".to_string(),
                    ));
                }
                info!(transaction_id = %active.transaction_id, "Redirecting to payment gateway");
                Ok(PaymentStep::Redirect(url))
            }
        }
    }

    pub async fn start_swap(&self) -> Result<ActiveTransaction, WorkflowError> {
        self.run_step(WorkflowAction::StartSwap, |api, id| async move {
            api.start_swap(&id).await
        })
        .await
    }

    /// Complete the swap; on success the workflow is reset for the next
    /// transaction and the completed one is returned.
    pub async fn complete_swap(&self) -> Result<ActiveTransaction, WorkflowError> {
        let done = self
            .run_step(WorkflowAction::CompleteSwap, |api, id| async move {
                api.complete_swap(&id).await
            })
            .await?;
        *self.active_slot() = None;
        Ok(done)
    }

    /// Drop local state unconditionally.
    pub fn cancel(&self) {
        if let Some(prev) = self.active_slot().take() {
            info!(
                transaction_id = %prev.transaction_id,
                stage = %prev.stage,
                "Workflow cancelled"
            );
        }
    }

    async fn run_step<F, Fut>(
        &self,
        action: WorkflowAction,
        call: F,
    ) -> Result<ActiveTransaction, WorkflowError>
    where
        F: FnOnce(Arc<A>, TransactionId) -> Fut,
        Fut: std::future::Future<Output = Result<(), ApiError>>,
    {
        let _guard = ProcessingGuard::acquire(&self.processing)?;
        let active = self.expect_stage(action)?;

        if !self.prompt.confirm(&action.prompt(&active.code)).await {
            return Err(WorkflowError::Declined);
        }

        call(self.api.clone(), active.transaction_id.clone())
            .await
            .map_err(|e| self.action_failed(&active, action, e))?;

        self.apply(&active, action)
    }

    fn expect_stage(&self, action: WorkflowAction) -> Result<ActiveTransaction, WorkflowError> {
        let active = self
            .active_slot()
            .clone()
            .ok_or(WorkflowError::NoActiveTransaction)?;
        if active.stage != action.required_stage() {
            return Err(WorkflowError::OutOfOrder {
                stage: active.stage,
                action,
            });
        }
        Ok(active)
    }

    /// Lock the active slot if it still holds `before`
    fn still_active(
        &self,
        before: &ActiveTransaction,
        action: WorkflowAction,
    ) -> Result<MutexGuard<'_, Option<ActiveTransaction>>, WorkflowError> {
        let slot = self.active_slot();
        if slot.as_ref() != Some(before) {
            warn!(
                transaction_id = %before.transaction_id,
                action = %action,
                "Workflow changed during action call, result not applied"
            );
            return Err(WorkflowError::Superseded);
        }
        Ok(slot)
    }

    /// Advance the stored transaction, unless it changed during the call
    fn apply(
        &self,
        before: &ActiveTransaction,
        action: WorkflowAction,
    ) -> Result<ActiveTransaction, WorkflowError> {
        let mut slot = self.still_active(before, action)?;
        let Some(current) = slot.as_mut() else {
            return Err(WorkflowError::Superseded);
        };
        current.stage = current
            .stage
            .advance(action)
            .ok_or(WorkflowError::OutOfOrder {
                stage: current.stage,
                action,
            })?;
        if current.stage == WorkflowStage::ArrivalConfirmed && current.payment_settled {
            // Never charge twice for a transaction paid ahead of arrival
            current.stage = WorkflowStage::Paid;
        }
        info!(
            transaction_id = %current.transaction_id,
            stage = %current.stage,
            "Workflow advanced"
        );
        Ok(current.clone())
    }

    fn action_failed(
        &self,
        active: &ActiveTransaction,
        action: WorkflowAction,
        err: ApiError,
    ) -> WorkflowError {
        warn!(
            transaction_id = %active.transaction_id,
            action = %action,
            code = err.code(),
            error = %err,
            "Action call failed"
        );
        WorkflowError::Action(err.user_message())
    }
}
