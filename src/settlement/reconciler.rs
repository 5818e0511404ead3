//! Return Reconciler
//!
//! Produces exactly one `PaymentOutcome` per return event. Dispatch is a
//! single `match` over [`ReturnSignal`], so the priority order is fixed by
//! the parser and no two branches can run for the same return.
//!
//! The pending marker is cleared if and only if the final outcome is a
//! success. A second pass after clearing therefore lands in the
//! "no parameters, no marker" failure instead of polling again.

use std::sync::Arc;

use tracing::{debug, info, warn};
use url::Url;

use super::api::TransactionApi;
use super::marker::{PendingMarkerStore, PendingTransactionMarker, SessionStorage};
use super::outcome::{OutcomeMessages, PaymentOutcome};
use super::redirect::{PageSource, RedirectRepair, RepairPlan};
use super::return_params::ReturnSignal;

/// Result of handling one return page load
#[derive(Debug, Clone, PartialEq)]
pub enum ReturnAction {
    /// Final answer for presentation
    Outcome(PaymentOutcome),
    /// Full navigation; the outcome is produced on the next load
    Navigate(Url),
}

pub struct ReturnReconciler<A: ?Sized, S> {
    api: Arc<A>,
    markers: PendingMarkerStore<S>,
    repair: Option<RedirectRepair>,
    messages: OutcomeMessages,
}

impl<A, S> ReturnReconciler<A, S>
where
    A: TransactionApi + ?Sized,
    S: SessionStorage,
{
    pub fn new(api: Arc<A>, markers: PendingMarkerStore<S>) -> Self {
        Self {
            api,
            markers,
            repair: None,
            messages: OutcomeMessages::default(),
        }
    }

    pub fn with_redirect_repair(mut self, repair: RedirectRepair) -> Self {
        self.repair = Some(repair);
        self
    }

    pub fn with_messages(mut self, messages: OutcomeMessages) -> Self {
        self.messages = messages;
        self
    }

    pub fn markers(&self) -> &PendingMarkerStore<S> {
        &self.markers
    }

    /// Entry point for a return page load at `current`.
    ///
    /// `page` is only read on the foreign-origin, no-parameter path.
    pub async fn handle_return(&self, current: &Url, page: &dyn PageSource) -> ReturnAction {
        let plan = match &self.repair {
            Some(repair) => repair.plan(current),
            None => RepairPlan::NotApplicable,
        };

        match plan {
            RepairPlan::Navigate(target) => ReturnAction::Navigate(target),
            RepairPlan::InspectBody => {
                let found = match &self.repair {
                    Some(repair) => repair.inspect(page).await,
                    None => None,
                };
                match found {
                    Some(target) => {
                        info!(to = %target, "Following backend redirect marker");
                        ReturnAction::Navigate(target)
                    }
                    None => {
                        let outcome = PaymentOutcome::processing_error(
                            None,
                            Some("redirect marker not found on return page".to_string()),
                            &self.messages,
                        );
                        ReturnAction::Outcome(self.finish(outcome, self.markers.read()))
                    }
                }
            }
            RepairPlan::NotApplicable => {
                ReturnAction::Outcome(self.reconcile(ReturnSignal::from_url(current)).await)
            }
        }
    }

    /// Resolve one return signal against the session's pending marker.
    pub async fn reconcile(&self, signal: ReturnSignal) -> PaymentOutcome {
        let marker = self.markers.read();
        debug!(
            target: "SETTLE",
            signal = signal.kind(),
            has_marker = marker.is_some(),
            "Reconciling payment return"
        );

        let outcome = match signal {
            ReturnSignal::NoParams { message } => PaymentOutcome::no_params(message, &self.messages),
            ReturnSignal::ProcessingError { message, error } => {
                PaymentOutcome::processing_error(message, error, &self.messages)
            }
            ReturnSignal::BackendProcessed(backend) => {
                PaymentOutcome::backend_processed(backend, &self.messages)
            }
            ReturnSignal::Gateway(params) => PaymentOutcome::from_gateway(params, &self.messages),
            ReturnSignal::Empty => match &marker {
                Some(m) => self.poll(m).await,
                None => PaymentOutcome::no_params(None, &self.messages),
            },
        };

        self.finish(outcome, marker)
    }

    /// Query the backend for a payment the gateway already settled.
    async fn poll(&self, marker: &PendingTransactionMarker) -> PaymentOutcome {
        match self.api.get_transaction(&marker.transaction_id).await {
            Ok(record) if record.has_completed_payment() => {
                info!(transaction_id = %marker.transaction_id, "Payment confirmed by backend");
                PaymentOutcome::settled(&record, &self.messages)
            }
            Ok(record) => {
                info!(
                    transaction_id = %marker.transaction_id,
                    status = ?record.status,
                    "No completed payment yet"
                );
                PaymentOutcome::unsettled(&record, &self.messages)
            }
            Err(e) => {
                warn!(
                    transaction_id = %marker.transaction_id,
                    error = %e,
                    "Payment status lookup failed"
                );
                PaymentOutcome::lookup_failed(e.to_string(), &self.messages)
            }
        }
    }

    /// Merge the marker and apply the clear-on-success rule.
    fn finish(
        &self,
        mut outcome: PaymentOutcome,
        marker: Option<PendingTransactionMarker>,
    ) -> PaymentOutcome {
        if let Some(m) = &marker {
            outcome.merge_saved(m);
        }

        if outcome.success {
            if let Err(e) = self.markers.clear() {
                warn!(error = %e, "Failed to clear pending payment marker");
            } else if let Some(m) = &marker {
                debug!(target: "SETTLE", transaction_id = %m.transaction_id, "Pending marker cleared");
            }
        }

        info!(
            success = outcome.success,
            backend_processed = outcome.backend_processed,
            "Payment outcome resolved"
        );
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settlement::api::mock::MockTransactionApi;
    use crate::settlement::error::ApiError;
    use crate::settlement::marker::MemorySessionStorage;
    use crate::settlement::types::{
        PaymentRecord, PaymentStatus, TransactionRecord, TransactionStatus,
    };
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use std::time::Duration;

    struct NoPage;

    #[async_trait]
    impl PageSource for NoPage {
        async fn body(&self) -> Result<String, ApiError> {
            Ok(String::new())
        }
    }

    fn record(payment: PaymentStatus) -> TransactionRecord {
        TransactionRecord {
            id: "T".into(),
            code: Some("SW-T".into()),
            status: TransactionStatus::Confirmed,
            arrival_confirmed: true,
            swapping_started: false,
            price: Some(dec!(150000)),
            payments: vec![PaymentRecord {
                id: Some("P1".into()),
                status: payment,
                method: None,
                price: Some(dec!(150000)),
            }],
        }
    }

    fn reconciler(
        api: MockTransactionApi,
    ) -> (
        ReturnReconciler<MockTransactionApi, Arc<MemorySessionStorage>>,
        Arc<MockTransactionApi>,
        Arc<MemorySessionStorage>,
    ) {
        let api = Arc::new(api);
        let storage = Arc::new(MemorySessionStorage::new());
        let rec = ReturnReconciler::new(api.clone(), PendingMarkerStore::new(storage.clone()));
        (rec, api, storage)
    }

    fn mark(rec: &ReturnReconciler<MockTransactionApi, Arc<MemorySessionStorage>>) {
        rec.markers()
            .write(&PendingTransactionMarker::new("T", Some("SW-T".into())))
            .unwrap();
    }

    #[tokio::test]
    async fn test_gateway_success_divides_amount() {
        let (rec, api, _) = reconciler(MockTransactionApi::new());
        let outcome = rec
            .reconcile(ReturnSignal::from_query(
                "responseCode=00&transactionId=GW-1&amount=10000000",
            ))
            .await;
        assert!(outcome.success);
        assert_eq!(outcome.amount, Some(dec!(100000)));
        assert_eq!(outcome.response_code.as_deref(), Some("00"));
        assert_eq!(api.lookup_count(), 0);
    }

    #[tokio::test]
    async fn test_gateway_failure_keeps_marker() {
        let (rec, _, _) = reconciler(MockTransactionApi::new());
        mark(&rec);
        let outcome = rec
            .reconcile(ReturnSignal::from_query("responseCode=24&amount=500000"))
            .await;
        assert!(!outcome.success);
        assert_eq!(outcome.saved_transaction_id.as_deref(), Some("T"));
        assert_eq!(outcome.saved_order_code.as_deref(), Some("SW-T"));
        assert!(rec.markers().read().is_some());
    }

    #[tokio::test]
    async fn test_gateway_success_clears_marker() {
        let (rec, _, _) = reconciler(MockTransactionApi::new());
        mark(&rec);
        let outcome = rec
            .reconcile(ReturnSignal::from_query("responseCode=00&amount=100"))
            .await;
        assert!(outcome.success);
        assert_eq!(outcome.saved_transaction_id.as_deref(), Some("T"));
        assert!(rec.markers().read().is_none());
    }

    #[tokio::test]
    async fn test_poll_settled() {
        let (rec, api, _) =
            reconciler(MockTransactionApi::new().with_record(record(PaymentStatus::Completed)));
        mark(&rec);

        let outcome = rec.reconcile(ReturnSignal::Empty).await;
        assert!(outcome.success);
        assert_eq!(outcome.amount, Some(dec!(150000)));
        assert_eq!(outcome.saved_order_code.as_deref(), Some("SW-T"));
        assert_eq!(api.lookup_count(), 1);
        assert!(rec.markers().read().is_none());
    }

    #[tokio::test]
    async fn test_poll_unsettled_keeps_marker() {
        let (rec, _, _) =
            reconciler(MockTransactionApi::new().with_record(record(PaymentStatus::Pending)));
        mark(&rec);

        let outcome = rec.reconcile(ReturnSignal::Empty).await;
        assert!(!outcome.success);
        assert_eq!(outcome.message, "Payment failed or not yet finished");
        assert_eq!(
            rec.markers().read().map(|m| m.transaction_id.to_string()),
            Some("T".to_string())
        );
    }

    #[tokio::test]
    async fn test_poll_lookup_failure_keeps_marker() {
        let (rec, api, _) = reconciler(MockTransactionApi::new());
        api.set_lookup_error(Some(ApiError::Transport("connection refused".into())));
        mark(&rec);

        let outcome = rec.reconcile(ReturnSignal::Empty).await;
        assert!(!outcome.success);
        assert_eq!(
            outcome.message,
            "Cannot verify payment status, please check your order"
        );
        assert_eq!(
            outcome.error.as_deref(),
            Some("Transport error: connection refused")
        );
        assert!(rec.markers().read().is_some());
    }

    #[tokio::test]
    async fn test_second_pass_is_terminal() {
        let (rec, api, _) =
            reconciler(MockTransactionApi::new().with_record(record(PaymentStatus::Completed)));
        mark(&rec);

        assert!(rec.reconcile(ReturnSignal::Empty).await.success);
        let second = rec.reconcile(ReturnSignal::Empty).await;

        assert!(!second.success);
        assert_eq!(second.message, "Payment information not found");
        assert_eq!(second.saved_transaction_id, None);
        assert_eq!(api.lookup_count(), 1);
    }

    #[tokio::test]
    async fn test_explicit_no_params_does_not_poll() {
        let (rec, api, _) =
            reconciler(MockTransactionApi::new().with_record(record(PaymentStatus::Completed)));
        mark(&rec);

        let outcome = rec
            .reconcile(ReturnSignal::NoParams { message: None })
            .await;
        assert!(!outcome.success);
        assert_eq!(outcome.saved_transaction_id.as_deref(), Some("T"));
        assert_eq!(api.lookup_count(), 0);
    }

    #[tokio::test]
    async fn test_backend_processed_is_verbatim() {
        let (rec, _, _) = reconciler(MockTransactionApi::new());
        mark(&rec);

        let outcome = rec
            .reconcile(ReturnSignal::from_query(
                "backendProcessed=true&success=true&amount=150000&message=Done",
            ))
            .await;
        assert!(outcome.success);
        assert!(outcome.backend_processed);
        assert_eq!(outcome.message, "Done");
        assert_eq!(outcome.amount, Some(dec!(150000)));
        assert!(rec.markers().read().is_none());
    }

    #[tokio::test]
    async fn test_backend_processed_without_success_key_settles() {
        let (rec, _, _) = reconciler(MockTransactionApi::new());
        mark(&rec);

        let outcome = rec
            .reconcile(ReturnSignal::from_query("backendProcessed=true&amount=120000"))
            .await;
        assert!(outcome.success);
        assert_eq!(outcome.message, "Payment has been processed");
        assert_eq!(outcome.amount, Some(dec!(120000)));
        assert!(rec.markers().read().is_none());

        mark(&rec);
        let refused = rec
            .reconcile(ReturnSignal::from_query("backendProcessed=true&success=false"))
            .await;
        assert!(!refused.success);
        assert_eq!(refused.message, "Payment failed");
        assert!(rec.markers().read().is_some());
    }

    #[tokio::test]
    async fn test_foreign_origin_error_keeps_upstream_detail() {
        let (rec, _, _) = reconciler(MockTransactionApi::new());
        let rec = rec.with_redirect_repair(
            RedirectRepair::new(Url::parse("https://app.example.com").unwrap(), "/payment/return")
                .with_foreign_origins(["https://api.example.com"])
                .with_inspect_delay(Duration::ZERO),
        );

        let foreign =
            Url::parse("https://api.example.com/api/payments/return?error=Invalid%20signature")
                .unwrap();
        let ReturnAction::Navigate(target) = rec.handle_return(&foreign, &NoPage).await else {
            panic!("expected navigation to the canonical page");
        };
        let ReturnAction::Outcome(outcome) = rec.handle_return(&target, &NoPage).await else {
            panic!("expected outcome");
        };
        assert!(!outcome.success);
        assert_eq!(outcome.error.as_deref(), Some("Invalid signature"));
    }

    #[tokio::test]
    async fn test_processing_error() {
        let (rec, _, _) = reconciler(MockTransactionApi::new());
        let outcome = rec
            .reconcile(ReturnSignal::from_query("error=upstream%20exploded"))
            .await;
        assert!(!outcome.success);
        assert_eq!(outcome.error.as_deref(), Some("upstream exploded"));
        assert_eq!(
            outcome.message,
            "An error occurred while processing the payment"
        );
    }

    #[tokio::test]
    async fn test_custom_messages() {
        let (rec, _, _) = reconciler(MockTransactionApi::new());
        let rec = rec.with_messages(OutcomeMessages {
            no_params: "Không tìm thấy thông tin thanh toán".into(),
            ..Default::default()
        });
        let outcome = rec.reconcile(ReturnSignal::Empty).await;
        assert_eq!(outcome.message, "Không tìm thấy thông tin thanh toán");
    }

    #[tokio::test]
    async fn test_handle_return_without_repair_parses_params() {
        let (rec, _, _) = reconciler(MockTransactionApi::new());
        let url = Url::parse("https://app.example.com/payment/return?responseCode=00").unwrap();
        let ReturnAction::Outcome(outcome) = rec.handle_return(&url, &NoPage).await else {
            panic!("expected outcome");
        };
        assert!(outcome.success);
    }

    #[tokio::test]
    async fn test_handle_return_missing_marker_on_foreign_page() {
        let (rec, _, _) = reconciler(MockTransactionApi::new());
        let rec = rec.with_redirect_repair(
            RedirectRepair::new(Url::parse("https://app.example.com").unwrap(), "/payment/return")
                .with_foreign_origins(["https://api.example.com"])
                .with_inspect_delay(Duration::ZERO),
        );
        mark(&rec);

        let url = Url::parse("https://api.example.com/api/payments/return").unwrap();
        let ReturnAction::Outcome(outcome) = rec.handle_return(&url, &NoPage).await else {
            panic!("expected outcome");
        };
        assert!(!outcome.success);
        assert_eq!(
            outcome.message,
            "An error occurred while processing the payment"
        );
        assert!(rec.markers().read().is_some());
    }
}
