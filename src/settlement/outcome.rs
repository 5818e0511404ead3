//! Canonical payment outcome
//!
//! Every return path ends in exactly one `PaymentOutcome`.

use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::marker::PendingTransactionMarker;
use super::return_params::{BackendOutcome, GatewayReturnParams};
use super::types::TransactionRecord;

/// Gateway response code meaning "paid"
pub const GATEWAY_SUCCESS_CODE: &str = "00";

/// Gateway `payDate` layout, local time of the gateway
pub const PAY_DATE_FORMAT: &str = "%Y%m%d%H%M%S";

/// User-facing texts, overridable from config for localization
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutcomeMessages {
    pub no_params: String,
    pub processing_error: String,
    pub gateway_success: String,
    pub gateway_failure: String,
    pub backend_processed: String,
    pub unsettled: String,
    pub lookup_failed: String,
}

impl Default for OutcomeMessages {
    fn default() -> Self {
        Self {
            no_params: "Payment information not found".to_string(),
            processing_error: "An error occurred while processing the payment".to_string(),
            gateway_success: "Payment successful".to_string(),
            gateway_failure: "Payment failed".to_string(),
            backend_processed: "Payment has been processed".to_string(),
            unsettled: "Payment failed or not yet finished".to_string(),
            lookup_failed: "Cannot verify payment status, please check your order".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentOutcome {
    pub success: bool,
    pub message: String,
    /// Raw gateway code, direct-redirect path only
    pub response_code: Option<String>,
    /// Gateway-reported reference
    pub transaction_id: Option<String>,
    pub saved_transaction_id: Option<String>,
    pub saved_order_code: Option<String>,
    /// Whole currency units, never the gateway's scaled value
    pub amount: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub txn_ref: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bank_tran_no: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bank_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pay_date: Option<String>,
    /// `pay_date` parsed; absent when the gateway sent an unexpected layout
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paid_at: Option<NaiveDateTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub backend_processed: bool,
}

impl PaymentOutcome {
    fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            ..Default::default()
        }
    }

    /// Return with no gateway parameters and nothing to poll
    pub fn no_params(message: Option<String>, messages: &OutcomeMessages) -> Self {
        Self::failure(non_blank(message).unwrap_or_else(|| messages.no_params.clone()))
    }

    /// Upstream exception surfaced by the caller
    pub fn processing_error(
        message: Option<String>,
        error: Option<String>,
        messages: &OutcomeMessages,
    ) -> Self {
        Self {
            error,
            ..Self::failure(
                non_blank(message).unwrap_or_else(|| messages.processing_error.clone()),
            )
        }
    }

    /// Server-to-server notification already settled the payment
    pub fn backend_processed(outcome: BackendOutcome, messages: &OutcomeMessages) -> Self {
        let fallback = if outcome.success {
            &messages.backend_processed
        } else {
            &messages.gateway_failure
        };
        Self {
            success: outcome.success,
            message: non_blank(outcome.message).unwrap_or_else(|| fallback.clone()),
            transaction_id: outcome.transaction_id,
            saved_order_code: outcome.order_code,
            amount: outcome.amount,
            backend_processed: true,
            ..Default::default()
        }
    }

    /// Direct gateway redirect
    pub fn from_gateway(params: GatewayReturnParams, messages: &OutcomeMessages) -> Self {
        let success = params.response_code.as_deref() == Some(GATEWAY_SUCCESS_CODE);
        let message = if success {
            messages.gateway_success.clone()
        } else {
            messages.gateway_failure.clone()
        };
        Self {
            success,
            message,
            response_code: params.response_code,
            transaction_id: params.transaction_id,
            amount: params.amount,
            txn_ref: params.txn_ref,
            bank_tran_no: params.bank_tran_no,
            bank_code: params.bank_code,
            paid_at: params.pay_date.as_deref().and_then(parse_pay_date),
            pay_date: params.pay_date,
            ..Default::default()
        }
    }

    /// Poll found a completed payment
    pub fn settled(record: &TransactionRecord, messages: &OutcomeMessages) -> Self {
        Self {
            success: true,
            message: messages.gateway_success.clone(),
            transaction_id: Some(record.id.to_string()),
            amount: record.settled_amount(),
            ..Default::default()
        }
    }

    /// Poll succeeded, nothing completed yet
    pub fn unsettled(record: &TransactionRecord, messages: &OutcomeMessages) -> Self {
        Self {
            transaction_id: Some(record.id.to_string()),
            ..Self::failure(messages.unsettled.clone())
        }
    }

    /// Poll itself failed
    pub fn lookup_failed(detail: impl Into<String>, messages: &OutcomeMessages) -> Self {
        Self {
            error: Some(detail.into()),
            ..Self::failure(messages.lookup_failed.clone())
        }
    }

    /// Fill `saved*` from the marker without touching values already set.
    pub fn merge_saved(&mut self, marker: &PendingTransactionMarker) {
        if self.saved_transaction_id.is_none() {
            self.saved_transaction_id = Some(marker.transaction_id.to_string());
        }
        if self.saved_order_code.is_none() {
            self.saved_order_code = marker.order_code.clone();
        }
    }
}

pub fn parse_pay_date(raw: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(raw.trim(), PAY_DATE_FORMAT).ok()
}

fn non_blank(s: Option<String>) -> Option<String> {
    s.filter(|s| !s.trim().is_empty())
}
