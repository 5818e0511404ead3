//! Return signal parsing
//!
//! Classifies what the browser came back with. The variants are mutually
//! exclusive and resolved in priority order:
//!
//! 1. `noParams=true`           → [`ReturnSignal::NoParams`]
//! 2. `error=<detail>`          → [`ReturnSignal::ProcessingError`]
//! 3. `backendProcessed=true`   → [`ReturnSignal::BackendProcessed`]
//! 4. gateway fields present    → [`ReturnSignal::Gateway`]
//! 5. nothing recognised        → [`ReturnSignal::Empty`]

use std::collections::HashMap;

use rust_decimal::Decimal;
use tracing::warn;
use url::Url;

use crate::money::{parse_currency_amount, parse_gateway_amount};

// Gateway contract keys
pub const RESPONSE_CODE: &str = "responseCode";
pub const TRANSACTION_ID: &str = "transactionId";
pub const AMOUNT: &str = "amount";
pub const TXN_REF: &str = "txnRef";
pub const BANK_TRAN_NO: &str = "bankTranNo";
pub const BANK_CODE: &str = "bankCode";
pub const PAY_DATE: &str = "payDate";

// Signals set by the backend's own redirect page
pub const NO_PARAMS: &str = "noParams";
pub const ERROR: &str = "error";
pub const MESSAGE: &str = "message";
pub const BACKEND_PROCESSED: &str = "backendProcessed";
pub const SUCCESS: &str = "success";
pub const ORDER_CODE: &str = "orderCode";

/// Any of these marks a direct gateway redirect
const GATEWAY_MARKERS: [&str; 3] = [RESPONSE_CODE, TRANSACTION_ID, TXN_REF];

/// Fields of a direct gateway redirect. `amount` is already converted to
/// whole currency units.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GatewayReturnParams {
    pub response_code: Option<String>,
    pub transaction_id: Option<String>,
    pub amount: Option<Decimal>,
    pub txn_ref: Option<String>,
    pub bank_tran_no: Option<String>,
    pub bank_code: Option<String>,
    pub pay_date: Option<String>,
}

/// Outcome already settled by the server-to-server notification
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BackendOutcome {
    pub success: bool,
    pub message: Option<String>,
    pub transaction_id: Option<String>,
    pub order_code: Option<String>,
    pub amount: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReturnSignal {
    NoParams { message: Option<String> },
    ProcessingError {
        message: Option<String>,
        error: Option<String>,
    },
    BackendProcessed(BackendOutcome),
    Gateway(GatewayReturnParams),
    /// No parameters at all; the reconciler polls if a marker exists
    Empty,
}

impl ReturnSignal {
    pub fn from_url(url: &Url) -> Self {
        Self::from_pairs(
            url.query_pairs()
                .map(|(k, v)| (k.into_owned(), v.into_owned())),
        )
    }

    /// Parse a raw query string (without the leading `?`)
    pub fn from_query(query: &str) -> Self {
        Self::from_pairs(
            url::form_urlencoded::parse(query.trim_start_matches('?').as_bytes())
                .map(|(k, v)| (k.into_owned(), v.into_owned())),
        )
    }

    pub fn from_pairs(pairs: impl IntoIterator<Item = (String, String)>) -> Self {
        // First occurrence wins, like URLSearchParams.get
        let mut params: HashMap<String, String> = HashMap::new();
        for (k, v) in pairs {
            params.entry(k).or_insert(v);
        }
        let get = |key: &str| {
            params
                .get(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        if get(NO_PARAMS).is_some_and(|v| is_truthy(&v)) {
            return ReturnSignal::NoParams {
                message: get(MESSAGE),
            };
        }

        if let Some(error) = get(ERROR) {
            return ReturnSignal::ProcessingError {
                message: get(MESSAGE),
                error: Some(error),
            };
        }

        if get(BACKEND_PROCESSED).is_some_and(|v| is_truthy(&v)) {
            let amount = get(AMOUNT).and_then(|raw| match parse_currency_amount(&raw) {
                Ok(v) => Some(v),
                Err(e) => {
                    warn!(amount = %raw, error = %e, "Ignoring malformed backend amount");
                    None
                }
            });
            return ReturnSignal::BackendProcessed(BackendOutcome {
                // Only an explicit falsy `success` overrides the backend's settlement
                success: get(SUCCESS).is_none_or(|v| is_truthy(&v)),
                message: get(MESSAGE),
                transaction_id: get(TRANSACTION_ID),
                order_code: get(ORDER_CODE),
                amount,
            });
        }

        if has_gateway_fields(&params) {
            let amount = get(AMOUNT).and_then(|raw| match parse_gateway_amount(&raw) {
                Ok(v) => Some(v),
                Err(e) => {
                    warn!(amount = %raw, error = %e, "Ignoring malformed gateway amount");
                    None
                }
            });
            return ReturnSignal::Gateway(GatewayReturnParams {
                response_code: get(RESPONSE_CODE),
                transaction_id: get(TRANSACTION_ID),
                amount,
                txn_ref: get(TXN_REF),
                bank_tran_no: get(BANK_TRAN_NO),
                bank_code: get(BANK_CODE),
                pay_date: get(PAY_DATE),
            });
        }

        ReturnSignal::Empty
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, ReturnSignal::Empty)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ReturnSignal::NoParams { .. } => "NO_PARAMS",
            ReturnSignal::ProcessingError { .. } => "PROCESSING_ERROR",
            ReturnSignal::BackendProcessed(_) => "BACKEND_PROCESSED",
            ReturnSignal::Gateway(_) => "GATEWAY",
            ReturnSignal::Empty => "EMPTY",
        }
    }
}

/// Whether a URL carries any recognized return signal
pub fn url_has_return_params(url: &Url) -> bool {
    !ReturnSignal::from_url(url).is_empty()
}

fn has_gateway_fields(params: &HashMap<String, String>) -> bool {
    GATEWAY_MARKERS
        .iter()
        .any(|k| params.get(*k).is_some_and(|v| !v.trim().is_empty()))
}

fn is_truthy(v: &str) -> bool {
    v.eq_ignore_ascii_case("true") || v == "1"
}
