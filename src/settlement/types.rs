//! Settlement Core Types
//!
//! Backend wire records and identifiers shared by the reconciler and the
//! staff workflow.

use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Opaque transaction correlation id issued by the backend
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(String);

impl TransactionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TransactionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for TransactionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// How the customer pays at the station
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PaymentMethod {
    /// Collected by staff, settled immediately
    Cash,
    /// Redirect to the payment gateway, settled on return
    Gateway,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Cash => "CASH",
            PaymentMethod::Gateway => "GATEWAY",
        }
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for PaymentMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "CASH" => Ok(PaymentMethod::Cash),
            "GATEWAY" => Ok(PaymentMethod::Gateway),
            other => Err(format!("Unknown payment method: {other}")),
        }
    }
}

/// Status of one payment attempt on a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
    Cancelled,
    #[serde(other)]
    Unknown,
}

/// Lifecycle status of a swap transaction on the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    Pending,
    Confirmed,
    InProgress,
    Completed,
    Cancelled,
    #[serde(other)]
    Unknown,
}

/// Payment sub-record of a transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRecord {
    #[serde(default)]
    pub id: Option<String>,
    pub status: PaymentStatus,
    #[serde(default)]
    pub method: Option<PaymentMethod>,
    #[serde(default)]
    pub price: Option<Decimal>,
}

impl PaymentRecord {
    #[inline]
    pub fn is_completed(&self) -> bool {
        self.status == PaymentStatus::Completed
    }
}

/// Transaction as returned by `GET transaction by id`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRecord {
    pub id: TransactionId,
    /// Display code shown to staff and customer
    #[serde(default)]
    pub code: Option<String>,
    pub status: TransactionStatus,
    #[serde(default)]
    pub arrival_confirmed: bool,
    #[serde(default)]
    pub swapping_started: bool,
    /// Stored price in whole currency units
    #[serde(default)]
    pub price: Option<Decimal>,
    #[serde(default)]
    pub payments: Vec<PaymentRecord>,
}

impl TransactionRecord {
    /// At least one payment reached the completed state
    pub fn has_completed_payment(&self) -> bool {
        self.payments.iter().any(PaymentRecord::is_completed)
    }

    /// Settled amount: the transaction price, else the completed payment's price
    pub fn settled_amount(&self) -> Option<Decimal> {
        self.price.or_else(|| {
            self.payments
                .iter()
                .find(|p| p.is_completed())
                .and_then(|p| p.price)
        })
    }

    pub fn display_code(&self) -> &str {
        self.code.as_deref().unwrap_or(self.id.as_str())
    }
}

/// Result of `process-payment`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentInitiation {
    /// Gateway page to navigate to (GATEWAY only)
    #[serde(default, alias = "redirectUrl")]
    pub payment_url: Option<String>,
    /// Confirmation text (CASH)
    #[serde(default)]
    pub message: Option<String>,
}
