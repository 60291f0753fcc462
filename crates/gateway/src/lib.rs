//! Payment gateway adapters.
//!
//! One capability set over two external aggregators: initialize a remote
//! payment session, and verify a transaction's authoritative status by
//! reference. Verification is side-effect-free and always safe to repeat.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

mod bank;
mod card;
mod mock;

pub use bank::BankTransferGateway;
pub use card::CardGateway;
pub use mock::MockGateway;

/// Normalized transaction status. Whatever vocabulary an aggregator
/// speaks is mapped into this closed set before it reaches the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PaymentStatus {
    Paid,
    Pending,
    Failed,
    Cancelled,
}

#[derive(Debug, Error)]
pub enum GatewayError {
    /// Transport failure, timeout or non-2xx from the aggregator. The
    /// payment outcome is indeterminate: callers must leave the booking
    /// pending and retry verification, never treat this as "failed".
    #[error("payment gateway unavailable: {0}")]
    Unavailable(String),

    /// The aggregator answered but the body was not something we can
    /// act on. Also indeterminate.
    #[error("unexpected gateway response: {0}")]
    BadResponse(String),
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::BadResponse(err.to_string())
        } else {
            Self::Unavailable(err.to_string())
        }
    }
}

#[derive(Debug, Clone)]
pub struct Customer {
    pub name: String,
    pub email: String,
    pub phone: String,
}

/// Handle for a freshly initialized remote payment session. Card
/// sessions carry an access code for the client SDK popup; bank-transfer
/// sessions carry a hosted checkout redirect URL.
#[derive(Debug, Clone, Serialize)]
pub struct CheckoutSession {
    pub payment_reference: String,
    pub transaction_reference: Option<String>,
    pub checkout_url: Option<String>,
    pub access_code: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Verification {
    pub reference: String,
    pub status: PaymentStatus,
    pub amount_paid: i64,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Opens a remote payment session for `amount` minor units under our
    /// payment reference.
    async fn initialize(
        &self,
        amount: i64,
        customer: &Customer,
        reference: &str,
    ) -> Result<CheckoutSession, GatewayError>;

    /// Queries the aggregator for the authoritative status of a payment.
    /// Idempotent and side-effect-free.
    async fn verify(&self, reference: &str) -> Result<Verification, GatewayError>;
}

/// What an inbound webhook body tells us: which transaction it is about.
/// The claimed status is a hint only; confirmation always re-verifies
/// against the aggregator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookNotice {
    pub reference: String,
    pub claimed_status: Option<String>,
}

impl WebhookNotice {
    /// Extracts the reference from either aggregator's webhook shape:
    /// the card aggregator nests under `data`, the bank aggregator under
    /// `eventData` (or sends a flat body on older contract versions).
    pub fn from_json(body: &serde_json::Value) -> Option<Self> {
        let data = body.get("data").or_else(|| body.get("eventData")).unwrap_or(body);
        let reference = data
            .get("paymentReference")
            .or_else(|| data.get("reference"))
            .or_else(|| data.get("transactionReference"))
            .and_then(|v| v.as_str())?;
        let claimed_status = data
            .get("paymentStatus")
            .or_else(|| data.get("status"))
            .and_then(|v| v.as_str())
            .map(str::to_string);
        Some(Self { reference: reference.to_string(), claimed_status })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn card_webhook_shape_is_parsed() {
        let body = json!({
            "event": "charge.success",
            "data": { "reference": "BOX-abc", "status": "success", "amount": 5000 }
        });
        let notice = WebhookNotice::from_json(&body).unwrap();
        assert_eq!(notice.reference, "BOX-abc");
        assert_eq!(notice.claimed_status.as_deref(), Some("success"));
    }

    #[test]
    fn bank_webhook_shape_is_parsed() {
        let body = json!({
            "eventType": "SUCCESSFUL_TRANSACTION",
            "eventData": {
                "transactionReference": "MNFY-123",
                "paymentReference": "BOX-abc",
                "paymentStatus": "PAID"
            }
        });
        let notice = WebhookNotice::from_json(&body).unwrap();
        // Our own reference wins over the aggregator's when both appear.
        assert_eq!(notice.reference, "BOX-abc");
        assert_eq!(notice.claimed_status.as_deref(), Some("PAID"));
    }

    #[test]
    fn flat_webhook_shape_is_parsed() {
        let body = json!({ "transactionReference": "MNFY-123", "paymentStatus": "PAID" });
        let notice = WebhookNotice::from_json(&body).unwrap();
        assert_eq!(notice.reference, "MNFY-123");
    }

    #[test]
    fn webhook_without_a_reference_is_rejected() {
        assert_eq!(WebhookNotice::from_json(&json!({ "event": "ping" })), None);
    }
}
