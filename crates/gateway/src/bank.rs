//! Bank-transfer aggregator adapter. The server initializes a hosted
//! checkout and redirects the customer; confirmation arrives via webhook
//! carrying a transaction reference, which we re-verify by querying the
//! aggregator directly — the webhook body alone is never trusted.

use std::time::Duration;

use serde::Deserialize;
use tracing::info;

use crate::{CheckoutSession, Customer, GatewayError, PaymentGateway, PaymentStatus, Verification};

pub const DEFAULT_BASE_URL: &str = "https://api.monnify.com";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

pub struct BankTransferGateway {
    client: reqwest::Client,
    api_key: String,
    secret: String,
    contract_code: String,
    base_url: String,
    redirect_url: String,
}

impl BankTransferGateway {
    pub fn new(
        api_key: impl Into<String>,
        secret: impl Into<String>,
        contract_code: impl Into<String>,
        base_url: impl Into<String>,
        redirect_url: impl Into<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            secret: secret.into(),
            contract_code: contract_code.into(),
            base_url: base_url.into(),
            redirect_url: redirect_url.into(),
        }
    }

    fn init_payload(
        &self,
        amount: i64,
        customer: &Customer,
        reference: &str,
    ) -> serde_json::Value {
        let mut payload = serde_json::json!({
            "amount": amount,
            "customerName": customer.name,
            "customerEmail": customer.email,
            "paymentReference": reference,
            "paymentDescription": "boxoffice ticket purchase",
            "contractCode": self.contract_code,
            "currencyCode": "NGN",
        });
        if !self.redirect_url.is_empty() {
            payload["redirectUrl"] = serde_json::json!(self.redirect_url);
        }
        payload
    }
}

// --- Aggregator response types ---

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope<T> {
    request_successful: bool,
    response_message: Option<String>,
    response_body: Option<T>,
}

impl<T> Envelope<T> {
    fn into_body(self) -> Result<T, GatewayError> {
        if !self.request_successful {
            return Err(GatewayError::BadResponse(
                self.response_message
                    .unwrap_or_else(|| "request not successful".to_string()),
            ));
        }
        self.response_body
            .ok_or_else(|| GatewayError::BadResponse("missing response body".to_string()))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InitBody {
    transaction_reference: String,
    checkout_url: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryBody {
    payment_reference: String,
    payment_status: String,
    amount_paid: i64,
}

fn normalize_status(raw: &str) -> Result<PaymentStatus, GatewayError> {
    match raw {
        "PAID" | "OVERPAID" => Ok(PaymentStatus::Paid),
        "PENDING" | "PARTIALLY_PAID" => Ok(PaymentStatus::Pending),
        "FAILED" | "EXPIRED" => Ok(PaymentStatus::Failed),
        "CANCELLED" => Ok(PaymentStatus::Cancelled),
        other => Err(GatewayError::BadResponse(format!(
            "unknown bank-transfer status {other:?}"
        ))),
    }
}

#[async_trait::async_trait]
impl PaymentGateway for BankTransferGateway {
    async fn initialize(
        &self,
        amount: i64,
        customer: &Customer,
        reference: &str,
    ) -> Result<CheckoutSession, GatewayError> {
        let url = format!("{}/api/v1/merchant/transactions/init-transaction", self.base_url);
        let resp = self
            .client
            .post(&url)
            .basic_auth(&self.api_key, Some(&self.secret))
            .timeout(REQUEST_TIMEOUT)
            .json(&self.init_payload(amount, customer, reference))
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(GatewayError::Unavailable(format!(
                "bank-transfer gateway returned {}",
                resp.status()
            )));
        }
        let body = resp.json::<Envelope<InitBody>>().await?.into_body()?;
        info!(
            "Bank-transfer session {} initialized for {reference}",
            body.transaction_reference
        );
        Ok(CheckoutSession {
            payment_reference: reference.to_string(),
            transaction_reference: Some(body.transaction_reference),
            checkout_url: Some(body.checkout_url),
            access_code: None,
        })
    }

    async fn verify(&self, reference: &str) -> Result<Verification, GatewayError> {
        let url = format!(
            "{}/api/v1/merchant/transactions/query?paymentReference={reference}",
            self.base_url
        );
        let resp = self
            .client
            .get(&url)
            .basic_auth(&self.api_key, Some(&self.secret))
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(GatewayError::Unavailable(format!(
                "bank-transfer gateway returned {}",
                resp.status()
            )));
        }
        let body = resp.json::<Envelope<QueryBody>>().await?.into_body()?;
        Ok(Verification {
            reference: body.payment_reference,
            status: normalize_status(&body.payment_status)?,
            amount_paid: body.amount_paid,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bank_statuses_normalize_to_the_closed_set() {
        assert_eq!(normalize_status("PAID").unwrap(), PaymentStatus::Paid);
        assert_eq!(normalize_status("OVERPAID").unwrap(), PaymentStatus::Paid);
        assert_eq!(normalize_status("PENDING").unwrap(), PaymentStatus::Pending);
        assert_eq!(normalize_status("EXPIRED").unwrap(), PaymentStatus::Failed);
        assert_eq!(normalize_status("CANCELLED").unwrap(), PaymentStatus::Cancelled);
        assert!(matches!(
            normalize_status("SOMETHING_NEW"),
            Err(GatewayError::BadResponse(_))
        ));
    }

    #[test]
    fn init_payload_carries_the_redirect_url() {
        let customer = Customer {
            name: "Ada Obi".to_string(),
            email: "ada@example.com".to_string(),
            phone: "+2348000000000".to_string(),
        };
        let gateway = BankTransferGateway::new(
            "MK_TEST",
            "secret",
            "0123456789",
            DEFAULT_BASE_URL,
            "https://tickets.example/payment/complete",
        );
        let payload = gateway.init_payload(5_100, &customer, "BOX-1");
        assert_eq!(payload["redirectUrl"], "https://tickets.example/payment/complete");
        assert_eq!(payload["paymentReference"], "BOX-1");
        assert_eq!(payload["contractCode"], "0123456789");

        // Without a configured redirect the field is omitted entirely.
        let gateway = BankTransferGateway::new("MK_TEST", "secret", "0123456789", DEFAULT_BASE_URL, "");
        let payload = gateway.init_payload(5_100, &customer, "BOX-1");
        assert!(payload.get("redirectUrl").is_none());
    }

    #[test]
    fn envelope_failure_surfaces_the_message() {
        let raw = r#"{"requestSuccessful": false, "responseMessage": "invalid contract"}"#;
        let envelope: Envelope<InitBody> = serde_json::from_str(raw).unwrap();
        let err = envelope.into_body().unwrap_err();
        assert!(matches!(err, GatewayError::BadResponse(m) if m == "invalid contract"));
    }
}
