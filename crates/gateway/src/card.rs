//! Card aggregator adapter. The server initializes a transaction and
//! hands the access code to the client SDK, which opens the payment
//! popup; we later verify by reference against the aggregator's REST API.

use std::time::Duration;

use serde::Deserialize;
use tracing::info;

use crate::{CheckoutSession, Customer, GatewayError, PaymentGateway, PaymentStatus, Verification};

pub const DEFAULT_BASE_URL: &str = "https://api.paystack.co";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

pub struct CardGateway {
    client: reqwest::Client,
    secret_key: String,
    base_url: String,
    callback_url: String,
}

impl CardGateway {
    pub fn new(
        secret_key: impl Into<String>,
        base_url: impl Into<String>,
        callback_url: impl Into<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            secret_key: secret_key.into(),
            base_url: base_url.into(),
            callback_url: callback_url.into(),
        }
    }

    fn init_payload(
        &self,
        amount: i64,
        customer: &Customer,
        reference: &str,
    ) -> serde_json::Value {
        let mut payload = serde_json::json!({
            "email": customer.email,
            "amount": amount,
            "reference": reference,
            "metadata": { "customer_name": customer.name, "customer_phone": customer.phone },
        });
        if !self.callback_url.is_empty() {
            payload["callback_url"] = serde_json::json!(self.callback_url);
        }
        payload
    }
}

// --- Aggregator response types ---

#[derive(Deserialize)]
struct Envelope<T> {
    status: bool,
    message: Option<String>,
    data: Option<T>,
}

impl<T> Envelope<T> {
    fn into_data(self) -> Result<T, GatewayError> {
        if !self.status {
            return Err(GatewayError::BadResponse(
                self.message.unwrap_or_else(|| "request not successful".to_string()),
            ));
        }
        self.data
            .ok_or_else(|| GatewayError::BadResponse("missing data in response".to_string()))
    }
}

#[derive(Deserialize)]
struct InitData {
    authorization_url: String,
    access_code: String,
    reference: String,
}

#[derive(Deserialize)]
struct VerifyData {
    status: String,
    amount: i64,
    reference: String,
}

fn normalize_status(raw: &str) -> Result<PaymentStatus, GatewayError> {
    match raw {
        "success" => Ok(PaymentStatus::Paid),
        "pending" | "ongoing" | "queued" | "processing" | "abandoned" => Ok(PaymentStatus::Pending),
        "failed" => Ok(PaymentStatus::Failed),
        "reversed" => Ok(PaymentStatus::Cancelled),
        other => Err(GatewayError::BadResponse(format!("unknown card status {other:?}"))),
    }
}

#[async_trait::async_trait]
impl PaymentGateway for CardGateway {
    async fn initialize(
        &self,
        amount: i64,
        customer: &Customer,
        reference: &str,
    ) -> Result<CheckoutSession, GatewayError> {
        let url = format!("{}/transaction/initialize", self.base_url);
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.secret_key)
            .timeout(REQUEST_TIMEOUT)
            .json(&self.init_payload(amount, customer, reference))
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(GatewayError::Unavailable(format!(
                "card gateway returned {}",
                resp.status()
            )));
        }
        let data = resp.json::<Envelope<InitData>>().await?.into_data()?;
        info!("Card session initialized for {}", data.reference);
        Ok(CheckoutSession {
            payment_reference: data.reference,
            transaction_reference: None,
            checkout_url: Some(data.authorization_url),
            access_code: Some(data.access_code),
        })
    }

    async fn verify(&self, reference: &str) -> Result<Verification, GatewayError> {
        let url = format!("{}/transaction/verify/{reference}", self.base_url);
        let resp = self
            .client
            .get(&url)
            .bearer_auth(&self.secret_key)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(GatewayError::Unavailable(format!(
                "card gateway returned {}",
                resp.status()
            )));
        }
        let data = resp.json::<Envelope<VerifyData>>().await?.into_data()?;
        Ok(Verification {
            reference: data.reference,
            status: normalize_status(&data.status)?,
            amount_paid: data.amount,
        })
    }
}
