//! Scripted gateway for tests and local development.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::{CheckoutSession, Customer, GatewayError, PaymentGateway, PaymentStatus, Verification};

enum Script {
    Status { status: PaymentStatus, amount_paid: i64 },
    Unavailable,
}

/// Scripted statuses keyed by payment reference. Unscripted references
/// verify as PENDING with nothing paid.
#[derive(Default)]
pub struct MockGateway {
    scripts: Mutex<HashMap<String, Script>>,
    verify_calls: AtomicUsize,
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_status(&self, reference: &str, status: PaymentStatus, amount_paid: i64) {
        self.scripts
            .lock()
            .unwrap()
            .insert(reference.to_string(), Script::Status { status, amount_paid });
    }

    /// Makes `verify` for this reference fail as gateway-unavailable.
    pub fn set_unavailable(&self, reference: &str) {
        self.scripts
            .lock()
            .unwrap()
            .insert(reference.to_string(), Script::Unavailable);
    }

    pub fn verify_calls(&self) -> usize {
        self.verify_calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl PaymentGateway for MockGateway {
    async fn initialize(
        &self,
        _amount: i64,
        _customer: &Customer,
        reference: &str,
    ) -> Result<CheckoutSession, GatewayError> {
        Ok(CheckoutSession {
            payment_reference: reference.to_string(),
            transaction_reference: Some(format!("MOCK-{reference}")),
            checkout_url: Some(format!("https://checkout.invalid/{reference}")),
            access_code: Some("mock-access-code".to_string()),
        })
    }

    async fn verify(&self, reference: &str) -> Result<Verification, GatewayError> {
        self.verify_calls.fetch_add(1, Ordering::SeqCst);
        match self.scripts.lock().unwrap().get(reference) {
            Some(Script::Unavailable) => {
                Err(GatewayError::Unavailable("scripted outage".to_string()))
            }
            Some(Script::Status { status, amount_paid }) => Ok(Verification {
                reference: reference.to_string(),
                status: *status,
                amount_paid: *amount_paid,
            }),
            None => Ok(Verification {
                reference: reference.to_string(),
                status: PaymentStatus::Pending,
                amount_paid: 0,
            }),
        }
    }
}
