//! Best-effort receipt email dispatch.
//!
//! Fired after a real pending → confirmed transition, and only then, so
//! a duplicate webhook can never double-send. Failures are logged and
//! never roll back the confirmation.

use std::time::Duration;

use anyhow::{Result, bail};
use boxoffice_models::Booking;
use tracing::{debug, warn};

const EMAIL_API_URL: &str = "https://api.resend.com/emails";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Seam between settlement and receipt delivery. The settlement path
/// calls this exactly once per real pending → confirmed transition.
pub trait ReceiptSender: Send + Sync {
    /// Fire-and-forget receipt dispatch.
    fn deliver(&self, booking: Booking, event_title: String);
}

#[derive(Clone)]
pub struct Mailer {
    client: reqwest::Client,
    api_key: String,
    from: String,
}

impl Mailer {
    pub fn new(api_key: impl Into<String>, from: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            from: from.into(),
        }
    }

    async fn send_receipt(&self, booking: &Booking, event_title: &str) -> Result<()> {
        let text = format!(
            "Hi {},\n\nYour booking for {event_title} is confirmed.\n\
             Seats: {}\nAmount: {}\nProcessing fee: {}\nTotal: {}\n\
             Reference: {}\n\nSee you there!",
            booking.customer_name,
            booking.seats.0.join(", "),
            booking.amount,
            booking.processing_fee,
            booking.total_amount,
            booking.payment_reference,
        );
        let resp = self
            .client
            .post(EMAIL_API_URL)
            .bearer_auth(&self.api_key)
            .timeout(REQUEST_TIMEOUT)
            .json(&serde_json::json!({
                "from": self.from,
                "to": [booking.customer_email],
                "subject": format!("Your tickets for {event_title}"),
                "text": text,
            }))
            .send()
            .await?;
        if !resp.status().is_success() {
            bail!("email API returned {}", resp.status());
        }
        debug!("Receipt sent to {} for booking {}", booking.customer_email, booking.id);
        Ok(())
    }
}

impl ReceiptSender for Mailer {
    fn deliver(&self, booking: Booking, event_title: String) {
        if self.api_key.is_empty() {
            debug!("No email API key configured, skipping receipt for {}", booking.id);
            return;
        }
        let mailer = self.clone();
        tokio::spawn(async move {
            if let Err(err) = mailer.send_receipt(&booking, &event_title).await {
                warn!("Receipt email for booking {} failed: {err:#}", booking.id);
            }
        });
    }
}
