//! Booking initiation and payment settlement.
//!
//! Initiation validates the request against the seat catalog, recomputes
//! the amount server-side, holds the seats and opens a gateway session.
//! Settlement re-queries the gateway for the authoritative status and
//! drives the booking state machine; it never trusts a webhook body.

use boxoffice_db::{self as db, ConfirmOutcome, DbError};
use boxoffice_gateway::{Customer, GatewayError, PaymentGateway, PaymentStatus, Verification};
use boxoffice_models::{
    Booking, BookingStatus, Event, EventStatus, EventType, Hall, PaymentMethod, PricingTable,
    SeatTier,
};
use boxoffice_seats::CatalogError;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use sqlx::types::Json;
use tracing::warn;

#[derive(Debug, thiserror::Error)]
pub enum FlowError {
    /// Malformed or inconsistent request. Never retried; surfaced
    /// verbatim to the caller.
    #[error("{0}")]
    Invalid(String),

    #[error(transparent)]
    Db(#[from] DbError),

    /// Indeterminate gateway outcome. The booking stays pending.
    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

impl From<CatalogError> for FlowError {
    fn from(err: CatalogError) -> Self {
        Self::Invalid(err.to_string())
    }
}

fn default_payment_method() -> PaymentMethod {
    PaymentMethod::Card
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiateRequest {
    pub customer_name: String,
    pub customer_email: String,
    pub customer_phone: String,
    pub event_id: String,
    pub seats: Vec<String>,
    pub seat_type: SeatTier,
    pub amount: i64,
    pub processing_fee: i64,
    pub total_amount: i64,
    #[serde(default = "default_payment_method")]
    pub payment_method: PaymentMethod,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiateResponse {
    pub booking_id: String,
    pub payment_reference: String,
    pub transaction_reference: Option<String>,
    pub checkout_url: Option<String>,
    pub access_code: Option<String>,
    /// Card aggregator public key for the client SDK popup. Filled in
    /// by the handler for card sessions; absent for bank transfers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,
}

fn total_seats_u32(total_seats: i64) -> Result<u32, FlowError> {
    u32::try_from(total_seats)
        .map_err(|_| FlowError::Invalid(format!("total_seats {total_seats} is out of range")))
}

/// Validates an event's setup against its hall before it is created:
/// the layout must be priceable and the pricing counts must add up to
/// the hall capacity.
pub fn validate_event_setup(
    hall: &Hall,
    event_type: EventType,
    total_seats: i64,
    pricing: &PricingTable,
) -> Result<(), FlowError> {
    let total = total_seats_u32(total_seats)?;
    if total_seats != hall.capacity {
        return Err(FlowError::Invalid(format!(
            "total_seats ({total_seats}) must equal hall capacity ({})",
            hall.capacity
        )));
    }
    if i64::from(pricing.total_count()) != hall.capacity {
        return Err(FlowError::Invalid(format!(
            "pricing seat counts ({}) must equal hall capacity ({})",
            pricing.total_count(),
            hall.capacity
        )));
    }
    boxoffice_seats::generate(hall.hall_type, event_type, &hall.id, total, pricing)?;
    Ok(())
}

/// Creates a pending booking with its seats held, then opens a gateway
/// checkout session. If the gateway cannot be reached the booking is
/// cancelled and its holds released before the error is returned.
pub async fn initiate(
    pool: &SqlitePool,
    gateway: &dyn PaymentGateway,
    req: InitiateRequest,
) -> Result<InitiateResponse, FlowError> {
    if req.customer_name.trim().is_empty() || req.customer_phone.trim().is_empty() {
        return Err(FlowError::Invalid("customer name and phone are required".to_string()));
    }
    if !req.customer_email.contains('@') {
        return Err(FlowError::Invalid("customer email is invalid".to_string()));
    }
    if req.seats.is_empty() {
        return Err(FlowError::Invalid("at least one seat must be selected".to_string()));
    }
    if req.total_amount != req.amount + req.processing_fee {
        return Err(FlowError::Invalid(
            "totalAmount must equal amount + processingFee".to_string(),
        ));
    }

    let event = db::get_event(pool, &req.event_id)
        .await?
        .ok_or(DbError::NotFound("event"))?;
    if event.status != EventStatus::Active {
        return Err(FlowError::Invalid("event is not open for booking".to_string()));
    }
    let hall = db::get_hall(pool, &event.hall_id)
        .await?
        .ok_or(DbError::NotFound("hall"))?;

    let catalog = boxoffice_seats::generate(
        hall.hall_type,
        event.event_type,
        &hall.id,
        total_seats_u32(event.total_seats)?,
        &event.pricing.0,
    )?;

    // Validate the selection against the seat universe and recompute the
    // amount server-side; the client's figure is not trusted.
    let mut expected_amount = 0;
    for (i, seat_id) in req.seats.iter().enumerate() {
        if req.seats[..i].contains(seat_id) {
            return Err(FlowError::Invalid(format!("seat {seat_id} selected twice")));
        }
        let seat = catalog
            .iter()
            .find(|s| &s.id == seat_id)
            .ok_or_else(|| FlowError::Invalid(format!("unknown seat id {seat_id}")))?;
        if seat.tier != req.seat_type {
            return Err(FlowError::Invalid(format!(
                "seat {seat_id} is not in the requested tier"
            )));
        }
        expected_amount += seat.price;
    }
    if expected_amount != req.amount {
        return Err(FlowError::Invalid(format!(
            "amount mismatch: selected seats cost {expected_amount}, request says {}",
            req.amount
        )));
    }

    let now = Utc::now();
    let booking = Booking {
        id: boxoffice_models::new_id(),
        customer_name: req.customer_name,
        customer_email: req.customer_email,
        customer_phone: req.customer_phone,
        event_id: event.id,
        seats: Json(req.seats),
        seat_tier: req.seat_type,
        amount: req.amount,
        processing_fee: req.processing_fee,
        total_amount: req.total_amount,
        payment_method: req.payment_method,
        payment_reference: boxoffice_models::new_payment_reference(),
        transaction_reference: None,
        status: BookingStatus::Pending,
        created_at: now,
        updated_at: now,
    };
    db::create_pending_booking(pool, &booking).await?;

    let customer = Customer {
        name: booking.customer_name.clone(),
        email: booking.customer_email.clone(),
        phone: booking.customer_phone.clone(),
    };
    let session = match gateway
        .initialize(booking.total_amount, &customer, &booking.payment_reference)
        .await
    {
        Ok(session) => session,
        Err(err) => {
            // No session means the customer can never pay this booking.
            if let Err(release_err) =
                db::fail_booking(pool, &booking.payment_reference, BookingStatus::Cancelled).await
            {
                warn!(
                    "Could not release holds for booking {}: {release_err}",
                    booking.id
                );
            }
            return Err(err.into());
        }
    };
    if let Some(transaction_reference) = &session.transaction_reference {
        db::set_transaction_reference(pool, &booking.id, transaction_reference).await?;
    }

    Ok(InitiateResponse {
        booking_id: booking.id,
        payment_reference: booking.payment_reference,
        transaction_reference: session.transaction_reference,
        checkout_url: session.checkout_url,
        access_code: session.access_code,
        public_key: None,
    })
}

#[derive(Debug)]
pub enum Settlement {
    /// Transitioned pending → confirmed in this call. The caller should
    /// dispatch the receipt email exactly when it sees this.
    Confirmed(Verification),
    /// Already confirmed earlier; nothing happened.
    AlreadyConfirmed,
    /// Authoritative gateway status was not PAID; the booking failed and
    /// its holds were released.
    Failed(Verification),
}

#[derive(Debug)]
pub struct SettleResult {
    pub settlement: Settlement,
    pub booking: Booking,
}

/// Drives a booking through its payment outcome. Triggered by webhook
/// delivery or a client verify call; idempotent per reference.
pub async fn settle(
    pool: &SqlitePool,
    gateway: &dyn PaymentGateway,
    reference: &str,
) -> Result<SettleResult, FlowError> {
    let mut booking = db::get_booking_by_reference(pool, reference)
        .await?
        .ok_or(DbError::NotFound("booking"))?;

    if booking.status == BookingStatus::Confirmed {
        return Ok(SettleResult { settlement: Settlement::AlreadyConfirmed, booking });
    }

    let verification = gateway.verify(&booking.payment_reference).await?;
    match verification.status {
        PaymentStatus::Paid => {
            if verification.amount_paid < booking.total_amount {
                warn!(
                    "Booking {} paid {} of {}",
                    booking.id, verification.amount_paid, booking.total_amount
                );
            }
            let settlement = match db::confirm_booking(pool, &booking.payment_reference).await? {
                ConfirmOutcome::Confirmed => Settlement::Confirmed(verification),
                ConfirmOutcome::AlreadyConfirmed => Settlement::AlreadyConfirmed,
            };
            booking.status = BookingStatus::Confirmed;
            Ok(SettleResult { settlement, booking })
        }
        PaymentStatus::Pending | PaymentStatus::Failed | PaymentStatus::Cancelled => {
            db::fail_booking(pool, &booking.payment_reference, BookingStatus::Failed).await?;
            booking.status = BookingStatus::Failed;
            Ok(SettleResult { settlement: Settlement::Failed(verification), booking })
        }
    }
}

/// Seat map for an event: the full catalog with availability overlaid.
pub async fn seat_map(pool: &SqlitePool, event: &Event) -> Result<Vec<boxoffice_models::Seat>, FlowError> {
    let hall = db::get_hall(pool, &event.hall_id)
        .await?
        .ok_or(DbError::NotFound("hall"))?;
    let mut catalog = boxoffice_seats::generate(
        hall.hall_type,
        event.event_type,
        &hall.id,
        total_seats_u32(event.total_seats)?,
        &event.pricing.0,
    )?;
    let unavailable = db::unavailable_seat_ids(pool, &event.id).await?;
    for seat in &mut catalog {
        seat.is_booked = unavailable.contains(&seat.id);
    }
    Ok(catalog)
}

#[cfg(test)]
mod tests {
    use super::*;
    use boxoffice_gateway::MockGateway;
    use boxoffice_models::{HallType, TierPricing};
    use sqlx::sqlite::SqlitePoolOptions;

    async fn test_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        boxoffice_db::migrate(&pool).await.unwrap();
        pool
    }

    async fn seed_standard_event(pool: &SqlitePool) -> Event {
        let hall = Hall {
            id: "halla".to_string(),
            name: "Hall A".to_string(),
            capacity: 48,
            hall_type: HallType::Standard,
        };
        db::insert_hall(pool, &hall).await.unwrap();
        let pricing: PricingTable =
            [(SeatTier::StandardSingle, TierPricing { price: 2_500, count: 48 })]
                .into_iter()
                .collect();
        let event = Event {
            id: boxoffice_models::new_id(),
            title: "Premiere Night".to_string(),
            event_type: EventType::Movie,
            category: "drama".to_string(),
            event_date: "2026-09-01".to_string(),
            event_time: "20:00".to_string(),
            hall_id: hall.id,
            total_seats: 48,
            pricing: Json(pricing),
            status: EventStatus::Active,
            created_at: Utc::now(),
        };
        db::insert_event(pool, &event).await.unwrap();
        event
    }

    fn request(event_id: &str, seats: &[&str]) -> InitiateRequest {
        let amount = 2_500 * seats.len() as i64;
        InitiateRequest {
            customer_name: "Ada Obi".to_string(),
            customer_email: "ada@example.com".to_string(),
            customer_phone: "+2348000000000".to_string(),
            event_id: event_id.to_string(),
            seats: seats.iter().map(|s| s.to_string()).collect(),
            seat_type: SeatTier::StandardSingle,
            amount,
            processing_fee: 100,
            total_amount: amount + 100,
            payment_method: PaymentMethod::Card,
        }
    }

    #[tokio::test]
    async fn paid_booking_ends_confirmed_with_seats_committed() {
        let pool = test_pool().await;
        let event = seed_standard_event(&pool).await;
        let gateway = MockGateway::new();

        let resp = initiate(&pool, &gateway, request(&event.id, &["HALLA-1", "HALLA-2"]))
            .await
            .unwrap();
        let stored = db::get_booking_by_reference(&pool, &resp.payment_reference)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, BookingStatus::Pending);
        assert_eq!(stored.amount, 5_000);
        assert_eq!(stored.total_amount, 5_100);

        gateway.set_status(&resp.payment_reference, PaymentStatus::Paid, 5_100);
        let result = settle(&pool, &gateway, &resp.payment_reference).await.unwrap();
        assert!(matches!(result.settlement, Settlement::Confirmed(_)));

        let committed = db::committed_seat_ids(&pool, &event.id).await.unwrap();
        assert_eq!(committed, vec!["HALLA-1", "HALLA-2"]);
    }

    #[tokio::test]
    async fn duplicate_settlement_is_a_no_op_without_reverification() {
        let pool = test_pool().await;
        let event = seed_standard_event(&pool).await;
        let gateway = MockGateway::new();

        let resp = initiate(&pool, &gateway, request(&event.id, &["HALLA-5"])).await.unwrap();
        gateway.set_status(&resp.payment_reference, PaymentStatus::Paid, 2_600);

        let first = settle(&pool, &gateway, &resp.payment_reference).await.unwrap();
        assert!(matches!(first.settlement, Settlement::Confirmed(_)));
        let second = settle(&pool, &gateway, &resp.payment_reference).await.unwrap();
        assert!(matches!(second.settlement, Settlement::AlreadyConfirmed));

        // The second delivery short-circuits before touching the gateway,
        // and the seat is not double-counted.
        assert_eq!(gateway.verify_calls(), 1);
        assert_eq!(db::committed_seat_ids(&pool, &event.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn overlapping_selection_is_rejected_while_first_is_still_pending() {
        let pool = test_pool().await;
        let event = seed_standard_event(&pool).await;
        let gateway = MockGateway::new();

        initiate(&pool, &gateway, request(&event.id, &["HALLA-1", "HALLA-2"]))
            .await
            .unwrap();
        let err = initiate(&pool, &gateway, request(&event.id, &["HALLA-1"]))
            .await
            .unwrap_err();
        assert!(matches!(err, FlowError::Db(DbError::SeatsUnavailable(ref t)) if t == &["HALLA-1"]));
    }

    #[tokio::test]
    async fn non_paid_status_fails_the_booking_and_releases_seats() {
        let pool = test_pool().await;
        let event = seed_standard_event(&pool).await;
        let gateway = MockGateway::new();

        let resp = initiate(&pool, &gateway, request(&event.id, &["HALLA-9"])).await.unwrap();
        // Unscripted references verify as PENDING: not paid.
        let result = settle(&pool, &gateway, &resp.payment_reference).await.unwrap();
        assert!(matches!(result.settlement, Settlement::Failed(_)));

        let stored = db::get_booking_by_reference(&pool, &resp.payment_reference)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, BookingStatus::Failed);
        assert!(db::unavailable_seat_ids(&pool, &event.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn gateway_outage_leaves_the_booking_pending() {
        let pool = test_pool().await;
        let event = seed_standard_event(&pool).await;
        let gateway = MockGateway::new();

        let resp = initiate(&pool, &gateway, request(&event.id, &["HALLA-3"])).await.unwrap();
        gateway.set_unavailable(&resp.payment_reference);

        let err = settle(&pool, &gateway, &resp.payment_reference).await.unwrap_err();
        assert!(matches!(err, FlowError::Gateway(GatewayError::Unavailable(_))));

        let stored = db::get_booking_by_reference(&pool, &resp.payment_reference)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, BookingStatus::Pending);
        assert_eq!(db::unavailable_seat_ids(&pool, &event.id).await.unwrap(), vec!["HALLA-3"]);
    }

    #[tokio::test]
    async fn client_amounts_are_not_trusted() {
        let pool = test_pool().await;
        let event = seed_standard_event(&pool).await;
        let gateway = MockGateway::new();

        let mut req = request(&event.id, &["HALLA-1"]);
        req.amount = 1;
        req.total_amount = 101;
        let err = initiate(&pool, &gateway, req).await.unwrap_err();
        assert!(matches!(err, FlowError::Invalid(ref m) if m.contains("amount mismatch")));

        let mut req = request(&event.id, &["HALLA-1"]);
        req.total_amount += 1;
        let err = initiate(&pool, &gateway, req).await.unwrap_err();
        assert!(matches!(err, FlowError::Invalid(ref m) if m.contains("totalAmount")));
    }

    #[tokio::test]
    async fn seats_outside_the_universe_are_rejected() {
        let pool = test_pool().await;
        let event = seed_standard_event(&pool).await;
        let gateway = MockGateway::new();

        let mut req = request(&event.id, &["HALLA-999"]);
        req.amount = 2_500;
        req.total_amount = 2_600;
        let err = initiate(&pool, &gateway, req).await.unwrap_err();
        assert!(matches!(err, FlowError::Invalid(ref m) if m.contains("unknown seat")));
    }

    #[tokio::test]
    async fn seat_map_overlays_availability() {
        let pool = test_pool().await;
        let event = seed_standard_event(&pool).await;
        let gateway = MockGateway::new();
        initiate(&pool, &gateway, request(&event.id, &["HALLA-2"])).await.unwrap();

        let map = seat_map(&pool, &event).await.unwrap();
        assert_eq!(map.len(), 48);
        assert!(map.iter().find(|s| s.id == "HALLA-2").unwrap().is_booked);
        assert!(!map.iter().find(|s| s.id == "HALLA-1").unwrap().is_booked);
    }

    #[tokio::test]
    async fn event_setup_validation_enforces_the_capacity_invariant() {
        let hall = Hall {
            id: "vip1".to_string(),
            name: "VIP Lounge".to_string(),
            capacity: 22,
            hall_type: HallType::Vip,
        };
        let pricing: PricingTable = [
            (SeatTier::Sofa, TierPricing { price: 10_000, count: 10 }),
            (SeatTier::Regular, TierPricing { price: 5_000, count: 12 }),
        ]
        .into_iter()
        .collect();
        validate_event_setup(&hall, EventType::Match, 22, &pricing).unwrap();

        // Missing tier price rejects the event instead of selling free seats.
        let bad: PricingTable = [(SeatTier::Sofa, TierPricing { price: 10_000, count: 22 })]
            .into_iter()
            .collect();
        let err = validate_event_setup(&hall, EventType::Match, 22, &bad).unwrap_err();
        assert!(matches!(err, FlowError::Invalid(ref m) if m.contains("regular") || m.contains("Regular")));

        // Counts that do not add up to capacity are rejected.
        let short: PricingTable = [
            (SeatTier::Sofa, TierPricing { price: 10_000, count: 10 }),
            (SeatTier::Regular, TierPricing { price: 5_000, count: 6 }),
        ]
        .into_iter()
        .collect();
        let err = validate_event_setup(&hall, EventType::Match, 22, &short).unwrap_err();
        assert!(matches!(err, FlowError::Invalid(ref m) if m.contains("capacity")));
    }

    #[tokio::test]
    async fn oversized_total_seats_is_rejected_not_truncated() {
        let hall = Hall {
            id: "halla".to_string(),
            name: "Hall A".to_string(),
            capacity: 48,
            hall_type: HallType::Standard,
        };
        let pricing: PricingTable =
            [(SeatTier::StandardSingle, TierPricing { price: 2_500, count: 48 })]
                .into_iter()
                .collect();

        let err = validate_event_setup(&hall, EventType::Movie, i64::from(u32::MAX) + 1, &pricing)
            .unwrap_err();
        assert!(matches!(err, FlowError::Invalid(ref m) if m.contains("out of range")));
        let err = validate_event_setup(&hall, EventType::Movie, -1, &pricing).unwrap_err();
        assert!(matches!(err, FlowError::Invalid(ref m) if m.contains("out of range")));
    }
}
