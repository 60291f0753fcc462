use std::sync::Arc;

use axum::http::StatusCode;
use axum::{
    Json, Router,
    extract::{Path, Query, State},
    routing::{get, post},
};
use boxoffice_db::{self as db, DbError};
use boxoffice_gateway::{GatewayError, PaymentGateway, WebhookNotice};
use boxoffice_models::{
    Event, EventStatus, EventType, Hall, HallType, PaymentMethod, PricingTable,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use sqlx::SqlitePool;
use sqlx::types::Json as DbJson;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

use crate::email::ReceiptSender;
use crate::flow::{self, FlowError, SettleResult, Settlement};
use crate::version_string;

#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub card: Arc<dyn PaymentGateway>,
    pub bank: Arc<dyn PaymentGateway>,
    pub mailer: Arc<dyn ReceiptSender>,
    pub card_public_key: String,
}

impl AppState {
    fn gateway(&self, method: PaymentMethod) -> &dyn PaymentGateway {
        match method {
            PaymentMethod::Card => self.card.as_ref(),
            PaymentMethod::BankTransfer => self.bank.as_ref(),
        }
    }
}

type ApiError = (StatusCode, String);

fn db_error(err: DbError) -> ApiError {
    match err {
        DbError::SeatsUnavailable(_) => (StatusCode::CONFLICT, err.to_string()),
        DbError::NotFound(_) => (StatusCode::NOT_FOUND, err.to_string()),
        DbError::InvalidTransition(_) => (StatusCode::CONFLICT, err.to_string()),
        DbError::Sqlx(_) | DbError::Migrate(_) => {
            error!("Database error: {err}");
            (StatusCode::INTERNAL_SERVER_ERROR, "database error".to_string())
        }
    }
}

fn flow_error(err: FlowError) -> ApiError {
    match err {
        FlowError::Invalid(msg) => (StatusCode::BAD_REQUEST, msg),
        FlowError::Db(err) => db_error(err),
        FlowError::Gateway(err) => (StatusCode::BAD_GATEWAY, err.to_string()),
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "version": version_string()
    }))
}

// --- Halls ---

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateHallRequest {
    name: String,
    capacity: i64,
    hall_type: HallType,
}

async fn api_create_hall(
    State(state): State<AppState>,
    Json(body): Json<CreateHallRequest>,
) -> Result<Json<Hall>, ApiError> {
    if body.capacity <= 0 {
        return Err((StatusCode::BAD_REQUEST, "capacity must be positive".to_string()));
    }
    let hall = Hall {
        id: boxoffice_models::new_id(),
        name: body.name,
        capacity: body.capacity,
        hall_type: body.hall_type,
    };
    db::insert_hall(&state.pool, &hall).await.map_err(db_error)?;
    info!("Hall {} ({}) created", hall.name, hall.id);
    Ok(Json(hall))
}

async fn api_list_halls(State(state): State<AppState>) -> Result<Json<Vec<Hall>>, ApiError> {
    db::list_halls(&state.pool).await.map(Json).map_err(db_error)
}

// --- Events ---

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateEventRequest {
    title: String,
    event_type: EventType,
    category: String,
    date: String,
    time: String,
    hall_id: String,
    total_seats: i64,
    pricing: PricingTable,
    status: Option<EventStatus>,
}

async fn api_create_event(
    State(state): State<AppState>,
    Json(body): Json<CreateEventRequest>,
) -> Result<Json<Event>, ApiError> {
    let hall = db::get_hall(&state.pool, &body.hall_id)
        .await
        .map_err(db_error)?
        .ok_or((StatusCode::NOT_FOUND, "Hall not found".to_string()))?;
    flow::validate_event_setup(&hall, body.event_type, body.total_seats, &body.pricing)
        .map_err(flow_error)?;
    let event = Event {
        id: boxoffice_models::new_id(),
        title: body.title,
        event_type: body.event_type,
        category: body.category,
        event_date: body.date,
        event_time: body.time,
        hall_id: hall.id,
        total_seats: body.total_seats,
        pricing: DbJson(body.pricing),
        status: body.status.unwrap_or(EventStatus::Active),
        created_at: Utc::now(),
    };
    db::insert_event(&state.pool, &event).await.map_err(db_error)?;
    info!("Event {} ({}) created in hall {}", event.title, event.id, event.hall_id);
    Ok(Json(event))
}

async fn api_list_events(State(state): State<AppState>) -> Result<Json<Vec<Event>>, ApiError> {
    db::list_events(&state.pool).await.map(Json).map_err(db_error)
}

async fn api_get_event(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Event>, ApiError> {
    match db::get_event(&state.pool, &id).await {
        Ok(Some(event)) => Ok(Json(event)),
        Ok(None) => Err((StatusCode::NOT_FOUND, "Event not found".to_string())),
        Err(err) => Err(db_error(err)),
    }
}

async fn api_get_event_seats(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<boxoffice_models::Seat>>, ApiError> {
    let event = db::get_event(&state.pool, &id)
        .await
        .map_err(db_error)?
        .ok_or((StatusCode::NOT_FOUND, "Event not found".to_string()))?;
    flow::seat_map(&state.pool, &event).await.map(Json).map_err(flow_error)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PatchEventRequest {
    new_booked_seats: Vec<String>,
}

/// Direct administrative seat commit: manual/offline bookings bypass the
/// payment flow but obey the same conflict rules.
async fn api_patch_event(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<PatchEventRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let event = db::get_event(&state.pool, &id)
        .await
        .map_err(db_error)?
        .ok_or((StatusCode::NOT_FOUND, "Event not found".to_string()))?;
    let universe = flow::seat_map(&state.pool, &event).await.map_err(flow_error)?;
    for seat_id in &body.new_booked_seats {
        if !universe.iter().any(|s| &s.id == seat_id) {
            return Err((StatusCode::BAD_REQUEST, format!("unknown seat id {seat_id}")));
        }
    }
    db::admin_commit_seats(&state.pool, &event.id, &body.new_booked_seats)
        .await
        .map_err(db_error)?;
    Ok(Json(json!({ "status": "ok", "committed": body.new_booked_seats.len() })))
}

async fn api_delete_event(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let deleted = db::delete_event(&state.pool, &id).await.map_err(db_error)?;
    if deleted {
        Ok(Json(json!({ "status": "ok" })))
    } else {
        Err((StatusCode::NOT_FOUND, "Event not found".to_string()))
    }
}

// --- Bookings and payments ---

async fn api_initiate_booking(
    State(state): State<AppState>,
    Json(body): Json<flow::InitiateRequest>,
) -> Result<Json<flow::InitiateResponse>, ApiError> {
    let method = body.payment_method;
    let gateway = state.gateway(method);
    let mut resp = flow::initiate(&state.pool, gateway, body).await.map_err(flow_error)?;
    if method == PaymentMethod::Card && !state.card_public_key.is_empty() {
        resp.public_key = Some(state.card_public_key.clone());
    }
    Ok(Json(resp))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BookingsQuery {
    event_id: Option<String>,
}

async fn api_list_bookings(
    State(state): State<AppState>,
    Query(params): Query<BookingsQuery>,
) -> Result<Json<Vec<boxoffice_models::Booking>>, ApiError> {
    db::list_bookings(&state.pool, params.event_id.as_deref())
        .await
        .map(Json)
        .map_err(db_error)
}

async fn api_get_booking(
    State(state): State<AppState>,
    Path(reference): Path<String>,
) -> Result<Json<boxoffice_models::Booking>, ApiError> {
    match db::get_booking_by_reference(&state.pool, &reference).await {
        Ok(Some(booking)) => Ok(Json(booking)),
        Ok(None) => Err((StatusCode::NOT_FOUND, "Booking not found".to_string())),
        Err(err) => Err(db_error(err)),
    }
}

async fn settle_and_notify(state: &AppState, reference: &str) -> Result<SettleResult, FlowError> {
    let booking = db::get_booking_by_reference(&state.pool, reference)
        .await?
        .ok_or(DbError::NotFound("booking"))?;
    let gateway = state.gateway(booking.payment_method);
    let result = flow::settle(&state.pool, gateway, reference).await?;
    if let Settlement::Confirmed(_) = result.settlement {
        let title = db::get_event(&state.pool, &result.booking.event_id)
            .await?
            .map(|e| e.title)
            .unwrap_or_else(|| "your event".to_string());
        state.mailer.deliver(result.booking.clone(), title);
    }
    Ok(result)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct VerifyRequest {
    payment_reference: String,
}

async fn api_verify_payment(
    State(state): State<AppState>,
    Json(body): Json<VerifyRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let result = settle_and_notify(&state, &body.payment_reference)
        .await
        .map_err(flow_error)?;
    let response = match &result.settlement {
        Settlement::Confirmed(v) => json!({
            "success": true,
            "paymentStatus": v.status,
            "transactionReference": result.booking.transaction_reference,
            "amountPaid": v.amount_paid,
        }),
        Settlement::AlreadyConfirmed => json!({
            "success": true,
            "paymentStatus": boxoffice_gateway::PaymentStatus::Paid,
            "transactionReference": result.booking.transaction_reference,
            "amountPaid": result.booking.total_amount,
        }),
        Settlement::Failed(v) => json!({
            "success": false,
            "paymentStatus": v.status,
            "transactionReference": result.booking.transaction_reference,
            "amountPaid": v.amount_paid,
        }),
    };
    Ok(Json(response))
}

/// Gateway-initiated webhook. Delivery is at-least-once, so everything
/// here is idempotent per reference. Business rejections still answer
/// 200 — a retry cannot change them; only transient failures answer
/// non-2xx so the gateway retries.
async fn api_payment_webhook(
    State(state): State<AppState>,
    Json(body): Json<serde_json::Value>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let Some(notice) = WebhookNotice::from_json(&body) else {
        return Ok(Json(json!({ "status": "ignored" })));
    };
    info!(
        "Webhook received for {} (claimed status: {})",
        notice.reference,
        notice.claimed_status.as_deref().unwrap_or("none")
    );
    match settle_and_notify(&state, &notice.reference).await {
        Ok(result) => {
            let status = match result.settlement {
                Settlement::Confirmed(_) => "confirmed",
                Settlement::AlreadyConfirmed => "already confirmed",
                Settlement::Failed(_) => "failed",
            };
            Ok(Json(json!({ "status": status })))
        }
        Err(FlowError::Db(DbError::NotFound(_))) => {
            Ok(Json(json!({ "status": "unknown reference" })))
        }
        Err(FlowError::Db(DbError::SeatsUnavailable(seats))) => {
            // Paid booking whose swept seats were taken by someone else.
            // Retrying cannot fix it; flag for manual reconciliation.
            error!(
                "Paid booking {} lost seats {seats:?}; manual reconciliation required",
                notice.reference
            );
            Ok(Json(json!({ "status": "conflict" })))
        }
        Err(FlowError::Invalid(msg)) | Err(FlowError::Db(DbError::InvalidTransition(msg))) => {
            Ok(Json(json!({ "status": "rejected", "reason": msg })))
        }
        Err(FlowError::Gateway(err)) => {
            Err((StatusCode::BAD_GATEWAY, err.to_string()))
        }
        Err(FlowError::Db(err)) => Err(db_error(err)),
    }
}

// --- Server ---

pub async fn run_server(port: u16, state: AppState) -> anyhow::Result<()> {
    info!("boxoffice v{}", version_string());

    let api_routes = Router::new()
        .route("/health", get(health))
        .route("/halls", get(api_list_halls).post(api_create_hall))
        .route("/events", get(api_list_events).post(api_create_event))
        .route(
            "/events/{id}",
            get(api_get_event).patch(api_patch_event).delete(api_delete_event),
        )
        .route("/events/{id}/seats", get(api_get_event_seats))
        .route("/bookings", get(api_list_bookings))
        .route("/bookings/initiate", post(api_initiate_booking))
        .route("/bookings/{reference}", get(api_get_booking))
        .route("/payment/verify", post(api_verify_payment))
        .route("/payment/webhook", post(api_payment_webhook));

    let app = Router::new()
        .nest("/api", api_routes)
        .layer(CorsLayer::permissive())
        .with_state(state);

    let addr = format!("0.0.0.0:{port}");
    info!("Listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use boxoffice_gateway::{MockGateway, PaymentStatus};
    use boxoffice_models::{Booking, SeatTier, TierPricing};
    use sqlx::sqlite::SqlitePoolOptions;

    use super::*;

    #[derive(Default)]
    struct CountingSender {
        delivered: AtomicUsize,
    }

    impl ReceiptSender for CountingSender {
        fn deliver(&self, _booking: Booking, _event_title: String) {
            self.delivered.fetch_add(1, Ordering::SeqCst);
        }
    }

    async fn test_state() -> (AppState, Arc<MockGateway>, Arc<CountingSender>) {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        db::migrate(&pool).await.unwrap();
        let gateway = Arc::new(MockGateway::new());
        let sender = Arc::new(CountingSender::default());
        let card: Arc<dyn PaymentGateway> = gateway.clone();
        let mailer: Arc<dyn ReceiptSender> = sender.clone();
        let state = AppState {
            pool,
            card: card.clone(),
            bank: card,
            mailer,
            card_public_key: "pk_test_abc".to_string(),
        };
        (state, gateway, sender)
    }

    async fn seed_event(pool: &SqlitePool) -> Event {
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
            pricing: DbJson(pricing),
            status: EventStatus::Active,
            created_at: Utc::now(),
        };
        db::insert_event(pool, &event).await.unwrap();
        event
    }

    fn initiate_request(event_id: &str, seats: &[&str]) -> flow::InitiateRequest {
        let amount = 2_500 * seats.len() as i64;
        flow::InitiateRequest {
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
    async fn receipt_goes_out_once_across_duplicate_deliveries() {
        let (state, gateway, sender) = test_state().await;
        let event = seed_event(&state.pool).await;

        let resp = flow::initiate(
            &state.pool,
            state.card.as_ref(),
            initiate_request(&event.id, &["HALLA-1"]),
        )
        .await
        .unwrap();
        gateway.set_status(&resp.payment_reference, PaymentStatus::Paid, 2_600);

        let first = settle_and_notify(&state, &resp.payment_reference).await.unwrap();
        assert!(matches!(first.settlement, Settlement::Confirmed(_)));
        let second = settle_and_notify(&state, &resp.payment_reference).await.unwrap();
        assert!(matches!(second.settlement, Settlement::AlreadyConfirmed));

        assert_eq!(sender.delivered.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_settlement_sends_no_receipt() {
        let (state, _gateway, sender) = test_state().await;
        let event = seed_event(&state.pool).await;

        let resp = flow::initiate(
            &state.pool,
            state.card.as_ref(),
            initiate_request(&event.id, &["HALLA-7"]),
        )
        .await
        .unwrap();
        // Unscripted references verify as PENDING: not paid.
        let result = settle_and_notify(&state, &resp.payment_reference).await.unwrap();
        assert!(matches!(result.settlement, Settlement::Failed(_)));

        assert_eq!(sender.delivered.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn card_initiation_hands_out_the_public_key() {
        let (state, _gateway, _sender) = test_state().await;
        let event = seed_event(&state.pool).await;

        let Json(resp) = api_initiate_booking(
            State(state.clone()),
            Json(initiate_request(&event.id, &["HALLA-2"])),
        )
        .await
        .unwrap();
        assert_eq!(resp.public_key.as_deref(), Some("pk_test_abc"));

        let mut bank_req = initiate_request(&event.id, &["HALLA-3"]);
        bank_req.payment_method = PaymentMethod::BankTransfer;
        let Json(resp) = api_initiate_booking(State(state), Json(bank_req)).await.unwrap();
        assert!(resp.public_key.is_none());
    }
}
