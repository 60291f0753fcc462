use std::str::FromStr;

use boxoffice_models::{Booking, BookingStatus, Event, Hall};
use chrono::{Duration, Utc};
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::{SqlitePool, Transaction};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum DbError {
    /// One or more requested seats already have a hold or a committed
    /// booking. Carries the clashing seat ids so the caller can report
    /// exactly which seats lost the race.
    #[error("seats unavailable: {}", .0.join(", "))]
    SeatsUnavailable(Vec<String>),

    #[error("{0} not found")]
    NotFound(&'static str),

    /// A state change that the booking lifecycle forbids, e.g.
    /// confirming a booking that already failed.
    #[error("invalid booking transition: {0}")]
    InvalidTransition(String),

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),

    #[error(transparent)]
    Migrate(#[from] sqlx::migrate::MigrateError),
}

pub type Result<T> = std::result::Result<T, DbError>;

pub async fn connect(database_url: &str) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
    let pool = SqlitePool::connect_with(options).await?;
    info!("Connected to database: {database_url}");
    Ok(pool)
}

pub async fn migrate(pool: &SqlitePool) -> Result<()> {
    sqlx::migrate!("../../migrations").run(pool).await?;
    info!("Migrations applied");
    Ok(())
}

// --- Halls ---

pub async fn insert_hall(pool: &SqlitePool, hall: &Hall) -> Result<()> {
    sqlx::query("INSERT INTO halls (id, name, capacity, hall_type) VALUES (?, ?, ?, ?)")
        .bind(&hall.id)
        .bind(&hall.name)
        .bind(hall.capacity)
        .bind(hall.hall_type)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn list_halls(pool: &SqlitePool) -> Result<Vec<Hall>> {
    let halls = sqlx::query_as::<_, Hall>("SELECT * FROM halls ORDER BY name")
        .fetch_all(pool)
        .await?;
    Ok(halls)
}

pub async fn get_hall(pool: &SqlitePool, id: &str) -> Result<Option<Hall>> {
    let hall = sqlx::query_as::<_, Hall>("SELECT * FROM halls WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(hall)
}

// --- Events ---

const EVENT_COLUMNS: &str = "id, title, event_type, category, event_date, event_time, \
    hall_id, total_seats, pricing, status, created_at";

pub async fn insert_event(pool: &SqlitePool, event: &Event) -> Result<()> {
    let sql = format!(
        "INSERT INTO events ({EVENT_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
    );
    sqlx::query(&sql)
        .bind(&event.id)
        .bind(&event.title)
        .bind(event.event_type)
        .bind(&event.category)
        .bind(&event.event_date)
        .bind(&event.event_time)
        .bind(&event.hall_id)
        .bind(event.total_seats)
        .bind(&event.pricing)
        .bind(event.status)
        .bind(event.created_at)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn list_events(pool: &SqlitePool) -> Result<Vec<Event>> {
    let sql = format!("SELECT {EVENT_COLUMNS} FROM events ORDER BY event_date, event_time");
    let events = sqlx::query_as::<_, Event>(&sql).fetch_all(pool).await?;
    Ok(events)
}

pub async fn get_event(pool: &SqlitePool, id: &str) -> Result<Option<Event>> {
    let sql = format!("SELECT {EVENT_COLUMNS} FROM events WHERE id = ?");
    let event = sqlx::query_as::<_, Event>(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(event)
}

pub async fn delete_event(pool: &SqlitePool, id: &str) -> Result<bool> {
    let result = sqlx::query("DELETE FROM events WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

// --- Availability store ---

/// All seat ids that cannot be offered right now: committed bookings
/// plus live pending holds.
pub async fn unavailable_seat_ids(pool: &SqlitePool, event_id: &str) -> Result<Vec<String>> {
    let ids = sqlx::query_scalar::<_, String>(
        "SELECT seat_id FROM booked_seats WHERE event_id = ? ORDER BY seat_id",
    )
    .bind(event_id)
    .fetch_all(pool)
    .await?;
    Ok(ids)
}

/// Seat ids with a committed (paid or admin-entered) booking only.
pub async fn committed_seat_ids(pool: &SqlitePool, event_id: &str) -> Result<Vec<String>> {
    let ids = sqlx::query_scalar::<_, String>(
        "SELECT seat_id FROM booked_seats WHERE event_id = ? AND state = 'booked' ORDER BY seat_id",
    )
    .bind(event_id)
    .fetch_all(pool)
    .await?;
    Ok(ids)
}

/// Inserts one row per seat inside the caller's transaction. The
/// booked_seats primary key makes this the single atomic reservation
/// point: any seat that already has a row aborts the whole batch.
async fn reserve_seats(
    tx: &mut Transaction<'_, sqlx::Sqlite>,
    event_id: &str,
    booking_id: Option<&str>,
    state: &str,
    at: chrono::DateTime<Utc>,
    seat_ids: &[String],
) -> Result<()> {
    let mut taken = Vec::new();
    for seat_id in seat_ids {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO booked_seats (event_id, seat_id, booking_id, state, created_at) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(event_id)
        .bind(seat_id)
        .bind(booking_id)
        .bind(state)
        .bind(at)
        .execute(&mut **tx)
        .await?;
        if result.rows_affected() == 0 {
            taken.push(seat_id.clone());
        }
    }
    if !taken.is_empty() {
        return Err(DbError::SeatsUnavailable(taken));
    }
    Ok(())
}

/// Direct administrative seat commit (manual/offline bookings). Bypasses
/// the payment flow but obeys the same conflict rules.
pub async fn admin_commit_seats(
    pool: &SqlitePool,
    event_id: &str,
    seat_ids: &[String],
) -> Result<()> {
    let mut tx = pool.begin().await?;
    reserve_seats(&mut tx, event_id, None, "booked", Utc::now(), seat_ids).await?;
    tx.commit().await?;
    info!("{} seats committed for event {event_id} (admin)", seat_ids.len());
    Ok(())
}

// --- Bookings ---

const BOOKING_COLUMNS: &str = "id, customer_name, customer_email, customer_phone, event_id, \
    seats, seat_tier, amount, processing_fee, total_amount, payment_method, \
    payment_reference, transaction_reference, status, created_at, updated_at";

/// Creates the pending booking and holds its seats in one transaction.
/// If any seat is taken, nothing is written and the clashing ids are
/// returned in the error.
pub async fn create_pending_booking(pool: &SqlitePool, booking: &Booking) -> Result<()> {
    let mut tx = pool.begin().await?;
    let sql = format!(
        "INSERT INTO bookings ({BOOKING_COLUMNS}) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
    );
    sqlx::query(&sql)
        .bind(&booking.id)
        .bind(&booking.customer_name)
        .bind(&booking.customer_email)
        .bind(&booking.customer_phone)
        .bind(&booking.event_id)
        .bind(&booking.seats)
        .bind(booking.seat_tier)
        .bind(booking.amount)
        .bind(booking.processing_fee)
        .bind(booking.total_amount)
        .bind(booking.payment_method)
        .bind(&booking.payment_reference)
        .bind(&booking.transaction_reference)
        .bind(booking.status)
        .bind(booking.created_at)
        .bind(booking.updated_at)
        .execute(&mut *tx)
        .await?;
    reserve_seats(
        &mut tx,
        &booking.event_id,
        Some(&booking.id),
        "held",
        booking.created_at,
        &booking.seats.0,
    )
    .await?;
    tx.commit().await?;
    info!(
        "Pending booking {} created for event {} ({} seats held)",
        booking.id,
        booking.event_id,
        booking.seats.0.len()
    );
    Ok(())
}

/// Looks a booking up by either our payment reference or the
/// gateway-assigned transaction reference.
pub async fn get_booking_by_reference(
    pool: &SqlitePool,
    reference: &str,
) -> Result<Option<Booking>> {
    let sql = format!(
        "SELECT {BOOKING_COLUMNS} FROM bookings \
         WHERE payment_reference = ? OR transaction_reference = ?"
    );
    let booking = sqlx::query_as::<_, Booking>(&sql)
        .bind(reference)
        .bind(reference)
        .fetch_optional(pool)
        .await?;
    Ok(booking)
}

pub async fn set_transaction_reference(
    pool: &SqlitePool,
    booking_id: &str,
    transaction_reference: &str,
) -> Result<()> {
    sqlx::query("UPDATE bookings SET transaction_reference = ?, updated_at = ? WHERE id = ?")
        .bind(transaction_reference)
        .bind(Utc::now())
        .bind(booking_id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn list_bookings(pool: &SqlitePool, event_id: Option<&str>) -> Result<Vec<Booking>> {
    let bookings = match event_id {
        Some(event_id) => {
            let sql = format!(
                "SELECT {BOOKING_COLUMNS} FROM bookings WHERE event_id = ? ORDER BY created_at"
            );
            sqlx::query_as::<_, Booking>(&sql)
                .bind(event_id)
                .fetch_all(pool)
                .await?
        }
        None => {
            let sql = format!("SELECT {BOOKING_COLUMNS} FROM bookings ORDER BY created_at");
            sqlx::query_as::<_, Booking>(&sql).fetch_all(pool).await?
        }
    };
    Ok(bookings)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmOutcome {
    /// The booking transitioned pending → confirmed in this call.
    Confirmed,
    /// The booking was already confirmed; nothing was written.
    AlreadyConfirmed,
}

/// Confirms a paid booking: flips its status and commits its held seats,
/// all in one transaction. Safe to call any number of times for the same
/// reference; only the first call has side effects.
///
/// If a hold expired and another customer took one of the seats in the
/// meantime, the whole transaction rolls back and the booking stays
/// pending with `SeatsUnavailable` listing the clash.
pub async fn confirm_booking(pool: &SqlitePool, reference: &str) -> Result<ConfirmOutcome> {
    let mut tx = pool.begin().await?;
    let sql = format!(
        "SELECT {BOOKING_COLUMNS} FROM bookings \
         WHERE payment_reference = ? OR transaction_reference = ?"
    );
    let booking = sqlx::query_as::<_, Booking>(&sql)
        .bind(reference)
        .bind(reference)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(DbError::NotFound("booking"))?;

    match booking.status {
        BookingStatus::Confirmed => Ok(ConfirmOutcome::AlreadyConfirmed),
        BookingStatus::Failed | BookingStatus::Cancelled => Err(DbError::InvalidTransition(
            format!("cannot confirm a {:?} booking", booking.status).to_lowercase(),
        )),
        BookingStatus::Pending => {
            sqlx::query("UPDATE bookings SET status = 'confirmed', updated_at = ? WHERE id = ?")
                .bind(Utc::now())
                .bind(&booking.id)
                .execute(&mut *tx)
                .await?;

            sqlx::query(
                "UPDATE booked_seats SET state = 'booked' \
                 WHERE event_id = ? AND booking_id = ? AND state = 'held'",
            )
            .bind(&booking.event_id)
            .bind(&booking.id)
            .execute(&mut *tx)
            .await?;

            // Holds swept while the customer was paying must be re-taken.
            let owned = sqlx::query_scalar::<_, String>(
                "SELECT seat_id FROM booked_seats WHERE event_id = ? AND booking_id = ?",
            )
            .bind(&booking.event_id)
            .bind(&booking.id)
            .fetch_all(&mut *tx)
            .await?;
            let missing: Vec<String> = booking
                .seats
                .0
                .iter()
                .filter(|s| !owned.contains(s))
                .cloned()
                .collect();
            if !missing.is_empty() {
                reserve_seats(
                    &mut tx,
                    &booking.event_id,
                    Some(&booking.id),
                    "booked",
                    Utc::now(),
                    &missing,
                )
                .await?;
            }

            tx.commit().await?;
            info!(
                "Booking {} confirmed, {} seats committed for event {}",
                booking.id,
                booking.seats.0.len(),
                booking.event_id
            );
            Ok(ConfirmOutcome::Confirmed)
        }
    }
}

/// Moves a pending booking to `failed` or `cancelled` and releases its
/// held seats. Terminal states are left untouched: a confirmed booking
/// is never downgraded, and repeating a failure is a no-op.
///
/// Returns whether a transition actually happened.
pub async fn fail_booking(
    pool: &SqlitePool,
    reference: &str,
    to: BookingStatus,
) -> Result<bool> {
    debug_assert!(matches!(to, BookingStatus::Failed | BookingStatus::Cancelled));
    let mut tx = pool.begin().await?;
    let sql = format!(
        "SELECT {BOOKING_COLUMNS} FROM bookings \
         WHERE payment_reference = ? OR transaction_reference = ?"
    );
    let booking = sqlx::query_as::<_, Booking>(&sql)
        .bind(reference)
        .bind(reference)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(DbError::NotFound("booking"))?;

    if booking.status != BookingStatus::Pending {
        return Ok(false);
    }

    sqlx::query("UPDATE bookings SET status = ?, updated_at = ? WHERE id = ?")
        .bind(to)
        .bind(Utc::now())
        .bind(&booking.id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM booked_seats WHERE booking_id = ? AND state = 'held'")
        .bind(&booking.id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    info!("Booking {} marked {:?}, holds released", booking.id, to);
    Ok(true)
}

/// Sweep for abandoned checkouts: cancels pending bookings older than
/// `older_than` and releases their holds. Returns the number of
/// bookings cancelled.
pub async fn release_expired_holds(pool: &SqlitePool, older_than: Duration) -> Result<u64> {
    let cutoff = Utc::now() - older_than;
    let mut tx = pool.begin().await?;
    let cancelled = sqlx::query(
        "UPDATE bookings SET status = 'cancelled', updated_at = ? \
         WHERE status = 'pending' AND created_at < ?",
    )
    .bind(Utc::now())
    .bind(cutoff)
    .execute(&mut *tx)
    .await?
    .rows_affected();
    sqlx::query("DELETE FROM booked_seats WHERE state = 'held' AND created_at < ?")
        .bind(cutoff)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    if cancelled > 0 {
        info!("{cancelled} stale pending bookings cancelled, holds released");
    }
    Ok(cancelled)
}
