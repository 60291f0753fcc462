use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use sqlx::types::Json;
use uuid::Uuid;

/// Fresh opaque id for halls, events and bookings.
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// Fresh gateway payment reference, generated at booking initiation and
/// carried through webhook and verify calls.
pub fn new_payment_reference() -> String {
    format!("BOX-{}", Uuid::new_v4().simple())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum HallType {
    Vip,
    Standard,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum EventType {
    Movie,
    Match,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum EventStatus {
    Active,
    Draft,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum PaymentMethod {
    Card,
    BankTransfer,
}

/// Closed set of pricing/category buckets. Every seat the catalog
/// generates belongs to exactly one tier.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type,
)]
#[serde(rename_all = "camelCase")]
#[sqlx(rename_all = "camelCase")]
pub enum SeatTier {
    Sofa,
    Regular,
    VipSingle,
    VipCouple,
    VipFamily,
    StandardSingle,
    StandardMatch,
}

/// Price and physical seat count for one tier, in minor currency units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierPricing {
    pub price: i64,
    pub count: u32,
}

/// Tier → {price, count} mapping for an event. Validated at event
/// creation: every tier the hall layout needs must be present, and the
/// counts must add up to the hall capacity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PricingTable(pub BTreeMap<SeatTier, TierPricing>);

impl PricingTable {
    pub fn price_of(&self, tier: SeatTier) -> Option<i64> {
        self.0.get(&tier).map(|t| t.price)
    }

    /// Sum of physical seat counts across all tiers.
    pub fn total_count(&self) -> u32 {
        self.0.values().map(|t| t.count).sum()
    }
}

impl FromIterator<(SeatTier, TierPricing)> for PricingTable {
    fn from_iter<I: IntoIterator<Item = (SeatTier, TierPricing)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Hall {
    pub id: String,
    pub name: String,
    pub capacity: i64,
    pub hall_type: HallType,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Event {
    pub id: String,
    pub title: String,
    pub event_type: EventType,
    pub category: String,
    pub event_date: String,
    pub event_time: String,
    pub hall_id: String,
    pub total_seats: i64,
    pub pricing: Json<PricingTable>,
    pub status: EventStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Booking {
    pub id: String,
    pub customer_name: String,
    pub customer_email: String,
    pub customer_phone: String,
    pub event_id: String,
    pub seats: Json<Vec<String>>,
    pub seat_tier: SeatTier,
    pub amount: i64,
    pub processing_fee: i64,
    pub total_amount: i64,
    pub payment_method: PaymentMethod,
    pub payment_reference: String,
    pub transaction_reference: Option<String>,
    pub status: BookingStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One seat in an event's seat map. Derived from the catalog plus the
/// availability store, never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Seat {
    pub id: String,
    pub tier: SeatTier,
    pub price: i64,
    pub is_booked: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pricing_table_json_uses_tier_keys() {
        let pricing: PricingTable = [
            (SeatTier::Sofa, TierPricing { price: 10_000, count: 10 }),
            (SeatTier::Regular, TierPricing { price: 5_000, count: 12 }),
        ]
        .into_iter()
        .collect();

        let json = serde_json::to_value(&pricing).unwrap();
        assert_eq!(json["sofa"]["price"], 10_000);
        assert_eq!(json["regular"]["count"], 12);

        let back: PricingTable = serde_json::from_value(json).unwrap();
        assert_eq!(back, pricing);
        assert_eq!(back.total_count(), 22);
    }

    #[test]
    fn payment_references_are_unique() {
        let a = new_payment_reference();
        let b = new_payment_reference();
        assert!(a.starts_with("BOX-"));
        assert_ne!(a, b);
    }
}
