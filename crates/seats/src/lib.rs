//! Seat catalog: the deterministic seat universe for an event.
//!
//! Pure functions of (hall type, event type, hall id, total seats,
//! pricing table). Calling twice with the same inputs yields an
//! identical, identically-ordered list; order matters for display only.

use boxoffice_models::{EventType, HallType, PricingTable, Seat, SeatTier};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CatalogError {
    /// The pricing table has no entry for a tier this layout sells.
    /// Rejected outright rather than defaulting the price to zero.
    #[error("pricing table is missing the {0:?} tier")]
    MissingTierPrice(SeatTier),
}

/// The tiers a pricing table must cover for a given hall/event layout.
pub fn required_tiers(hall_type: HallType, event_type: EventType) -> &'static [SeatTier] {
    match (hall_type, event_type) {
        (HallType::Vip, EventType::Match) => &[SeatTier::Sofa, SeatTier::Regular],
        (HallType::Vip, EventType::Movie) => {
            &[SeatTier::VipSingle, SeatTier::VipCouple, SeatTier::VipFamily]
        }
        (HallType::Standard, EventType::Match) => &[SeatTier::StandardMatch],
        (HallType::Standard, EventType::Movie) => &[SeatTier::StandardSingle],
    }
}

/// Generates the full ordered seat universe for an event. Every seat is
/// returned with `is_booked: false`; the caller overlays availability.
pub fn generate(
    hall_type: HallType,
    event_type: EventType,
    hall_id: &str,
    total_seats: u32,
    pricing: &PricingTable,
) -> Result<Vec<Seat>, CatalogError> {
    let price = |tier: SeatTier| {
        pricing
            .price_of(tier)
            .ok_or(CatalogError::MissingTierPrice(tier))
    };

    let mut seats = Vec::new();
    let mut push = |id: String, tier: SeatTier, price: i64| {
        seats.push(Seat { id, tier, price, is_booked: false });
    };

    match (hall_type, event_type) {
        (HallType::Vip, EventType::Match) => {
            // Two sofa rows of five, two regular rows of six: 22 seats.
            let sofa = price(SeatTier::Sofa)?;
            let regular = price(SeatTier::Regular)?;
            for row in ["S1", "S2"] {
                for n in 1..=5 {
                    push(format!("{row}{n}"), SeatTier::Sofa, sofa);
                }
            }
            for row in ["A", "B"] {
                for n in 1..=6 {
                    push(format!("{row}{n}"), SeatTier::Regular, regular);
                }
            }
        }
        (HallType::Vip, EventType::Movie) => {
            // 20 singles, 7 couple pods (2 seats each), 14 family sections.
            let single = price(SeatTier::VipSingle)?;
            let couple = price(SeatTier::VipCouple)?;
            let family = price(SeatTier::VipFamily)?;
            for n in 1..=20 {
                push(format!("S{n}"), SeatTier::VipSingle, single);
            }
            for n in 1..=7 {
                push(format!("C{n}"), SeatTier::VipCouple, couple);
            }
            for n in 1..=14 {
                push(format!("F{n}"), SeatTier::VipFamily, family);
            }
        }
        (HallType::Standard, event_type) => {
            let tier = match event_type {
                EventType::Match => SeatTier::StandardMatch,
                EventType::Movie => SeatTier::StandardSingle,
            };
            let single = price(tier)?;
            let hall = hall_id.to_uppercase();
            for n in 1..=total_seats {
                push(format!("{hall}-{n}"), tier, single);
            }
        }
    }

    Ok(seats)
}
