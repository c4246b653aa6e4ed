use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::criteria::{CabinClass, Place};

/// Monetary amount in minor units (cents, fils, ...) plus ISO currency code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Price {
    pub amount_minor: i64,
    pub currency: String,
}

impl Price {
    pub fn new(amount_minor: i64, currency: &str) -> Self {
        Self {
            amount_minor,
            currency: currency.to_string(),
        }
    }
}

/// One scheduled flight within a leg.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlightSegment {
    pub airline_code: String,
    pub flight_number: String,
    pub origin: String,
    pub destination: String,
    pub departure: DateTime<Utc>,
    pub arrival: DateTime<Utc>,
    pub cabin: CabinClass,
}

/// An ordered chain of segments flown as one bound (outbound, inbound, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlightLeg {
    pub segments: Vec<FlightSegment>,
}

impl FlightLeg {
    pub fn departure(&self) -> Option<DateTime<Utc>> {
        self.segments.first().map(|s| s.departure)
    }

    pub fn arrival(&self) -> Option<DateTime<Utc>> {
        self.segments.last().map(|s| s.arrival)
    }

    /// Number of intermediate stops (0 = direct).
    pub fn stop_count(&self) -> usize {
        self.segments.len().saturating_sub(1)
    }

    pub fn duration(&self) -> Option<chrono::Duration> {
        match (self.departure(), self.arrival()) {
            (Some(dep), Some(arr)) => Some(arr - dep),
            _ => None,
        }
    }
}

/// Where an offer can be booked, with the provider's own price.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingProvider {
    pub name: String,
    pub price: Price,
    pub deep_link: String,
}

/// A bookable itinerary returned by the search backend.
///
/// `id` is assigned by the backend and stable across result pages; it is the
/// deduplication key for the result cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlightOffer {
    pub id: String,
    pub legs: Vec<FlightLeg>,
    pub total_price: Price,
    pub is_best: bool,
    pub is_cheapest: bool,
    pub is_fastest: bool,
    pub providers: Vec<BookingProvider>,
}

impl FlightOffer {
    /// Total stops across all legs.
    pub fn stop_count(&self) -> usize {
        self.legs.iter().map(FlightLeg::stop_count).sum()
    }

    /// Legs must depart in chronological order.
    pub fn legs_are_ordered(&self) -> bool {
        self.legs
            .windows(2)
            .all(|pair| match (pair[0].departure(), pair[1].departure()) {
                (Some(a), Some(b)) => a <= b,
                _ => false,
            })
    }

    /// Airlines operating any segment of this offer.
    pub fn airlines(&self) -> Vec<&str> {
        let mut codes: Vec<&str> = self
            .legs
            .iter()
            .flat_map(|l| l.segments.iter().map(|s| s.airline_code.as_str()))
            .collect();
        codes.sort_unstable();
        codes.dedup();
        codes
    }
}

/// Cache key for one month of calendar price overlays.
///
/// Currency is part of the key: prices fetched under one currency can never
/// be read back under another.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MonthKey {
    pub origin: String,
    pub destination: Place,
    pub year: i32,
    pub month: u32,
    pub currency: String,
}

/// Lowest known fare for a single day, shown on the calendar overlay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayPrice {
    pub day: NaiveDate,
    pub price: Price,
}
