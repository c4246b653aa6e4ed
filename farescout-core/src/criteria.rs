use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Cabin of service requested for the whole trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CabinClass {
    Economy,
    PremiumEconomy,
    Business,
    First,
}

/// A search destination: a concrete airport, or the open-ended "anywhere"
/// explore target.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Place {
    Airport(String),
    Anywhere,
}

impl Place {
    pub fn airport(code: &str) -> Self {
        Place::Airport(code.to_string())
    }

    pub fn code(&self) -> Option<&str> {
        match self {
            Place::Airport(code) => Some(code),
            Place::Anywhere => None,
        }
    }
}

/// One bound of the trip: fly from `origin` to `destination` on `date`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TravelSegment {
    pub origin: String,
    pub destination: Place,
    pub date: NaiveDate,
}

/// Who is travelling. Ages are collected per child because fare rules differ
/// by age; an age the user has not picked yet stays `None`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassengerCounts {
    pub adults: u8,
    pub children: u8,
    pub children_ages: Vec<Option<u8>>,
}

impl PassengerCounts {
    pub fn adults(count: u8) -> Self {
        Self {
            adults: count,
            children: 0,
            children_ages: Vec::new(),
        }
    }
}

impl Default for PassengerCounts {
    fn default() -> Self {
        Self::adults(1)
    }
}

/// Everything the user picked on the search screen.
///
/// Segment count encodes the trip type: 1 = one-way, 2 = round-trip,
/// 3+ = multi-city.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchCriteria {
    pub segments: Vec<TravelSegment>,
    pub passengers: PassengerCounts,
    pub cabin: CabinClass,
    pub direct_only: bool,
}

impl SearchCriteria {
    pub fn one_way(origin: &str, destination: Place, date: NaiveDate) -> Self {
        Self {
            segments: vec![TravelSegment {
                origin: origin.to_string(),
                destination,
                date,
            }],
            passengers: PassengerCounts::default(),
            cabin: CabinClass::Economy,
            direct_only: false,
        }
    }

    pub fn round_trip(
        origin: &str,
        destination: &str,
        depart: NaiveDate,
        return_date: NaiveDate,
    ) -> Self {
        Self {
            segments: vec![
                TravelSegment {
                    origin: origin.to_string(),
                    destination: Place::airport(destination),
                    date: depart,
                },
                TravelSegment {
                    origin: destination.to_string(),
                    destination: Place::airport(origin),
                    date: return_date,
                },
            ],
            passengers: PassengerCounts::default(),
            cabin: CabinClass::Economy,
            direct_only: false,
        }
    }

    pub fn origin(&self) -> Option<&str> {
        self.segments.first().map(|s| s.origin.as_str())
    }

    pub fn destination(&self) -> Option<&Place> {
        self.segments.first().map(|s| &s.destination)
    }
}
