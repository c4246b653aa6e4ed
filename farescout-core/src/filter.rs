use chrono::NaiveTime;
use serde::{Deserialize, Serialize};

/// Server-side sort order for the result list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SortKey {
    #[default]
    Best,
    Cheapest,
    Fastest,
    DepartureTime,
    ArrivalTime,
}

/// Time-of-day window for a leg's departure or arrival.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub from: NaiveTime,
    pub to: NaiveTime,
}

/// User-chosen result constraints, resolved server-side.
///
/// The default value means "no filtering"; the orchestrator embeds the
/// committed spec into the search request, so a changed filter is a new
/// backend job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterSpec {
    pub price_min_minor: Option<i64>,
    pub price_max_minor: Option<i64>,
    pub max_stops: Option<u8>,
    /// Indexed by leg; `None` entries leave that leg unconstrained.
    pub departure_windows: Vec<Option<TimeWindow>>,
    pub arrival_windows: Vec<Option<TimeWindow>>,
    pub max_duration_minutes: Option<u32>,
    pub airlines: Option<Vec<String>>,
    pub sort: SortKey,
}

impl FilterSpec {
    /// True when this spec is equal to its zero value and applies no
    /// constraint at all.
    pub fn is_unfiltered(&self) -> bool {
        *self == FilterSpec::default()
    }

    pub fn direct_only() -> Self {
        Self {
            max_stops: Some(0),
            ..Default::default()
        }
    }
}
