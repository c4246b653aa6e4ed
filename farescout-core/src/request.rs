use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::criteria::{Place, SearchCriteria};
use crate::filter::FilterSpec;

/// Why a [`SearchCriteria`] cannot be turned into a request.
///
/// These are caller errors: they are returned synchronously and never
/// retried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CriteriaError {
    #[error("search needs at least one travel segment")]
    NoSegments,

    #[error("invalid airport code: {0}")]
    InvalidCode(String),

    #[error("origin and destination are the same: {0}")]
    SameOriginDestination(String),

    #[error("segment date {0} is in the past")]
    DateInPast(NaiveDate),

    #[error("at least one adult passenger is required")]
    NoAdults,

    #[error("children count {count} does not match {ages} collected ages")]
    ChildrenAgesMismatch { count: u8, ages: usize },
}

/// Normalized wire shape submitted to the search backend. The committed
/// filter travels with the request because filtering is resolved
/// server-side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchRequest {
    pub criteria: SearchCriteria,
    pub filter: FilterSpec,
}

/// Pure criteria validation and normalization. No side effects.
pub struct SearchRequestBuilder;

impl SearchRequestBuilder {
    pub fn build(criteria: &SearchCriteria, filter: &FilterSpec) -> Result<SearchRequest, CriteriaError> {
        Self::build_at(criteria, filter, Utc::now().date_naive())
    }

    /// `today` is injected so "date in the past" is checkable in tests.
    pub fn build_at(
        criteria: &SearchCriteria,
        filter: &FilterSpec,
        today: NaiveDate,
    ) -> Result<SearchRequest, CriteriaError> {
        if criteria.segments.is_empty() {
            return Err(CriteriaError::NoSegments);
        }

        for segment in &criteria.segments {
            validate_code(&segment.origin)?;
            match &segment.destination {
                Place::Airport(code) => {
                    validate_code(code)?;
                    if code == &segment.origin {
                        return Err(CriteriaError::SameOriginDestination(code.clone()));
                    }
                }
                Place::Anywhere => {}
            }
            if segment.date < today {
                return Err(CriteriaError::DateInPast(segment.date));
            }
        }

        let passengers = &criteria.passengers;
        if passengers.adults == 0 {
            return Err(CriteriaError::NoAdults);
        }
        if passengers.children_ages.len() != passengers.children as usize {
            return Err(CriteriaError::ChildrenAgesMismatch {
                count: passengers.children,
                ages: passengers.children_ages.len(),
            });
        }

        Ok(SearchRequest {
            criteria: criteria.clone(),
            filter: filter.clone(),
        })
    }
}

fn validate_code(code: &str) -> Result<(), CriteriaError> {
    let iata_like = code.len() == 3 && code.bytes().all(|b| b.is_ascii_uppercase());
    if iata_like {
        Ok(())
    } else {
        Err(CriteriaError::InvalidCode(code.to_string()))
    }
}
