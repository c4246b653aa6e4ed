use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::filter::FilterSpec;
use crate::offer::{DayPrice, FlightOffer, MonthKey};
use crate::request::SearchRequest;

/// Identifier of one backend search job. All polling and cache state is
/// scoped to it; a new id invalidates everything held for the old one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SearchJobId(pub Uuid);

impl SearchJobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SearchJobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SearchJobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

/// Backend progress for a search job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Partial,
    Complete,
}

/// One page of results from [`SearchJobClient::poll`].
///
/// Pages may overlap; consumers deduplicate by offer id. `total_count_hint`
/// is the backend's current estimate of the full result set size.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollResult {
    pub offers: Vec<FlightOffer>,
    pub total_count_hint: usize,
    pub status: JobStatus,
}

/// Failures reported by the search backend transport.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    #[error("transport failure: {0}")]
    Transport(String),

    #[error("rate limited by search backend")]
    RateLimited,

    #[error("fatal request failure: {0}")]
    Fatal(String),
}

impl ClientError {
    /// Transient failures are retried with backoff up to the orchestrator's
    /// bound; fatal ones surface immediately.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ClientError::Transport(_) | ClientError::RateLimited)
    }
}

/// The remote search backend. Implementations own the HTTP/JSON shape;
/// this core only depends on the contract.
#[async_trait]
pub trait SearchJobClient: Send + Sync {
    /// Submit a search, starting a backend job.
    async fn submit(&self, request: &SearchRequest) -> Result<SearchJobId, ClientError>;

    /// Fetch the page at `offset` for a running job. Idempotent for the same
    /// `(job, offset)` pair.
    async fn poll(&self, job: &SearchJobId, offset: usize) -> Result<PollResult, ClientError>;

    /// Count of results a candidate filter would match. Read-only: never
    /// affects the committed job.
    async fn preview_count(
        &self,
        job: &SearchJobId,
        filter: &FilterSpec,
    ) -> Result<usize, ClientError>;
}

/// Per-day lowest fares for the calendar overlay.
#[async_trait]
pub trait PriceCalendarClient: Send + Sync {
    async fn month_prices(&self, key: &MonthKey) -> Result<Vec<DayPrice>, ClientError>;
}
