use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use uuid::Uuid;

use farescout_core::{
    CabinClass, ClientError, FilterSpec, FlightLeg, FlightOffer, FlightSegment, JobStatus,
    PollResult, Price, SearchJobClient, SearchJobId, SearchRequest,
};

/// Build a deterministic offer with the given backend id.
pub fn sample_offer(id: &str) -> FlightOffer {
    let departure = Utc.with_ymd_and_hms(2026, 9, 10, 4, 30, 0).unwrap();
    FlightOffer {
        id: id.to_string(),
        legs: vec![FlightLeg {
            segments: vec![FlightSegment {
                airline_code: "EK".to_string(),
                flight_number: "EK531".to_string(),
                origin: "COK".to_string(),
                destination: "DXB".to_string(),
                departure,
                arrival: departure + ChronoDuration::hours(4),
                cabin: CabinClass::Economy,
            }],
        }],
        total_price: Price::new(42_000, "AED"),
        is_best: false,
        is_cheapest: false,
        is_fastest: false,
        providers: vec![],
    }
}

/// Build an offer with a freshly generated id, for pages where identity does
/// not matter.
pub fn unique_offer() -> FlightOffer {
    sample_offer(&Uuid::new_v4().simple().to_string())
}

/// Build a page response.
pub fn page(offers: Vec<FlightOffer>, total_count_hint: usize, status: JobStatus) -> PollResult {
    PollResult {
        offers,
        total_count_hint,
        status,
    }
}

#[derive(Default)]
struct MockState {
    submit_script: VecDeque<Result<SearchJobId, ClientError>>,
    poll_script: VecDeque<Result<PollResult, ClientError>>,
    preview_count: usize,
    preview_delay: Duration,
    submit_calls: u32,
    poll_calls: u32,
    submitted_requests: Vec<SearchRequest>,
    polled_offsets: Vec<usize>,
    preview_filters: Vec<FilterSpec>,
}

/// Scriptable stand-in for the search backend.
///
/// Scripted responses are consumed in call order; once the poll script runs
/// dry the mock keeps answering `Pending` with an empty page, which is the
/// shape of a backend that never produces data.
pub struct MockSearchClient {
    state: Mutex<MockState>,
}

impl MockSearchClient {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState {
                preview_delay: Duration::ZERO,
                ..Default::default()
            }),
        }
    }

    pub fn queue_submit_job(&self, job: SearchJobId) {
        self.state.lock().unwrap().submit_script.push_back(Ok(job));
    }

    pub fn queue_submit_err(&self, err: ClientError) {
        self.state.lock().unwrap().submit_script.push_back(Err(err));
    }

    pub fn queue_poll(&self, result: PollResult) {
        self.state.lock().unwrap().poll_script.push_back(Ok(result));
    }

    pub fn queue_poll_err(&self, err: ClientError) {
        self.state.lock().unwrap().poll_script.push_back(Err(err));
    }

    pub fn set_preview_count(&self, count: usize) {
        self.state.lock().unwrap().preview_count = count;
    }

    /// Make `preview_count` hang for `delay` before answering, to simulate a
    /// request that is still in flight when it gets superseded.
    pub fn set_preview_delay(&self, delay: Duration) {
        self.state.lock().unwrap().preview_delay = delay;
    }

    pub fn submit_calls(&self) -> u32 {
        self.state.lock().unwrap().submit_calls
    }

    pub fn submitted_requests(&self) -> Vec<SearchRequest> {
        self.state.lock().unwrap().submitted_requests.clone()
    }

    pub fn poll_calls(&self) -> u32 {
        self.state.lock().unwrap().poll_calls
    }

    pub fn polled_offsets(&self) -> Vec<usize> {
        self.state.lock().unwrap().polled_offsets.clone()
    }

    pub fn preview_filters(&self) -> Vec<FilterSpec> {
        self.state.lock().unwrap().preview_filters.clone()
    }
}

impl Default for MockSearchClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SearchJobClient for MockSearchClient {
    async fn submit(&self, request: &SearchRequest) -> Result<SearchJobId, ClientError> {
        let mut state = self.state.lock().unwrap();
        state.submit_calls += 1;
        state.submitted_requests.push(request.clone());
        state
            .submit_script
            .pop_front()
            .unwrap_or_else(|| Ok(SearchJobId::new()))
    }

    async fn poll(&self, _job: &SearchJobId, offset: usize) -> Result<PollResult, ClientError> {
        let mut state = self.state.lock().unwrap();
        state.poll_calls += 1;
        state.polled_offsets.push(offset);
        state.poll_script.pop_front().unwrap_or_else(|| {
            Ok(PollResult {
                offers: vec![],
                total_count_hint: 0,
                status: JobStatus::Pending,
            })
        })
    }

    async fn preview_count(
        &self,
        _job: &SearchJobId,
        filter: &FilterSpec,
    ) -> Result<usize, ClientError> {
        let (count, delay) = {
            let mut state = self.state.lock().unwrap();
            state.preview_filters.push(filter.clone());
            (state.preview_count, state.preview_delay)
        };
        if delay > Duration::ZERO {
            tokio::time::sleep(delay).await;
        }
        Ok(count)
    }
}
