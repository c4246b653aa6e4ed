use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use rand::Rng;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, info, warn};

use farescout_core::{
    ClientError, CriteriaError, FilterSpec, JobStatus, PollResult, SearchCriteria, SearchJobClient,
    SearchJobId, SearchRequest, SearchRequestBuilder,
};

use crate::cache::{CacheSnapshot, MergeOutcome, ResultCache};
use crate::events::{SearchEvent, EVENT_CHANNEL_CAPACITY};
use crate::loadmore::LoadMoreController;
use crate::preview::FilterPreviewEngine;

/// Classified reason carried by [`PollCycleState::Error`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorReason {
    #[error("search backend unreachable: {0}")]
    Network(String),

    #[error("unable to load flight results")]
    NoResults,

    #[error("backend completed with fewer results than promised")]
    Inconsistent,
}

/// What the search is doing right now. Drives the UI: skeleton while
/// `Submitting`/`Polling`, result list on `Loaded`, the "no flights found"
/// affordance on `Empty`, retry affordance on `Error`.
///
/// `Stalled` is an internal recovery state; it resolves to `Loaded`, `Empty`
/// or `Error` on its own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PollCycleState {
    Idle,
    Submitting,
    Polling,
    Loaded,
    Empty,
    Stalled,
    Error(ErrorReason),
}

/// Every timer and bound in the poll cycle. Defaults match the shipped
/// product behavior; all knobs are overridable.
#[derive(Debug, Clone)]
pub struct PollingConfig {
    /// Submit attempts before giving up on starting a job.
    pub submit_attempts: u32,
    /// First submit retry delay; doubles per attempt.
    pub submit_backoff_base: Duration,
    /// Ceiling for the submit backoff.
    pub submit_backoff_cap: Duration,
    /// Cadence of the poll loop.
    pub poll_interval: Duration,
    /// Consecutive no-progress polls before the job counts as stalled.
    pub stale_threshold: u32,
    /// Delay between stall-recovery re-polls.
    pub stall_retry_delay: Duration,
    /// Stall-recovery re-polls before surfacing a terminal state.
    pub max_stall_retries: u32,
    /// Per-call network timeout; an elapsed timeout counts as a transient
    /// transport failure.
    pub request_timeout: Duration,
    /// Quiet period before a candidate filter's preview count is fetched.
    pub preview_debounce: Duration,
    /// Delay before the single load-more retry while the backend is still
    /// producing.
    pub load_more_retry_delay: Duration,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            submit_attempts: 3,
            submit_backoff_base: Duration::from_millis(500),
            submit_backoff_cap: Duration::from_secs(4),
            poll_interval: Duration::from_millis(1500),
            stale_threshold: 3,
            stall_retry_delay: Duration::from_secs(2),
            max_stall_retries: 5,
            request_timeout: Duration::from_secs(10),
            preview_debounce: Duration::from_millis(800),
            load_more_retry_delay: Duration::from_secs(2),
        }
    }
}

impl PollingConfig {
    /// Exponential submit backoff with +/-10% jitter. `attempt` is 1-based.
    fn submit_backoff(&self, attempt: u32) -> Duration {
        let exp = self
            .submit_backoff_base
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)));
        let capped = exp.min(self.submit_backoff_cap);
        capped.mul_f64(rand::thread_rng().gen_range(0.9..=1.1))
    }
}

pub(crate) struct SearchState {
    pub(crate) generation: u64,
    pub(crate) phase: PollCycleState,
    pub(crate) cache: ResultCache,
    pub(crate) last_request: Option<SearchRequest>,
    pub(crate) load_in_flight: bool,
    task: Option<JoinHandle<()>>,
}

/// State shared between the orchestrator, its spawned poll task, the
/// load-more controller and the preview engine.
///
/// All mutation happens synchronously under `inner`; the lock is never held
/// across an await, and events are published while it is held, so observers
/// see every snapshot in mutation order.
pub(crate) struct SearchShared {
    inner: Mutex<SearchState>,
    events: broadcast::Sender<SearchEvent>,
}

impl SearchShared {
    fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Mutex::new(SearchState {
                generation: 0,
                phase: PollCycleState::Idle,
                cache: ResultCache::new(),
                last_request: None,
                load_in_flight: false,
                task: None,
            }),
            events,
        }
    }

    fn lock(&self) -> MutexGuard<'_, SearchState> {
        self.inner.lock().expect("search state lock poisoned")
    }

    fn emit(&self, event: SearchEvent) {
        // A send error only means nobody is subscribed.
        let _ = self.events.send(event);
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<SearchEvent> {
        self.events.subscribe()
    }

    pub(crate) fn state(&self) -> PollCycleState {
        self.lock().phase.clone()
    }

    pub(crate) fn snapshot(&self) -> CacheSnapshot {
        self.lock().cache.snapshot()
    }

    pub(crate) fn current_job(&self) -> Option<SearchJobId> {
        self.lock().cache.job()
    }

    pub(crate) fn is_stale(&self, generation: u64) -> bool {
        self.lock().generation != generation
    }

    pub(crate) fn next_offset(&self) -> usize {
        self.lock().cache.next_offset()
    }

    /// Scope the cache to a freshly submitted job and enter `Polling`.
    fn begin_job(&self, generation: u64, job: SearchJobId) -> bool {
        let mut state = self.lock();
        if state.generation != generation {
            debug!(job = %job, "submitted job superseded before first poll");
            return false;
        }
        state.cache.reset(job);
        state.phase = PollCycleState::Polling;
        info!(job = %job, "search job started");
        self.emit(SearchEvent::StateChanged(PollCycleState::Polling));
        self.emit(SearchEvent::CacheUpdated(state.cache.snapshot()));
        true
    }

    /// Merge one page into the cache. Returns `None` when the response
    /// belongs to a superseded search (checked at fire time, not schedule
    /// time).
    pub(crate) fn merge_page(
        &self,
        generation: u64,
        job: &SearchJobId,
        page: PollResult,
    ) -> Option<MergeOutcome> {
        let mut state = self.lock();
        if state.generation != generation {
            debug!(job = %job, "discarding poll response for superseded search");
            return None;
        }
        let is_complete = page.status == JobStatus::Complete;
        let outcome = state
            .cache
            .merge(job, page.offers, page.total_count_hint, is_complete);
        self.emit(SearchEvent::CacheUpdated(state.cache.snapshot()));
        Some(outcome)
    }

    /// Emit `Loaded` once offers are present; polling may continue behind
    /// it.
    pub(crate) fn note_loaded(&self, generation: u64) {
        let mut state = self.lock();
        if state.generation != generation || state.cache.is_empty() {
            return;
        }
        if state.phase != PollCycleState::Loaded {
            state.phase = PollCycleState::Loaded;
            self.emit(SearchEvent::StateChanged(PollCycleState::Loaded));
        }
    }

    /// Terminal transition once the backend reports the job complete:
    /// `Loaded` with results, `Empty` without.
    pub(crate) fn settle_complete(&self, generation: u64) {
        let mut state = self.lock();
        if state.generation != generation {
            return;
        }
        let target = if state.cache.is_empty() {
            PollCycleState::Empty
        } else {
            PollCycleState::Loaded
        };
        if state.phase != target {
            info!(state = ?target, "search settled");
            state.phase = target.clone();
            self.emit(SearchEvent::StateChanged(target));
        }
    }

    fn mark_stalled(&self, generation: u64) {
        let mut state = self.lock();
        if state.generation != generation {
            return;
        }
        warn!("poll cycle stalled, entering auto-retry");
        state.phase = PollCycleState::Stalled;
        self.emit(SearchEvent::StateChanged(PollCycleState::Stalled));
    }

    pub(crate) fn fail(&self, generation: u64, reason: ErrorReason) {
        let mut state = self.lock();
        if state.generation != generation {
            return;
        }
        warn!(%reason, "search failed");
        let phase = PollCycleState::Error(reason);
        state.phase = phase.clone();
        self.emit(SearchEvent::StateChanged(phase));
    }

    /// Atomically claim the load-more slot. Returns the generation, job and
    /// offset to request, or `None` when no load should run.
    pub(crate) fn claim_load(&self) -> Option<(u64, SearchJobId, usize)> {
        let mut state = self.lock();
        if state.load_in_flight {
            return None;
        }
        let job = state.cache.job()?;
        let snapshot = state.cache.snapshot();
        if snapshot.is_backend_complete && snapshot.loaded_count() >= snapshot.total_count_hint {
            return None;
        }
        state.load_in_flight = true;
        Some((state.generation, job, state.cache.next_offset()))
    }

    pub(crate) fn finish_load(&self, generation: u64) {
        let mut state = self.lock();
        if state.generation == generation {
            state.load_in_flight = false;
        }
    }

    pub(crate) fn load_in_flight(&self) -> bool {
        self.lock().load_in_flight
    }

    pub(crate) fn publish_preview(&self, count: usize) {
        self.emit(SearchEvent::PreviewCountUpdated(count));
    }
}

/// The single owner of the search lifecycle: submits jobs, runs the poll
/// loop, detects stalls, bounds retries, and publishes every state and
/// cache change to observers.
///
/// One poll loop runs at a time; each iteration schedules the next only
/// after the previous response is processed. Starting a new search (or
/// committing a filter) supersedes the old job: its task is aborted, and any
/// response that still lands is dropped by the generation and job-id guards.
pub struct PollingOrchestrator {
    client: Arc<dyn SearchJobClient>,
    config: PollingConfig,
    shared: Arc<SearchShared>,
}

impl PollingOrchestrator {
    pub fn new(client: Arc<dyn SearchJobClient>) -> Self {
        Self::with_config(client, PollingConfig::default())
    }

    pub fn with_config(client: Arc<dyn SearchJobClient>, config: PollingConfig) -> Self {
        Self {
            client,
            config,
            shared: Arc::new(SearchShared::new()),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SearchEvent> {
        self.shared.subscribe()
    }

    /// The event bus as a `Stream`, for UI layers that consume streams.
    pub fn event_stream(&self) -> BroadcastStream<SearchEvent> {
        BroadcastStream::new(self.shared.subscribe())
    }

    pub fn state(&self) -> PollCycleState {
        self.shared.state()
    }

    pub fn snapshot(&self) -> CacheSnapshot {
        self.shared.snapshot()
    }

    /// Pagination driver bound to this orchestrator's state.
    pub fn load_more_controller(&self) -> LoadMoreController {
        LoadMoreController::new(self.shared.clone(), self.client.clone(), self.config.clone())
    }

    /// Debounced preview-count fetcher bound to this orchestrator's job.
    pub fn preview_engine(&self) -> FilterPreviewEngine {
        FilterPreviewEngine::new(self.shared.clone(), self.client.clone(), self.config.clone())
    }

    /// Start a brand-new search, superseding any in-flight one.
    ///
    /// `InvalidCriteria` is the only failure reported synchronously; every
    /// later failure surfaces as [`PollCycleState::Error`].
    pub fn start_search(
        &self,
        criteria: &SearchCriteria,
        filter: &FilterSpec,
    ) -> Result<(), CriteriaError> {
        let request = SearchRequestBuilder::build(criteria, filter)?;
        let mut state = self.shared.lock();
        state.generation += 1;
        let generation = state.generation;
        if let Some(task) = state.task.take() {
            task.abort();
        }
        state.last_request = Some(request.clone());
        state.load_in_flight = false;
        state.phase = PollCycleState::Submitting;
        self.shared
            .emit(SearchEvent::StateChanged(PollCycleState::Submitting));

        let shared = self.shared.clone();
        let client = self.client.clone();
        let config = self.config.clone();
        state.task = Some(tokio::spawn(async move {
            run_search(shared, client, config, request, generation).await;
        }));
        Ok(())
    }

    /// Committing a filter re-searches with the filter embedded in the
    /// request; filters are resolved server-side, so this is a new job.
    pub fn commit_filter(&self, filter: &FilterSpec) -> Result<(), CriteriaError> {
        let criteria = match self.shared.lock().last_request.as_ref() {
            Some(request) => request.criteria.clone(),
            None => {
                warn!("filter committed before any search, ignoring");
                return Ok(());
            }
        };
        self.start_search(&criteria, filter)
    }

    /// User-invoked recovery from `Error`. Re-polls the existing job when
    /// one exists, so a completed submit is never duplicated; otherwise
    /// re-submits the last request.
    pub fn retry(&self) {
        let mut state = self.shared.lock();
        if !matches!(state.phase, PollCycleState::Error(_)) {
            warn!(state = ?state.phase, "retry ignored outside of error state");
            return;
        }
        state.generation += 1;
        let generation = state.generation;
        if let Some(task) = state.task.take() {
            task.abort();
        }

        let shared = self.shared.clone();
        let client = self.client.clone();
        let config = self.config.clone();
        if let Some(job) = state.cache.job() {
            info!(job = %job, "retrying existing search job");
            state.phase = PollCycleState::Polling;
            self.shared
                .emit(SearchEvent::StateChanged(PollCycleState::Polling));
            state.task = Some(tokio::spawn(async move {
                poll_until_settled(&shared, client.as_ref(), &config, job, generation).await;
            }));
        } else if let Some(request) = state.last_request.clone() {
            info!("retrying search submission");
            state.phase = PollCycleState::Submitting;
            self.shared
                .emit(SearchEvent::StateChanged(PollCycleState::Submitting));
            state.task = Some(tokio::spawn(async move {
                run_search(shared, client, config, request, generation).await;
            }));
        } else {
            warn!("nothing to retry");
        }
    }
}

/// Run a client call under the configured timeout; an elapsed timeout is a
/// transient transport failure.
pub(crate) async fn with_timeout<T, F>(limit: Duration, call: F) -> Result<T, ClientError>
where
    F: Future<Output = Result<T, ClientError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(ClientError::Transport("request timed out".to_string())),
    }
}

async fn run_search(
    shared: Arc<SearchShared>,
    client: Arc<dyn SearchJobClient>,
    config: PollingConfig,
    request: SearchRequest,
    generation: u64,
) {
    let job = match submit_with_backoff(&shared, client.as_ref(), &config, &request, generation)
        .await
    {
        Ok(job) => job,
        Err(reason) => {
            shared.fail(generation, reason);
            return;
        }
    };
    if !shared.begin_job(generation, job) {
        return;
    }
    poll_until_settled(&shared, client.as_ref(), &config, job, generation).await;
}

async fn submit_with_backoff(
    shared: &SearchShared,
    client: &dyn SearchJobClient,
    config: &PollingConfig,
    request: &SearchRequest,
    generation: u64,
) -> Result<SearchJobId, ErrorReason> {
    let mut attempt = 1;
    loop {
        if shared.is_stale(generation) {
            return Err(ErrorReason::NoResults);
        }
        match with_timeout(config.request_timeout, client.submit(request)).await {
            Ok(job) => return Ok(job),
            Err(err) if err.is_retryable() && attempt < config.submit_attempts => {
                let delay = config.submit_backoff(attempt);
                warn!(attempt, delay_ms = delay.as_millis() as u64, %err, "submit failed, backing off");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(ErrorReason::Network(err.to_string())),
        }
    }
}

async fn poll_until_settled(
    shared: &SearchShared,
    client: &dyn SearchJobClient,
    config: &PollingConfig,
    job: SearchJobId,
    generation: u64,
) {
    let mut no_progress_streak = 0u32;
    loop {
        if shared.is_stale(generation) {
            return;
        }
        let offset = shared.next_offset();
        match with_timeout(config.request_timeout, client.poll(&job, offset)).await {
            Ok(page) => {
                let status = page.status;
                let Some(outcome) = shared.merge_page(generation, &job, page) else {
                    return;
                };
                if status == JobStatus::Complete {
                    shared.settle_complete(generation);
                    return;
                }
                if outcome.added > 0 {
                    no_progress_streak = 0;
                    shared.note_loaded(generation);
                } else {
                    no_progress_streak += 1;
                }
            }
            Err(err) if err.is_retryable() => {
                warn!(%err, "poll failed, counting toward stall");
                no_progress_streak += 1;
            }
            Err(err) => {
                shared.fail(generation, ErrorReason::Network(err.to_string()));
                return;
            }
        }

        if no_progress_streak >= config.stale_threshold {
            if !recover_from_stall(shared, client, config, job, generation).await {
                return;
            }
            no_progress_streak = 0;
            continue;
        }
        tokio::time::sleep(config.poll_interval).await;
    }
}

/// Bounded stall recovery: re-poll the same offset on a fixed delay. Returns
/// `true` when new data arrived and the main loop should resume, `false`
/// when the search settled (one way or another).
async fn recover_from_stall(
    shared: &SearchShared,
    client: &dyn SearchJobClient,
    config: &PollingConfig,
    job: SearchJobId,
    generation: u64,
) -> bool {
    shared.mark_stalled(generation);

    for attempt in 1..=config.max_stall_retries {
        tokio::time::sleep(config.stall_retry_delay).await;
        if shared.is_stale(generation) {
            return false;
        }
        let offset = shared.next_offset();
        debug!(attempt, offset, "stall retry");
        match with_timeout(config.request_timeout, client.poll(&job, offset)).await {
            Ok(page) => {
                let status = page.status;
                let Some(outcome) = shared.merge_page(generation, &job, page) else {
                    return false;
                };
                if status == JobStatus::Complete {
                    shared.settle_complete(generation);
                    return false;
                }
                if outcome.added > 0 {
                    shared.note_loaded(generation);
                    return true;
                }
            }
            Err(err) if err.is_retryable() => {
                warn!(attempt, %err, "stall retry failed");
            }
            Err(err) => {
                shared.fail(generation, ErrorReason::Network(err.to_string()));
                return false;
            }
        }
    }

    // Retries exhausted without progress.
    let (is_empty, is_complete) = {
        let state = shared.lock();
        if state.generation != generation {
            return false;
        }
        (state.cache.is_empty(), state.cache.is_backend_complete())
    };
    if is_empty && is_complete {
        shared.settle_complete(generation);
    } else if is_empty {
        shared.fail(generation, ErrorReason::NoResults);
    } else {
        // Keep what arrived; load-more can extend it later.
        shared.note_loaded(generation);
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{page, sample_offer, unique_offer, MockSearchClient};
    use chrono::NaiveDate;
    use farescout_core::Place;

    fn criteria() -> SearchCriteria {
        let date = NaiveDate::from_ymd_opt(2030, 9, 10).unwrap();
        SearchCriteria::one_way("COK", Place::airport("DXB"), date)
    }

    fn offers(ids: &[&str]) -> Vec<farescout_core::FlightOffer> {
        ids.iter().map(|id| sample_offer(id)).collect()
    }

    async fn wait_for_state<F>(rx: &mut broadcast::Receiver<SearchEvent>, pred: F) -> PollCycleState
    where
        F: Fn(&PollCycleState) -> bool,
    {
        let wait = async {
            loop {
                match rx.recv().await {
                    Ok(SearchEvent::StateChanged(state)) if pred(&state) => return state,
                    Ok(_) => {}
                    Err(err) => panic!("event channel closed: {err}"),
                }
            }
        };
        tokio::time::timeout(Duration::from_secs(600), wait)
            .await
            .expect("expected state never reached")
    }

    fn is_terminal(state: &PollCycleState) -> bool {
        matches!(
            state,
            PollCycleState::Loaded | PollCycleState::Empty | PollCycleState::Error(_)
        )
    }

    async fn wait_for_complete_cache(rx: &mut broadcast::Receiver<SearchEvent>) {
        let wait = async {
            loop {
                match rx.recv().await {
                    Ok(SearchEvent::CacheUpdated(s)) if s.is_backend_complete => return,
                    Ok(_) => {}
                    Err(err) => panic!("event channel closed: {err}"),
                }
            }
        };
        tokio::time::timeout(Duration::from_secs(600), wait)
            .await
            .expect("backend never completed")
    }

    #[tokio::test(start_paused = true)]
    async fn test_two_page_search_reaches_loaded_with_unique_offers() {
        let client = Arc::new(MockSearchClient::new());
        let first_ids: Vec<String> = (0..10).map(|i| format!("of-{i}")).collect();
        let first: Vec<&str> = first_ids.iter().map(String::as_str).collect();
        let mut second = first.clone();
        second.extend(["of-10", "of-11", "of-12", "of-13", "of-14"]);

        client.queue_poll(page(offers(&first), 15, JobStatus::Partial));
        client.queue_poll(page(offers(&second), 15, JobStatus::Complete));

        let orchestrator = PollingOrchestrator::new(client.clone());
        let mut rx = orchestrator.subscribe();
        orchestrator
            .start_search(&criteria(), &FilterSpec::default())
            .expect("criteria valid");

        // `Loaded` is emitted after the first page while polling continues;
        // wait for the backend-complete snapshot instead.
        wait_for_complete_cache(&mut rx).await;
        assert_eq!(orchestrator.state(), PollCycleState::Loaded);

        let snapshot = orchestrator.snapshot();
        assert_eq!(snapshot.loaded_count(), 15);
        assert_eq!(snapshot.total_count_hint, 15);
        assert!(snapshot.is_backend_complete);
        // Second page was requested past the ten already loaded.
        assert_eq!(client.polled_offsets(), vec![0, 10]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_complete_empty_job_reaches_empty_not_error() {
        let client = Arc::new(MockSearchClient::new());
        client.queue_poll(page(vec![], 0, JobStatus::Complete));

        let orchestrator = PollingOrchestrator::new(client.clone());
        let mut rx = orchestrator.subscribe();
        orchestrator
            .start_search(&criteria(), &FilterSpec::default())
            .expect("criteria valid");

        let state = wait_for_state(&mut rx, is_terminal).await;
        assert_eq!(state, PollCycleState::Empty);
        assert_eq!(client.poll_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_polling_errors_after_exactly_five_retries() {
        // The mock's fallback is an endless Pending/empty backend.
        let client = Arc::new(MockSearchClient::new());
        let orchestrator = PollingOrchestrator::new(client.clone());
        let mut rx = orchestrator.subscribe();
        orchestrator
            .start_search(&criteria(), &FilterSpec::default())
            .expect("criteria valid");

        let state = wait_for_state(&mut rx, is_terminal).await;
        assert_eq!(state, PollCycleState::Error(ErrorReason::NoResults));

        // 3 polls to trip the stall detector + exactly 5 recovery retries.
        assert_eq!(client.poll_calls(), 8);

        // And not a single poll more once settled.
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(client.poll_calls(), 8);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stall_recovery_resumes_polling_on_new_data() {
        let client = Arc::new(MockSearchClient::new());
        // Three empty polls trip the stall detector...
        client.queue_poll(page(vec![], 0, JobStatus::Pending));
        client.queue_poll(page(vec![], 0, JobStatus::Pending));
        client.queue_poll(page(vec![], 0, JobStatus::Pending));
        // ...the first recovery retry finds data, the loop resumes...
        client.queue_poll(page(offers(&["a", "b"]), 4, JobStatus::Partial));
        // ...and the next regular poll completes the job.
        client.queue_poll(page(offers(&["c", "d"]), 4, JobStatus::Complete));

        let orchestrator = PollingOrchestrator::new(client.clone());
        let mut rx = orchestrator.subscribe();
        orchestrator
            .start_search(&criteria(), &FilterSpec::default())
            .expect("criteria valid");

        let mut saw_stalled = false;
        let wait = async {
            loop {
                match rx.recv().await {
                    Ok(SearchEvent::StateChanged(PollCycleState::Stalled)) => saw_stalled = true,
                    Ok(SearchEvent::CacheUpdated(s)) if s.is_backend_complete => return,
                    Ok(_) => {}
                    Err(err) => panic!("event channel closed: {err}"),
                }
            }
        };
        tokio::time::timeout(Duration::from_secs(600), wait)
            .await
            .expect("search never settled");

        assert!(saw_stalled);
        assert_eq!(orchestrator.state(), PollCycleState::Loaded);
        assert_eq!(orchestrator.snapshot().loaded_count(), 4);
        assert_eq!(client.poll_calls(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_submit_retries_transient_failures() {
        let client = Arc::new(MockSearchClient::new());
        client.queue_submit_err(ClientError::Transport("connection reset".to_string()));
        client.queue_submit_err(ClientError::RateLimited);
        client.queue_poll(page(vec![unique_offer()], 1, JobStatus::Complete));

        let orchestrator = PollingOrchestrator::new(client.clone());
        let mut rx = orchestrator.subscribe();
        orchestrator
            .start_search(&criteria(), &FilterSpec::default())
            .expect("criteria valid");

        let state = wait_for_state(&mut rx, is_terminal).await;
        assert_eq!(state, PollCycleState::Loaded);
        assert_eq!(client.submit_calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_submit_exhaustion_surfaces_network_error() {
        let client = Arc::new(MockSearchClient::new());
        for _ in 0..3 {
            client.queue_submit_err(ClientError::Transport("connection reset".to_string()));
        }

        let orchestrator = PollingOrchestrator::new(client.clone());
        let mut rx = orchestrator.subscribe();
        orchestrator
            .start_search(&criteria(), &FilterSpec::default())
            .expect("criteria valid");

        let state = wait_for_state(&mut rx, is_terminal).await;
        assert!(matches!(state, PollCycleState::Error(ErrorReason::Network(_))));
        assert_eq!(client.submit_calls(), 3);
        assert_eq!(client.poll_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_submit_fails_without_retry() {
        let client = Arc::new(MockSearchClient::new());
        client.queue_submit_err(ClientError::Fatal("malformed request".to_string()));

        let orchestrator = PollingOrchestrator::new(client.clone());
        let mut rx = orchestrator.subscribe();
        orchestrator
            .start_search(&criteria(), &FilterSpec::default())
            .expect("criteria valid");

        let state = wait_for_state(&mut rx, is_terminal).await;
        assert!(matches!(state, PollCycleState::Error(ErrorReason::Network(_))));
        assert_eq!(client.submit_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_search_supersedes_previous_job() {
        let client = Arc::new(MockSearchClient::new());
        let orchestrator = PollingOrchestrator::new(client.clone());
        let mut rx = orchestrator.subscribe();

        // First search polls an endless Pending backend.
        orchestrator
            .start_search(&criteria(), &FilterSpec::default())
            .expect("criteria valid");
        wait_for_state(&mut rx, |s| *s == PollCycleState::Polling).await;

        // Supersede it; only the new job's page may land in the cache.
        client.queue_poll(page(offers(&["new-1", "new-2"]), 2, JobStatus::Complete));
        orchestrator
            .start_search(&criteria(), &FilterSpec::direct_only())
            .expect("criteria valid");

        let state = wait_for_state(&mut rx, is_terminal).await;
        assert_eq!(state, PollCycleState::Loaded);

        let snapshot = orchestrator.snapshot();
        let ids: Vec<&str> = snapshot.offers.iter().map(|o| o.id.as_str()).collect();
        assert_eq!(ids, vec!["new-1", "new-2"]);
        assert_eq!(client.submit_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_error_repolls_existing_job() {
        let client = Arc::new(MockSearchClient::new());
        let orchestrator = PollingOrchestrator::new(client.clone());
        let mut rx = orchestrator.subscribe();
        orchestrator
            .start_search(&criteria(), &FilterSpec::default())
            .expect("criteria valid");

        let state = wait_for_state(&mut rx, is_terminal).await;
        assert_eq!(state, PollCycleState::Error(ErrorReason::NoResults));

        // The backend recovers; retry must re-poll, not re-submit.
        client.queue_poll(page(offers(&["a", "b", "c"]), 3, JobStatus::Complete));
        orchestrator.retry();

        let state = wait_for_state(&mut rx, is_terminal).await;
        assert_eq!(state, PollCycleState::Loaded);
        assert_eq!(orchestrator.snapshot().loaded_count(), 3);
        assert_eq!(client.submit_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_criteria_is_synchronous_and_leaves_idle() {
        let client = Arc::new(MockSearchClient::new());
        let orchestrator = PollingOrchestrator::new(client.clone());

        let date = NaiveDate::from_ymd_opt(2030, 9, 10).unwrap();
        let bad = SearchCriteria::one_way("COK", Place::airport("COK"), date);
        let err = orchestrator
            .start_search(&bad, &FilterSpec::default())
            .unwrap_err();
        assert_eq!(err, CriteriaError::SameOriginDestination("COK".to_string()));
        assert_eq!(orchestrator.state(), PollCycleState::Idle);
        assert_eq!(client.submit_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_commit_filter_starts_new_job_with_filter_embedded() {
        let client = Arc::new(MockSearchClient::new());
        client.queue_poll(page(offers(&["a"]), 1, JobStatus::Complete));
        client.queue_poll(page(offers(&["b"]), 1, JobStatus::Complete));

        let orchestrator = PollingOrchestrator::new(client.clone());
        let mut rx = orchestrator.subscribe();
        orchestrator
            .start_search(&criteria(), &FilterSpec::default())
            .expect("criteria valid");
        wait_for_state(&mut rx, is_terminal).await;

        orchestrator
            .commit_filter(&FilterSpec::direct_only())
            .expect("criteria valid");
        let state = wait_for_state(&mut rx, is_terminal).await;
        assert_eq!(state, PollCycleState::Loaded);

        // New job, old results gone, committed filter on the wire.
        let snapshot = orchestrator.snapshot();
        let ids: Vec<&str> = snapshot.offers.iter().map(|o| o.id.as_str()).collect();
        assert_eq!(ids, vec!["b"]);
        let requests = client.submitted_requests();
        assert_eq!(requests.len(), 2);
        assert!(requests[0].filter.is_unfiltered());
        assert_eq!(requests[1].filter, FilterSpec::direct_only());
    }

    #[tokio::test(start_paused = true)]
    async fn test_events_arrive_in_mutation_order() {
        let client = Arc::new(MockSearchClient::new());
        client.queue_poll(page(offers(&["a"]), 1, JobStatus::Complete));

        let orchestrator = PollingOrchestrator::new(client.clone());
        let mut rx = orchestrator.subscribe();
        orchestrator
            .start_search(&criteria(), &FilterSpec::default())
            .expect("criteria valid");

        let mut events = Vec::new();
        let collect = async {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        let done = matches!(
                            event,
                            SearchEvent::StateChanged(ref s) if is_terminal(s)
                        );
                        events.push(event);
                        if done {
                            break;
                        }
                    }
                    Err(err) => panic!("event channel closed: {err}"),
                }
            }
        };
        tokio::time::timeout(Duration::from_secs(600), collect)
            .await
            .expect("search never settled");

        let submitting = events
            .iter()
            .position(|e| matches!(e, SearchEvent::StateChanged(PollCycleState::Submitting)))
            .expect("no Submitting event");
        let polling = events
            .iter()
            .position(|e| matches!(e, SearchEvent::StateChanged(PollCycleState::Polling)))
            .expect("no Polling event");
        let first_results = events
            .iter()
            .position(|e| matches!(e, SearchEvent::CacheUpdated(s) if s.loaded_count() > 0))
            .expect("no populated CacheUpdated event");

        assert!(submitting < polling);
        assert!(polling < first_results);
    }
}
