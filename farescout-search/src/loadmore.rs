use std::sync::Arc;

use tracing::{debug, info, warn};

use farescout_core::{JobStatus, SearchJobClient, SearchJobId};

use crate::orchestrator::{with_timeout, ErrorReason, PollingConfig, SearchShared};

/// Drives pagination as the UI scrolls.
///
/// A load is issued only when the backend may still have data for us and no
/// load is already in flight. A `Complete` report that contradicts the count
/// hint surfaces as `Error(Inconsistent)` instead of silently truncating the
/// list.
pub struct LoadMoreController {
    shared: Arc<SearchShared>,
    client: Arc<dyn SearchJobClient>,
    config: PollingConfig,
}

impl LoadMoreController {
    pub(crate) fn new(
        shared: Arc<SearchShared>,
        client: Arc<dyn SearchJobClient>,
        config: PollingConfig,
    ) -> Self {
        Self {
            shared,
            client,
            config,
        }
    }

    /// True iff another page is worth requesting right now.
    pub fn should_load_more(&self) -> bool {
        if self.shared.load_in_flight() || self.shared.current_job().is_none() {
            return false;
        }
        let snapshot = self.shared.snapshot();
        !snapshot.is_backend_complete || snapshot.loaded_count() < snapshot.total_count_hint
    }

    /// Request the next page and feed it through the orchestrator's merge
    /// path. Retries once after a fixed delay when the backend is still
    /// producing but the page added nothing.
    pub async fn load_more(&self) {
        let Some((generation, job, offset)) = self.shared.claim_load() else {
            debug!("load-more skipped, nothing to load");
            return;
        };

        let progressed = self.fetch_page(generation, &job, offset).await;
        if !progressed && !self.shared.is_stale(generation) {
            let still_producing = !self.shared.snapshot().is_backend_complete;
            if still_producing {
                info!("load-more added nothing while backend still producing, retrying once");
                tokio::time::sleep(self.config.load_more_retry_delay).await;
                if !self.shared.is_stale(generation) {
                    self.fetch_page(generation, &job, self.shared.next_offset())
                        .await;
                }
            }
        }
        self.shared.finish_load(generation);
    }

    /// One page fetch. Returns true when the page added offers.
    async fn fetch_page(&self, generation: u64, job: &SearchJobId, offset: usize) -> bool {
        match with_timeout(self.config.request_timeout, self.client.poll(job, offset)).await {
            Ok(page) => {
                let status = page.status;
                let Some(outcome) = self.shared.merge_page(generation, job, page) else {
                    return false;
                };
                if outcome.added > 0 {
                    self.shared.note_loaded(generation);
                }
                if status == JobStatus::Complete {
                    let snapshot = self.shared.snapshot();
                    if snapshot.loaded_count() < snapshot.total_count_hint {
                        // Backend claims it is done but delivered fewer
                        // offers than it promised.
                        warn!(
                            loaded = snapshot.loaded_count(),
                            hint = snapshot.total_count_hint,
                            "backend completed below its own count hint"
                        );
                        self.shared.fail(generation, ErrorReason::Inconsistent);
                    } else {
                        self.shared.settle_complete(generation);
                    }
                }
                outcome.added > 0
            }
            Err(err) if err.is_retryable() => {
                warn!(%err, "load-more page fetch failed");
                false
            }
            Err(err) => {
                self.shared
                    .fail(generation, ErrorReason::Network(err.to_string()));
                false
            }
        }
    }
}
