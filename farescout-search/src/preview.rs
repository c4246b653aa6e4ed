use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;
use tracing::{debug, warn};

use farescout_core::{FilterSpec, SearchJobClient};

use crate::orchestrator::{with_timeout, PollingConfig, SearchShared};

/// Live "matching results" counts for a candidate filter the user is still
/// editing.
///
/// Edits are debounced; only after the quiet period does the backend see a
/// `preview_count` call. A newer candidate aborts the in-flight task — not
/// just discards its result — so superseded requests stop costing backend
/// work. The committed result set is never touched; committing goes through
/// [`PollingOrchestrator::commit_filter`].
///
/// [`PollingOrchestrator::commit_filter`]: crate::orchestrator::PollingOrchestrator::commit_filter
pub struct FilterPreviewEngine {
    shared: Arc<SearchShared>,
    client: Arc<dyn SearchJobClient>,
    config: PollingConfig,
    sequence: Arc<AtomicU64>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl FilterPreviewEngine {
    pub(crate) fn new(
        shared: Arc<SearchShared>,
        client: Arc<dyn SearchJobClient>,
        config: PollingConfig,
    ) -> Self {
        Self {
            shared,
            client,
            config,
            sequence: Arc::new(AtomicU64::new(0)),
            task: Mutex::new(None),
        }
    }

    /// Ask for the count a candidate filter would match. The answer arrives
    /// as a `PreviewCountUpdated` event; only the newest candidate's answer
    /// is ever published.
    pub fn request_preview(&self, candidate: FilterSpec) {
        let ticket = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;

        let mut slot = self.task.lock().expect("preview task lock poisoned");
        if let Some(previous) = slot.take() {
            debug!("cancelling superseded preview request");
            previous.abort();
        }

        let shared = self.shared.clone();
        let client = self.client.clone();
        let sequence = self.sequence.clone();
        let debounce = self.config.preview_debounce;
        let timeout = self.config.request_timeout;
        *slot = Some(tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            if sequence.load(Ordering::SeqCst) != ticket {
                return;
            }
            let Some(job) = shared.current_job() else {
                debug!("preview requested with no active job");
                return;
            };
            match with_timeout(timeout, client.preview_count(&job, &candidate)).await {
                Ok(count) => {
                    // Re-check at publish time: the candidate may have been
                    // superseded while the call was in flight.
                    if sequence.load(Ordering::SeqCst) == ticket {
                        debug!(count, "preview count ready");
                        shared.publish_preview(count);
                    }
                }
                Err(err) => warn!(%err, "preview count failed"),
            }
        }));
    }
}
