use crate::cache::CacheSnapshot;
use crate::orchestrator::PollCycleState;

/// Capacity of the broadcast channel behind [`PollingOrchestrator`].
///
/// [`PollingOrchestrator`]: crate::orchestrator::PollingOrchestrator
pub const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Everything the UI layer observes from the search core.
///
/// Events are published synchronously, in order, after each atomic mutation;
/// a `CacheUpdated` snapshot is always consistent (no partially merged
/// pages).
#[derive(Debug, Clone)]
pub enum SearchEvent {
    StateChanged(PollCycleState),
    CacheUpdated(CacheSnapshot),
    PreviewCountUpdated(usize),
}
