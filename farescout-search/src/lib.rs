pub mod cache;
pub mod calendar;
pub mod events;
pub mod loadmore;
pub mod mock;
pub mod orchestrator;
pub mod preview;
pub mod recent;

pub use cache::{CacheSnapshot, MergeOutcome, ResultCache};
pub use calendar::CalendarPriceCache;
pub use events::SearchEvent;
pub use loadmore::LoadMoreController;
pub use mock::MockSearchClient;
pub use orchestrator::{ErrorReason, PollCycleState, PollingConfig, PollingOrchestrator};
pub use preview::FilterPreviewEngine;
pub use recent::RecentSearches;
