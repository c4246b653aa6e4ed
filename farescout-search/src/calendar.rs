use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use farescout_core::{ClientError, DayPrice, MonthKey, PriceCalendarClient};

#[derive(Default)]
struct CalendarState {
    months: HashMap<MonthKey, Vec<DayPrice>>,
    in_flight: HashSet<MonthKey>,
}

/// Per-day price overlays for the date-picker calendar, cached per month.
///
/// The cache key carries route, month and currency, so entries fetched under
/// one currency can never be served under another. Best effort: nothing
/// survives the process.
pub struct CalendarPriceCache {
    client: Arc<dyn PriceCalendarClient>,
    state: Mutex<CalendarState>,
}

impl CalendarPriceCache {
    pub fn new(client: Arc<dyn PriceCalendarClient>) -> Self {
        Self {
            client,
            state: Mutex::new(CalendarState::default()),
        }
    }

    pub fn cached(&self, key: &MonthKey) -> Option<Vec<DayPrice>> {
        self.lock().months.get(key).cloned()
    }

    /// Return the month's prices, fetching them on a miss.
    ///
    /// Returns `Ok(None)` when another fetch for the same key is already in
    /// flight; the caller will find the cache populated once it lands.
    pub async fn get_or_fetch(&self, key: &MonthKey) -> Result<Option<Vec<DayPrice>>, ClientError> {
        {
            let mut state = self.lock();
            if let Some(days) = state.months.get(key) {
                return Ok(Some(days.clone()));
            }
            if state.in_flight.contains(key) {
                debug!(origin = %key.origin, month = key.month, "month fetch already in flight");
                return Ok(None);
            }
            state.in_flight.insert(key.clone());
        }

        let result = self.client.month_prices(key).await;

        let mut state = self.lock();
        state.in_flight.remove(key);
        match result {
            Ok(days) => {
                state.months.insert(key.clone(), days.clone());
                Ok(Some(days))
            }
            Err(err) => {
                warn!(%err, origin = %key.origin, month = key.month, "month price fetch failed");
                Err(err)
            }
        }
    }

    pub fn invalidate(&self, key: &MonthKey) {
        self.lock().months.remove(key);
    }

    pub fn clear(&self) {
        let mut state = self.lock();
        state.months.clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CalendarState> {
        self.state.lock().expect("calendar state lock poisoned")
    }
}
