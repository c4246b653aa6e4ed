use farescout_core::SearchCriteria;

/// Bounded, most-recent-first store of searches the user has run.
///
/// In-memory and best effort; survives the process lifetime only.
pub struct RecentSearches {
    entries: Vec<SearchCriteria>,
    capacity: usize,
}

impl RecentSearches {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Vec::new(),
            capacity,
        }
    }

    /// Record a search. Re-running an existing one moves it to the front
    /// instead of duplicating it.
    pub fn push(&mut self, criteria: SearchCriteria) {
        self.entries.retain(|existing| existing != &criteria);
        self.entries.insert(0, criteria);
        self.entries.truncate(self.capacity);
    }

    /// The most recent search, used to restore the last session.
    pub fn last(&self) -> Option<&SearchCriteria> {
        self.entries.first()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SearchCriteria> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for RecentSearches {
    fn default() -> Self {
        Self::new(10)
    }
}
