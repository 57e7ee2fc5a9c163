use std::collections::VecDeque;

use hashbrown::HashMap;

use crate::{book::Entrant, types::BookKey};

use super::StoreError;

/// Request counters and waitlists, keyed independently of the catalog.
#[derive(Debug, Default, Clone)]
pub struct StatisticsTracker {
    request_count: HashMap<BookKey, u64>,
    waitlists: HashMap<BookKey, VecDeque<Entrant>>,
}

impl StatisticsTracker {
    /// Tracker with no counters or waitlists.
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts one borrow attempt, successful or not.
    pub fn increment_requests(&mut self, key: &BookKey) -> u64 {
        let count = self.request_count.entry(key.clone()).or_insert(0);
        *count += 1;
        *count
    }

    /// Borrow attempts so far; zero for unknown keys.
    pub fn get_request_count(&self, key: &BookKey) -> u64 {
        self.request_count.get(key).copied().unwrap_or(0)
    }

    /// Appends `entrant` unless already queued. Returns the 1-based position.
    pub fn enqueue_waitlist(&mut self, key: &BookKey, entrant: Entrant) -> usize {
        let queue = self.waitlists.entry(key.clone()).or_default();
        if let Some(idx) = queue.iter().position(|e| *e == entrant) {
            return idx + 1;
        }
        queue.push_back(entrant);
        queue.len()
    }

    /// Pops the oldest entrant.
    pub fn dequeue_waitlist(&mut self, key: &BookKey) -> Result<Entrant, StoreError> {
        let entrant = self
            .waitlists
            .get_mut(key)
            .and_then(VecDeque::pop_front)
            .ok_or_else(|| StoreError::EmptyWaitlist(key.clone()))?;
        if self.waitlists.get(key).is_some_and(VecDeque::is_empty) {
            self.waitlists.remove(key);
        }
        Ok(entrant)
    }

    /// Oldest first.
    pub fn waitlist(&self, key: &BookKey) -> Vec<Entrant> {
        self.waitlists
            .get(key)
            .map(|q| q.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of waiting entrants.
    pub fn waitlist_len(&self, key: &BookKey) -> usize {
        self.waitlists.get(key).map_or(0, VecDeque::len)
    }

    /// Overwrites the counter. Zero clears it.
    pub fn set_request_count(&mut self, key: &BookKey, count: u64) {
        if count == 0 {
            self.request_count.remove(key);
        } else {
            self.request_count.insert(key.clone(), count);
        }
    }

    /// Replaces the waitlist wholesale, dropping duplicate entrants.
    pub fn restore_waitlist(&mut self, key: &BookKey, entrants: impl IntoIterator<Item = Entrant>) {
        self.waitlists.remove(key);
        for entrant in entrants {
            self.enqueue_waitlist(key, entrant);
        }
    }

    /// Drops all statistics for `key`. Returns the discarded waitlist.
    pub fn forget(&mut self, key: &BookKey) -> Vec<Entrant> {
        self.request_count.remove(key);
        self.waitlists
            .remove(key)
            .map(Vec::from)
            .unwrap_or_default()
    }
}
