use std::collections::{BTreeSet, HashSet};
use std::sync::Mutex;

use crate::domain::DedupKey;

/// Failing line numbers recorded during one orchestrator invocation.
///
/// Insertion is a set union, so concurrent recorders never conflict.
#[derive(Debug, Default)]
pub struct ErrorState {
    lines: Mutex<BTreeSet<u64>>,
}

impl ErrorState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, line_number: u64) {
        self.lock().insert(line_number);
    }

    pub fn is_failed(&self) -> bool {
        !self.lock().is_empty()
    }

    /// The resume point: the smallest failing line.
    pub fn earliest(&self) -> Option<u64> {
        self.lock().first().copied()
    }

    pub fn lines(&self) -> Vec<u64> {
        self.lock().iter().copied().collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeSet<u64>> {
        // A panicking recorder cannot leave the set half-updated.
        self.lines.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Keys already materialized, seeded from the store scan and grown as assets
/// are written so later tags in the same attempt see them.
#[derive(Debug, Default)]
pub struct DedupIndex {
    keys: Mutex<HashSet<DedupKey>>,
}

impl DedupIndex {
    pub fn new(seed: HashSet<DedupKey>) -> Self {
        Self {
            keys: Mutex::new(seed),
        }
    }

    pub fn contains(&self, key: &DedupKey) -> bool {
        self.lock().contains(key)
    }

    /// Claims `key`. Returns `false` when it was already stored or claimed.
    pub fn insert(&self, key: DedupKey) -> bool {
        self.lock().insert(key)
    }

    /// Gives back a claim whose item was not stored.
    pub fn remove(&self, key: &DedupKey) -> bool {
        self.lock().remove(key)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashSet<DedupKey>> {
        self.keys.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
