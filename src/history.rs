//! history.rs: in-process append-only log of generated proposals and
//! detected anomalies. Stands in for the storage layer in the HTTP adapter;
//! rows are only ever pushed, never edited, and the oldest fall off past the
//! capacity.

use std::sync::Mutex;

use crate::anomaly::PriceAnomalyEvent;
use crate::proposal::BenchmarkProposal;

/// Rows kept per log unless a smaller capacity is asked for.
pub const DEFAULT_CAPACITY: usize = 10_000;

#[derive(Debug)]
pub struct AppendLog<T> {
    inner: Mutex<Vec<T>>,
    cap: usize,
}

impl<T> Default for AppendLog<T> {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl<T> AppendLog<T> {
    /// Keeps at most `cap` rows (never more than `DEFAULT_CAPACITY`, at least 1);
    /// the oldest are dropped first.
    pub fn with_capacity(cap: usize) -> Self {
        let cap = cap.clamp(1, DEFAULT_CAPACITY);
        Self {
            inner: Mutex::new(Vec::new()),
            cap,
        }
    }

    pub fn capacity(&self) -> usize {
        self.cap
    }
}

impl<T: Clone> AppendLog<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, row: T) {
        let mut v = self.inner.lock().expect("history mutex poisoned");
        v.push(row);
        if v.len() > self.cap {
            let excess = v.len() - self.cap;
            v.drain(0..excess);
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("history mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot_last_n(&self, n: usize) -> Vec<T> {
        let v = self.inner.lock().expect("history mutex poisoned");
        let start = v.len().saturating_sub(n);
        v[start..].to_vec()
    }

    /// Rows matching `pred`, oldest first.
    pub fn filtered(&self, pred: impl Fn(&T) -> bool) -> Vec<T> {
        let v = self.inner.lock().expect("history mutex poisoned");
        v.iter().filter(|r| pred(r)).cloned().collect()
    }
}

pub type ProposalHistory = AppendLog<BenchmarkProposal>;
pub type AnomalyLog = AppendLog<PriceAnomalyEvent>;

impl ProposalHistory {
    /// Every generation for one `(category, item)`, oldest first.
    pub fn history_for(&self, category: &str, item_key: &str) -> Vec<BenchmarkProposal> {
        self.filtered(|p| p.category == category && p.item_key == item_key)
    }

    pub fn latest_for(&self, category: &str, item_key: &str) -> Option<BenchmarkProposal> {
        self.history_for(category, item_key).pop()
    }
}
