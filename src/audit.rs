//! audit.rs: Compliance trail for proposal generation.
//!
//! The engine only builds `ProposalAuditEntry` values; writing them is the
//! job of an `AuditSink` owned by the caller.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposalAuditEntry {
    pub action: String,
    pub category: String,
    pub item_key: String,
    pub evidence_count: usize,
    pub source_diversity: usize,
    pub weighted_mean: f64,
    pub confidence_score: u8,
    pub generated_at: DateTime<Utc>,
    pub evidence_ids: Vec<String>,
    pub evidence_fingerprint: String,
}

impl ProposalAuditEntry {
    pub const ACTION: &'static str = "benchmark.proposal.generated";
}

/// Destination for audit entries.
pub trait AuditSink: Send + Sync {
    fn record(&self, entry: &ProposalAuditEntry);
}

impl<T: AuditSink + ?Sized> AuditSink for Arc<T> {
    fn record(&self, entry: &ProposalAuditEntry) {
        (**self).record(entry)
    }
}

/// Emits every entry as a structured `tracing` event on target `audit`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, entry: &ProposalAuditEntry) {
        tracing::info!(
            target: "audit",
            action = %entry.action,
            category = %entry.category,
            item = %entry.item_key,
            evidence_count = entry.evidence_count,
            source_diversity = entry.source_diversity,
            weighted_mean = entry.weighted_mean,
            confidence_score = entry.confidence_score,
            fingerprint = %entry.evidence_fingerprint,
            generated_at = %entry.generated_at.to_rfc3339(),
        );
    }
}

/// Keeps entries in memory; used by tests and the debug endpoints.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    inner: Mutex<Vec<ProposalAuditEntry>>,
}

impl MemoryAuditSink {
    pub fn entries(&self) -> Vec<ProposalAuditEntry> {
        self.inner.lock().expect("audit mutex poisoned").clone()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, entry: &ProposalAuditEntry) {
        self.inner
            .lock()
            .expect("audit mutex poisoned")
            .push(entry.clone());
    }
}

/// Fan-out to several sinks.
#[derive(Default)]
pub struct AuditMux {
    sinks: Vec<Box<dyn AuditSink>>,
}

impl AuditMux {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: impl AuditSink + 'static) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }
}

impl AuditSink for AuditMux {
    fn record(&self, entry: &ProposalAuditEntry) {
        for s in &self.sinks {
            s.record(entry);
        }
    }
}
