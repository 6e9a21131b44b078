// src/evidence.rs
//! Evidence records and the ingestion boundary that turns loosely-typed
//! submissions into validated records.
//!
//! The statistics functions downstream trust what comes out of here; they
//! only re-check the cheap invariants (positive typical price, one group).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::ValidationMode;
use crate::errors::{EngineError, EngineResult};
use crate::reliability::{Grade, PublisherGrades};

/// Access classification of a record. Ordered from least to most restricted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidentiality {
    #[default]
    Public,
    Internal,
    Confidential,
    Restricted,
}

/// One observed data point. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceRecord {
    pub id: String,
    pub category: String,
    pub item_key: String,
    pub price_typical: f64,
    #[serde(default)]
    pub price_min: Option<f64>,
    #[serde(default)]
    pub price_max: Option<f64>,
    pub reliability_grade: Grade,
    pub source_publisher: String,
    #[serde(default)]
    pub source_url: Option<String>,
    pub captured_at: DateTime<Utc>,
    #[serde(default)]
    pub confidentiality: Confidentiality,
}

impl EvidenceRecord {
    /// `category/item_key`, the aggregation identity.
    pub fn group_key(&self) -> String {
        format!("{}/{}", self.category, self.item_key)
    }

    pub fn same_group(&self, other: &EvidenceRecord) -> bool {
        self.category == other.category && self.item_key == other.item_key
    }

    /// Check the record invariants. Returns the first violation found.
    pub fn validate(&self) -> EngineResult<()> {
        let fail = |reason: String| {
            Err::<(), _>(EngineError::MalformedRecord {
                id: self.id.clone(),
                reason,
            })
        };

        if self.category.trim().is_empty() {
            return fail("category is empty".into());
        }
        if self.item_key.trim().is_empty() {
            return fail("item_key is empty".into());
        }
        if !is_positive_price(self.price_typical) {
            return fail(format!(
                "price_typical must be finite and > 0 (got {})",
                self.price_typical
            ));
        }
        for (name, v) in [("price_min", self.price_min), ("price_max", self.price_max)] {
            if let Some(p) = v {
                if !is_positive_price(p) {
                    return fail(format!("{name} must be finite and > 0 (got {p})"));
                }
            }
        }
        if let (Some(lo), Some(hi)) = (self.price_min, self.price_max) {
            if lo > hi {
                return fail(format!("price_min {lo} exceeds price_max {hi}"));
            }
        }
        Ok(())
    }
}

pub(crate) fn is_positive_price(p: f64) -> bool {
    p.is_finite() && p > 0.0
}

/// A submission as it arrives from a scraper or form: grade may be absent
/// (filled from the publisher registry) and the typical price may be missing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawEvidence {
    pub id: String,
    pub category: String,
    pub item_key: String,
    #[serde(default)]
    pub price_typical: Option<f64>,
    #[serde(default)]
    pub price_min: Option<f64>,
    #[serde(default)]
    pub price_max: Option<f64>,
    #[serde(default)]
    pub reliability_grade: Option<String>,
    pub source_publisher: String,
    #[serde(default)]
    pub source_url: Option<String>,
    pub captured_at: DateTime<Utc>,
    #[serde(default)]
    pub confidentiality: Confidentiality,
}

impl RawEvidence {
    /// Resolve into a validated record.
    ///
    /// An explicit grade that does not parse is `InvalidGrade` and is never
    /// skipped: it points at a broken producer, not at bad data.
    pub fn resolve(self, publishers: &PublisherGrades) -> EngineResult<EvidenceRecord> {
        let reliability_grade = match self.reliability_grade.as_deref() {
            Some(g) => g.parse::<Grade>()?,
            None => publishers.grade_for(&self.source_publisher),
        };
        let price_typical = self.price_typical.ok_or_else(|| EngineError::MalformedRecord {
            id: self.id.clone(),
            reason: "price_typical is missing".into(),
        })?;

        let rec = EvidenceRecord {
            id: self.id,
            category: self.category.trim().to_string(),
            item_key: self.item_key.trim().to_string(),
            price_typical,
            price_min: self.price_min,
            price_max: self.price_max,
            reliability_grade,
            source_publisher: self.source_publisher.trim().to_string(),
            source_url: self.source_url,
            captured_at: self.captured_at,
            confidentiality: self.confidentiality,
        };
        rec.validate()?;
        Ok(rec)
    }
}

/// A record dropped at the boundary, with the reason to show the submitter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectedRecord {
    pub id: String,
    pub reason: String,
}

/// Outcome of one ingestion pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestOutcome {
    pub accepted: Vec<EvidenceRecord>,
    pub rejected: Vec<RejectedRecord>,
}

/// Resolve and validate a batch.
///
/// `Reject` fails on the first malformed record; `Skip` drops malformed
/// records and reports them. Invalid grades fail the batch in both modes.
pub fn ingest(
    raw: Vec<RawEvidence>,
    publishers: &PublisherGrades,
    mode: ValidationMode,
) -> EngineResult<IngestOutcome> {
    let mut out = IngestOutcome {
        accepted: Vec::with_capacity(raw.len()),
        rejected: Vec::new(),
    };

    for r in raw {
        match r.resolve(publishers) {
            Ok(rec) => out.accepted.push(rec),
            Err(EngineError::MalformedRecord { id, reason }) if mode == ValidationMode::Skip => {
                tracing::warn!(%id, %reason, "skipping malformed evidence record");
                out.rejected.push(RejectedRecord { id, reason });
            }
            Err(e) => return Err(e),
        }
    }

    Ok(out)
}

/// Validate already-typed records with the same policy as `ingest`.
pub fn validate_batch(
    records: Vec<EvidenceRecord>,
    mode: ValidationMode,
) -> EngineResult<IngestOutcome> {
    let mut out = IngestOutcome::default();
    for rec in records {
        match rec.validate() {
            Ok(()) => out.accepted.push(rec),
            Err(EngineError::MalformedRecord { id, reason }) if mode == ValidationMode::Skip => {
                tracing::warn!(%id, %reason, "skipping malformed evidence record");
                out.rejected.push(RejectedRecord { id, reason });
            }
            Err(e) => return Err(e),
        }
    }
    Ok(out)
}
