//! # Benchmark Proposal Generator
//! Pure, testable logic that maps a set of evidence records for one
//! `(category, item)` → `BenchmarkProposal`. No I/O; suitable for unit
//! tests and for replaying history.
//!
//! Percentiles use nearest-rank-floor over sorted typical prices. The mean
//! is weighted by reliability grade. Confidence blends evidence volume,
//! publisher variety, and average grade quality (40/30/30).

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::audit::ProposalAuditEntry;
use crate::errors::{EngineError, EngineResult};
use crate::evidence::{Confidentiality, EvidenceRecord};
use crate::reliability::{normalize_publisher, weight_of, MAX_GRADE_WEIGHT};

/// Evidence count at which the volume sub-score saturates.
pub const SAMPLE_TARGET: f64 = 10.0;
/// Distinct publishers at which the diversity sub-score saturates.
pub const DIVERSITY_TARGET: f64 = 5.0;

const W_SAMPLE: f64 = 0.4;
const W_DIVERSITY: f64 = 0.3;
const W_GRADE: f64 = 0.3;

/// The three normalized inputs of the confidence score, each in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceBreakdown {
    pub sample_score: f64,
    pub diversity_score: f64,
    pub grade_score: f64,
}

impl ConfidenceBreakdown {
    /// Integer score 0..=100.
    pub fn score(&self) -> u8 {
        let blended = self.sample_score * W_SAMPLE
            + self.diversity_score * W_DIVERSITY
            + self.grade_score * W_GRADE;
        (blended * 100.0).round().clamp(0.0, 100.0) as u8
    }
}

/// Output artifact for one `(category, item)`. Persisted as a new row per
/// generation; never updated in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkProposal {
    pub category: String,
    pub item_key: String,
    pub p25: f64,
    pub p50: f64,
    pub p75: f64,
    pub weighted_mean: f64,
    /// Distinct publishers (not URLs) among the evidence.
    pub source_diversity: usize,
    /// Integer in `[0, 100]`.
    pub confidence_score: u8,
    pub confidence: ConfidenceBreakdown,
    pub evidence_count: usize,
    pub observed_min: f64,
    pub observed_max: f64,
    /// Strictest classification among the contributing records.
    pub confidentiality: Confidentiality,
    /// Contributing record ids, sorted.
    pub evidence_ids: Vec<String>,
    /// SHA-256 over sorted `(id, price_typical)` pairs; identifies the input set.
    pub evidence_fingerprint: String,
    pub generated_at: DateTime<Utc>,
}

impl BenchmarkProposal {
    /// Compliance record describing this generation event. The caller
    /// decides where it goes; the engine never writes it.
    pub fn audit_entry(&self) -> ProposalAuditEntry {
        ProposalAuditEntry {
            action: ProposalAuditEntry::ACTION.to_string(),
            category: self.category.clone(),
            item_key: self.item_key.clone(),
            evidence_count: self.evidence_count,
            source_diversity: self.source_diversity,
            weighted_mean: self.weighted_mean,
            confidence_score: self.confidence_score,
            generated_at: self.generated_at,
            evidence_ids: self.evidence_ids.clone(),
            evidence_fingerprint: self.evidence_fingerprint.clone(),
        }
    }

    /// True when both proposals were computed from the same statistics,
    /// regardless of when they were generated.
    pub fn same_statistics(&self, other: &BenchmarkProposal) -> bool {
        let mut a = self.clone();
        a.generated_at = other.generated_at;
        &a == other
    }
}

/// Generate a proposal stamped with the current time.
pub fn generate_proposal(records: &[EvidenceRecord]) -> EngineResult<BenchmarkProposal> {
    generate_proposal_at(records, Utc::now())
}

/// Same computation with an explicit `generated_at`; fully deterministic.
pub fn generate_proposal_at(
    records: &[EvidenceRecord],
    generated_at: DateTime<Utc>,
) -> EngineResult<BenchmarkProposal> {
    let refs: Vec<&EvidenceRecord> = records.iter().collect();
    build(&refs, generated_at)
}

pub fn generate_category_proposals(
    records: &[EvidenceRecord],
) -> EngineResult<BTreeMap<String, EngineResult<BenchmarkProposal>>> {
    generate_category_proposals_at(records, Utc::now())
}

/// One proposal (or the reason there is none) per item of a single
/// category, keyed and ordered by item key.
///
/// Empty input is `InsufficientEvidence`; records from a second category
/// are `MixedEvidence`.
pub fn generate_category_proposals_at(
    records: &[EvidenceRecord],
    generated_at: DateTime<Utc>,
) -> EngineResult<BTreeMap<String, EngineResult<BenchmarkProposal>>> {
    let first = records.first().ok_or(EngineError::InsufficientEvidence)?;
    if let Some(stray) = records.iter().find(|r| r.category != first.category) {
        return Err(EngineError::MixedEvidence {
            expected: first.category.clone(),
            found: stray.category.clone(),
        });
    }

    let mut groups: BTreeMap<String, Vec<&EvidenceRecord>> = BTreeMap::new();
    for r in records {
        groups.entry(r.item_key.clone()).or_default().push(r);
    }
    Ok(groups
        .into_iter()
        .map(|(k, g)| (k, build(&g, generated_at)))
        .collect())
}

fn build(
    records: &[&EvidenceRecord],
    generated_at: DateTime<Utc>,
) -> EngineResult<BenchmarkProposal> {
    // 1) Input checks: non-empty, valid, one group
    let first = *records.first().ok_or(EngineError::InsufficientEvidence)?;
    for r in records {
        r.validate()?;
        if !r.same_group(first) {
            return Err(EngineError::MixedEvidence {
                expected: first.group_key(),
                found: r.group_key(),
            });
        }
    }

    let n = records.len();

    // 2) Percentiles (nearest-rank-floor)
    let mut prices: Vec<f64> = records.iter().map(|r| r.price_typical).collect();
    prices.sort_by(f64::total_cmp);
    let quantile = |q| percentile_floor(&prices, q).ok_or(EngineError::InsufficientEvidence);
    let (p25, p50, p75) = (quantile(0.25)?, quantile(0.50)?, quantile(0.75)?);
    let (observed_min, observed_max) = (prices[0], prices[n - 1]);

    // 3) Weighted mean (A=3, B=2, C=1)
    let weight_sum: u32 = records.iter().map(|r| weight_of(r.reliability_grade)).sum();
    let weighted_mean = grade_weighted_mean(records, weight_sum).clamp(observed_min, observed_max);

    // 4) Source diversity over normalized publisher identity
    let source_diversity = records
        .iter()
        .map(|r| normalize_publisher(&r.source_publisher))
        .collect::<BTreeSet<_>>()
        .len();

    // 5) Confidence
    let confidence = ConfidenceBreakdown {
        sample_score: (n as f64 / SAMPLE_TARGET).min(1.0),
        diversity_score: (source_diversity as f64 / DIVERSITY_TARGET).min(1.0),
        grade_score: f64::from(weight_sum) / (n as f64 * f64::from(MAX_GRADE_WEIGHT)),
    };
    let confidence_score = confidence.score();

    let confidentiality = records
        .iter()
        .map(|r| r.confidentiality)
        .max()
        .unwrap_or_default();

    let mut pairs: Vec<(&str, f64)> = records
        .iter()
        .map(|r| (r.id.as_str(), r.price_typical))
        .collect();
    pairs.sort_by(|a, b| a.0.cmp(b.0).then(a.1.total_cmp(&b.1)));
    let evidence_fingerprint = fingerprint(&pairs);
    let evidence_ids = pairs.iter().map(|(id, _)| id.to_string()).collect();

    tracing::debug!(
        category = %first.category,
        item = %first.item_key,
        n,
        source_diversity,
        weighted_mean,
        confidence_score,
        "benchmark proposal generated"
    );

    Ok(BenchmarkProposal {
        category: first.category.clone(),
        item_key: first.item_key.clone(),
        p25,
        p50,
        p75,
        weighted_mean,
        source_diversity,
        confidence_score,
        confidence,
        evidence_count: n,
        observed_min,
        observed_max,
        confidentiality,
        evidence_ids,
        evidence_fingerprint,
        generated_at,
    })
}

/// `Σ(price·w) / Σw`. When the plain sum overflows, each price is scaled by
/// its share of the total weight first so the result stays finite.
fn grade_weighted_mean(records: &[&EvidenceRecord], weight_sum: u32) -> f64 {
    let total = f64::from(weight_sum);
    let w = |r: &EvidenceRecord| f64::from(weight_of(r.reliability_grade));

    let plain = records.iter().map(|r| r.price_typical * w(*r)).sum::<f64>() / total;
    if plain.is_finite() {
        return plain;
    }
    records.iter().map(|r| r.price_typical * (w(*r) / total)).sum()
}

/// `sorted[floor(n*q)]`, clamped to the last index. `None` for an empty slice.
pub fn percentile_floor(sorted: &[f64], q: f64) -> Option<f64> {
    let last = sorted.len().checked_sub(1)?;
    let idx = ((sorted.len() as f64) * q).floor() as usize;
    sorted.get(idx.min(last)).copied()
}

fn fingerprint(pairs: &[(&str, f64)]) -> String {
    let mut hasher = Sha256::new();
    for (id, price) in pairs {
        hasher.update(id.as_bytes());
        hasher.update([0u8]);
        hasher.update(price.to_bits().to_be_bytes());
    }
    let digest = hasher.finalize();
    let mut out = String::with_capacity(64);
    for b in digest.iter() {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}
