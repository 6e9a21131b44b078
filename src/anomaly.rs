//! anomaly.rs: Price swings between successive captures of one item.
//!
//! Stateless per pair: the caller resolves the single most recent prior
//! capture and hands both prices in.
//!   - change_pct = (new - prev) / prev * 100
//!   - severity by |change_pct|: < moderate_pct → minor, ≤ significant_pct →
//!     moderate, beyond → significant
//!   - an event is only produced at or above `min_report` severity

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{EngineError, EngineResult};
use crate::evidence::{is_positive_price, EvidenceRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Minor,
    Moderate,
    Significant,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Minor => "minor",
            Severity::Moderate => "moderate",
            Severity::Significant => "significant",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeDirection {
    Increased,
    Decreased,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnomalyPolicy {
    /// |change| at or above this is at least moderate.
    pub moderate_pct: f64,
    /// |change| above this is significant.
    pub significant_pct: f64,
    /// Lowest severity that produces an event.
    pub min_report: Severity,
}

impl Default for AnomalyPolicy {
    fn default() -> Self {
        Self {
            moderate_pct: 10.0,
            significant_pct: 25.0,
            min_report: Severity::Moderate,
        }
    }
}

impl AnomalyPolicy {
    pub fn severity(&self, change_pct: f64) -> Severity {
        let abs = change_pct.abs();
        if abs > self.significant_pct {
            Severity::Significant
        } else if abs >= self.moderate_pct {
            Severity::Moderate
        } else {
            Severity::Minor
        }
    }
}

/// Measured change between two prices, reported or not.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceChange {
    pub previous_price: f64,
    pub new_price: f64,
    pub change_pct: f64,
    pub change_direction: ChangeDirection,
    pub severity: Severity,
}

/// Detected jump. Immutable, append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceAnomalyEvent {
    pub item_name: String,
    pub previous_price: f64,
    pub new_price: f64,
    pub change_pct: f64,
    pub change_direction: ChangeDirection,
    pub severity: Severity,
    pub detected_at: DateTime<Utc>,
}

/// Measure the change from `previous` to `next`. Minor changes are returned
/// too, so callers can record them without alerting.
pub fn measure_change(
    previous: f64,
    next: f64,
    policy: &AnomalyPolicy,
) -> EngineResult<PriceChange> {
    if !is_positive_price(previous) {
        return Err(EngineError::InvalidPrice { value: previous });
    }
    if !is_positive_price(next) {
        return Err(EngineError::InvalidPrice { value: next });
    }

    let change_pct = (next - previous) / previous * 100.0;
    let change_direction = if change_pct > 0.0 {
        ChangeDirection::Increased
    } else {
        ChangeDirection::Decreased
    };

    Ok(PriceChange {
        previous_price: previous,
        new_price: next,
        change_pct,
        change_direction,
        severity: policy.severity(change_pct),
    })
}

/// Event for `item_name` if the change reaches `policy.min_report`, else `None`.
pub fn detect_anomaly(
    item_name: &str,
    previous: f64,
    next: f64,
    detected_at: DateTime<Utc>,
    policy: &AnomalyPolicy,
) -> EngineResult<Option<PriceAnomalyEvent>> {
    let change = measure_change(previous, next, policy)?;
    if change.severity < policy.min_report {
        return Ok(None);
    }

    tracing::debug!(
        item = item_name,
        change_pct = change.change_pct,
        severity = change.severity.as_str(),
        "price anomaly detected"
    );

    Ok(Some(PriceAnomalyEvent {
        item_name: item_name.to_string(),
        previous_price: change.previous_price,
        new_price: change.new_price,
        change_pct: change.change_pct,
        change_direction: change.change_direction,
        severity: change.severity,
        detected_at,
    }))
}

/// Compare two captures of the same item. `detected_at` is the newer capture time.
pub fn detect_between(
    previous: &EvidenceRecord,
    next: &EvidenceRecord,
    policy: &AnomalyPolicy,
) -> EngineResult<Option<PriceAnomalyEvent>> {
    if !previous.same_group(next) {
        return Err(EngineError::MixedEvidence {
            expected: previous.group_key(),
            found: next.group_key(),
        });
    }
    let (older, newer) = if previous.captured_at <= next.captured_at {
        (previous, next)
    } else {
        (next, previous)
    };
    detect_anomaly(
        &newer.item_key,
        older.price_typical,
        newer.price_typical,
        newer.captured_at,
        policy,
    )
}
