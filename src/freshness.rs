//! # Freshness Classifier
//!
//! Classifies how recently a source or category was captured and rolls the
//! per-source levels up into one platform health level.
//!
//! Thresholds (inclusive, configurable):
//! - `days ≤ fresh_max_days` (7) → fresh
//! - `days ≤ aging_max_days` (30) → aging
//! - beyond → stale
//! - never captured → unknown

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::evidence::EvidenceRecord;
use crate::reliability::Grade;

const SECS_PER_DAY: f64 = 86_400.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FreshnessLevel {
    Fresh,
    Aging,
    Stale,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FreshnessPolicy {
    pub fresh_max_days: i64,
    pub aging_max_days: i64,
}

impl Default for FreshnessPolicy {
    fn default() -> Self {
        Self {
            fresh_max_days: 7,
            aging_max_days: 30,
        }
    }
}

impl FreshnessPolicy {
    pub fn classify(&self, days_since: Option<i64>) -> FreshnessLevel {
        match days_since {
            None => FreshnessLevel::Unknown,
            Some(d) if d <= self.fresh_max_days => FreshnessLevel::Fresh,
            Some(d) if d <= self.aging_max_days => FreshnessLevel::Aging,
            Some(_) => FreshnessLevel::Stale,
        }
    }
}

/// Classify with the default 7/30-day policy.
pub fn classify_freshness(days_since: Option<i64>) -> FreshnessLevel {
    FreshnessPolicy::default().classify(days_since)
}

/// Whole days elapsed from `ts` to `now`, floored. Future timestamps count as 0.
pub fn days_since(ts: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Option<i64> {
    ts.map(|t| (now - t).num_days().max(0))
}

/// Fractional days elapsed, never negative.
pub fn age_days(ts: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    ((now - ts).num_seconds() as f64 / SECS_PER_DAY).max(0.0)
}

/// Per-source classification. The grade is the registry's default grade,
/// carried alongside for display; it does not influence the level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FreshnessAssessment {
    pub days_since_last_capture: Option<i64>,
    pub freshness_level: FreshnessLevel,
    pub reliability_grade: Grade,
}

pub fn assess(
    last_successful_capture_at: Option<DateTime<Utc>>,
    reliability_grade: Grade,
    now: DateTime<Utc>,
    policy: &FreshnessPolicy,
) -> FreshnessAssessment {
    let days = days_since(last_successful_capture_at, now);
    FreshnessAssessment {
        days_since_last_capture: days,
        freshness_level: policy.classify(days),
        reliability_grade,
    }
}

/// Count of sources per freshness level.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FreshnessDistribution {
    pub fresh: usize,
    pub aging: usize,
    pub stale: usize,
    pub unknown: usize,
}

impl FreshnessDistribution {
    pub fn add(&mut self, level: FreshnessLevel) {
        match level {
            FreshnessLevel::Fresh => self.fresh += 1,
            FreshnessLevel::Aging => self.aging += 1,
            FreshnessLevel::Stale => self.stale += 1,
            FreshnessLevel::Unknown => self.unknown += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.fresh + self.aging + self.stale + self.unknown
    }
}

impl FromIterator<FreshnessLevel> for FreshnessDistribution {
    fn from_iter<I: IntoIterator<Item = FreshnessLevel>>(iter: I) -> Self {
        let mut d = Self::default();
        for l in iter {
            d.add(l);
        }
        d
    }
}

/// Status of one full ingestion pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Partial,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineRun {
    pub id: String,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
}

impl PipelineRun {
    /// A finished run that did not complete successfully.
    pub fn is_unsuccessful(&self) -> bool {
        matches!(self.status, RunStatus::Partial | RunStatus::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlatformHealthLevel {
    Healthy,
    Aging,
    Degraded,
}

impl PlatformHealthLevel {
    /// 0 healthy, 1 aging, 2 degraded.
    pub fn as_gauge(self) -> f64 {
        match self {
            PlatformHealthLevel::Healthy => 0.0,
            PlatformHealthLevel::Aging => 1.0,
            PlatformHealthLevel::Degraded => 2.0,
        }
    }
}

/// Tolerances for the platform level. With the defaults a single stale
/// (or never-captured) tracked source degrades the platform and a single
/// aging one downgrades it to aging.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthPolicy {
    pub aging_tolerance: usize,
    pub stale_tolerance: usize,
    pub count_unknown_as_stale: bool,
}

impl Default for HealthPolicy {
    fn default() -> Self {
        Self {
            aging_tolerance: 0,
            stale_tolerance: 0,
            count_unknown_as_stale: true,
        }
    }
}

/// Overall level from the freshness distribution of tracked sources and the
/// latest pipeline run.
///
/// degraded: stale (+ unknown) count above `stale_tolerance`, or the latest
/// run ended partial/failed. aging: aging count above `aging_tolerance`.
/// Otherwise healthy. A still-running latest run is neutral.
pub fn platform_level(
    dist: &FreshnessDistribution,
    latest_run: Option<&PipelineRun>,
    policy: &HealthPolicy,
) -> PlatformHealthLevel {
    let overdue = dist.stale
        + if policy.count_unknown_as_stale {
            dist.unknown
        } else {
            0
        };

    if overdue > policy.stale_tolerance || latest_run.is_some_and(PipelineRun::is_unsuccessful) {
        PlatformHealthLevel::Degraded
    } else if dist.aging > policy.aging_tolerance {
        PlatformHealthLevel::Aging
    } else {
        PlatformHealthLevel::Healthy
    }
}

/// Evidence-based freshness of one category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryFreshness {
    pub category: String,
    pub record_count: usize,
    /// Plain mean of record ages in days; `None` for an empty category.
    pub avg_age_days: Option<f64>,
    pub latest_capture_at: Option<DateTime<Utc>>,
}

impl CategoryFreshness {
    fn empty(category: &str) -> Self {
        Self {
            category: category.to_string(),
            record_count: 0,
            avg_age_days: None,
            latest_capture_at: None,
        }
    }

    /// Level of the most recent capture under `policy`.
    pub fn level(&self, now: DateTime<Utc>, policy: &FreshnessPolicy) -> FreshnessLevel {
        policy.classify(days_since(self.latest_capture_at, now))
    }
}

pub fn category_stats(
    records: &[EvidenceRecord],
    expected: &[String],
) -> BTreeMap<String, CategoryFreshness> {
    category_stats_at(records, expected, Utc::now())
}

/// Per-category record count, average age and latest capture.
///
/// `expected` seeds categories that must appear even with no evidence, so
/// a category that has gone silent shows up with a zero count.
pub fn category_stats_at(
    records: &[EvidenceRecord],
    expected: &[String],
    now: DateTime<Utc>,
) -> BTreeMap<String, CategoryFreshness> {
    let mut acc: BTreeMap<String, (CategoryFreshness, f64)> = expected
        .iter()
        .map(|c| (c.clone(), (CategoryFreshness::empty(c), 0.0)))
        .collect();

    for r in records {
        let (cf, age_sum) = acc
            .entry(r.category.clone())
            .or_insert_with(|| (CategoryFreshness::empty(&r.category), 0.0));
        cf.record_count += 1;
        *age_sum += age_days(r.captured_at, now);
        cf.latest_capture_at = match cf.latest_capture_at {
            Some(t) if t >= r.captured_at => Some(t),
            _ => Some(r.captured_at),
        };
    }

    acc.into_iter()
        .map(|(k, (mut cf, age_sum))| {
            if cf.record_count > 0 {
                cf.avg_age_days = Some(age_sum / cf.record_count as f64);
            }
            (k, cf)
        })
        .collect()
}
