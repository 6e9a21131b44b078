//! # Coverage / Health Reporter
//!
//! Pure aggregation over the source registry and category statistics into
//! the summary dashboards render: source counts by status, freshness of
//! tracked sources, coverage gaps, and the overall platform level.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::anomaly::PriceAnomalyEvent;
use crate::config::EngineConfig;
use crate::evidence::EvidenceRecord;
use crate::freshness::{
    assess, category_stats_at, platform_level, CategoryFreshness, FreshnessAssessment,
    FreshnessDistribution, FreshnessPolicy, HealthPolicy, PipelineRun, PlatformHealthLevel,
};
use crate::reliability::Grade;

/// Failure streak at which a source counts as disabled.
pub const DISABLE_AFTER_FAILURES: u32 = 5;

/// One registered data origin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRegistryEntry {
    pub id: String,
    pub name: String,
    pub source_type: String,
    #[serde(default)]
    pub region: Option<String>,
    pub is_active: bool,
    #[serde(default)]
    pub is_whitelisted: bool,
    pub reliability_default: Grade,
    #[serde(default)]
    pub last_scraped_status: Option<String>,
    #[serde(default)]
    pub last_record_count: Option<u64>,
    #[serde(default)]
    pub consecutive_failures: u32,
    #[serde(default)]
    pub last_successful_capture_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceStatus {
    Active,
    Failing,
    Disabled,
    Inactive,
}

impl SourceRegistryEntry {
    /// Disabled wins over everything, including `is_active`.
    pub fn is_disabled(&self) -> bool {
        self.consecutive_failures >= DISABLE_AFTER_FAILURES
    }

    pub fn is_failing(&self) -> bool {
        self.consecutive_failures > 0 && !self.is_disabled()
    }

    /// Counted as active: switched on and not disabled. A failing source is
    /// still active.
    pub fn counts_as_active(&self) -> bool {
        self.is_active && !self.is_disabled()
    }

    pub fn status(&self) -> SourceStatus {
        if self.is_disabled() {
            SourceStatus::Disabled
        } else if !self.is_active {
            SourceStatus::Inactive
        } else if self.is_failing() {
            SourceStatus::Failing
        } else {
            SourceStatus::Active
        }
    }
}

/// Freshness of one source plus its status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceFreshness {
    pub source_id: String,
    pub name: String,
    pub status: SourceStatus,
    #[serde(flatten)]
    pub assessment: FreshnessAssessment,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSummary {
    pub total_sources: usize,
    pub active_sources: usize,
    pub failing_sources: usize,
    pub disabled_sources: usize,
    /// Distribution over tracked (`is_active`) sources.
    pub freshness: FreshnessDistribution,
    pub sources: Vec<SourceFreshness>,
    pub level: PlatformHealthLevel,
}

/// Source counts, per-source freshness and the platform level.
pub fn summarize_source_health_at(
    sources: &[SourceRegistryEntry],
    latest_run: Option<&PipelineRun>,
    now: DateTime<Utc>,
    freshness: &FreshnessPolicy,
    health: &HealthPolicy,
) -> HealthSummary {
    let mut active = 0;
    let mut failing = 0;
    let mut disabled = 0;
    let mut dist = FreshnessDistribution::default();
    let mut rows = Vec::with_capacity(sources.len());

    for s in sources {
        if s.counts_as_active() {
            active += 1;
        }
        if s.is_failing() {
            failing += 1;
        }
        if s.is_disabled() {
            disabled += 1;
        }

        let assessment = assess(
            s.last_successful_capture_at,
            s.reliability_default,
            now,
            freshness,
        );
        if s.is_active {
            dist.add(assessment.freshness_level);
        }
        rows.push(SourceFreshness {
            source_id: s.id.clone(),
            name: s.name.clone(),
            status: s.status(),
            assessment,
        });
    }

    HealthSummary {
        total_sources: sources.len(),
        active_sources: active,
        failing_sources: failing,
        disabled_sources: disabled,
        freshness: dist,
        sources: rows,
        level: platform_level(&dist, latest_run, health),
    }
}

/// Same with default policies, the current time and no pipeline run.
pub fn summarize_source_health(sources: &[SourceRegistryEntry]) -> HealthSummary {
    summarize_source_health_at(
        sources,
        None,
        Utc::now(),
        &FreshnessPolicy::default(),
        &HealthPolicy::default(),
    )
}

/// Thresholds for flagging a category as under-covered.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoveragePolicy {
    pub min_records: usize,
    pub stale_days: f64,
}

impl Default for CoveragePolicy {
    fn default() -> Self {
        Self {
            min_records: 5,
            stale_days: 30.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GapReason {
    TooFewRecords,
    Stale,
}

/// Input row for gap detection.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CategoryCount {
    pub count: usize,
    #[serde(default)]
    pub avg_age_days: Option<f64>,
}

impl From<&CategoryFreshness> for CategoryCount {
    fn from(c: &CategoryFreshness) -> Self {
        Self {
            count: c.record_count,
            avg_age_days: c.avg_age_days,
        }
    }
}

/// A category that needs action, with what the caller needs to render it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoverageGap {
    pub category: String,
    pub record_count: usize,
    pub avg_age_days: Option<f64>,
    pub reasons: Vec<GapReason>,
}

/// Categories with fewer than `min_count` records or an average age above
/// `stale_days`, ordered by category name.
pub fn find_coverage_gaps(
    category_stats: &BTreeMap<String, CategoryCount>,
    min_count: usize,
    stale_days: f64,
) -> Vec<CoverageGap> {
    category_stats
        .iter()
        .filter_map(|(category, c)| {
            let mut reasons = Vec::new();
            if c.count < min_count {
                reasons.push(GapReason::TooFewRecords);
            }
            if c.avg_age_days.is_some_and(|a| a > stale_days) {
                reasons.push(GapReason::Stale);
            }
            (!reasons.is_empty()).then(|| CoverageGap {
                category: category.clone(),
                record_count: c.count,
                avg_age_days: c.avg_age_days,
                reasons,
            })
        })
        .collect()
}

/// Everything a health check needs, as one snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HealthInput {
    pub sources: Vec<SourceRegistryEntry>,
    #[serde(default)]
    pub evidence: Vec<EvidenceRecord>,
    /// Categories that must be covered even when they have no evidence.
    #[serde(default)]
    pub expected_categories: Vec<String>,
    #[serde(default)]
    pub latest_run: Option<PipelineRun>,
    /// Anomalies detected since the last check.
    #[serde(default)]
    pub anomalies: Vec<PriceAnomalyEvent>,
}

/// Composed dashboard summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub generated_at: DateTime<Utc>,
    #[serde(flatten)]
    pub sources: HealthSummary,
    pub categories: Vec<CategoryFreshness>,
    pub coverage_gaps: Vec<CoverageGap>,
    /// Alert-worthy anomalies only, most recent first.
    pub alerts: Vec<PriceAnomalyEvent>,
}

pub fn build_report(input: &HealthInput, cfg: &EngineConfig, now: DateTime<Utc>) -> HealthReport {
    let sources = summarize_source_health_at(
        &input.sources,
        input.latest_run.as_ref(),
        now,
        &cfg.freshness,
        &cfg.health,
    );

    let stats = category_stats_at(&input.evidence, &input.expected_categories, now);
    let counts: BTreeMap<String, CategoryCount> =
        stats.iter().map(|(k, v)| (k.clone(), CategoryCount::from(v))).collect();
    let coverage_gaps =
        find_coverage_gaps(&counts, cfg.coverage.min_records, cfg.coverage.stale_days);

    let mut alerts: Vec<PriceAnomalyEvent> = input
        .anomalies
        .iter()
        .filter(|a| a.severity >= cfg.anomaly.min_report)
        .cloned()
        .collect();
    alerts.sort_by(|a, b| b.detected_at.cmp(&a.detected_at));

    HealthReport {
        generated_at: now,
        sources,
        categories: stats.into_values().collect(),
        coverage_gaps,
        alerts,
    }
}
