// src/lib.rs
// Public library surface for the binary, integration tests and reuse by other services.

pub mod errors;
pub mod reliability;
pub mod evidence;
pub mod proposal;
pub mod audit;

// Monitoring side: freshness bands, source health, price anomalies
pub mod freshness;
pub mod health;
pub mod anomaly;

pub mod config;
pub mod history;
pub mod metrics;
pub mod api;

// ---- Re-exports for stable public API ----
pub use crate::anomaly::{detect_anomaly, detect_between, PriceAnomalyEvent, Severity};
pub use crate::api::{router, AppState};
pub use crate::errors::{EngineError, EngineResult};
pub use crate::evidence::{EvidenceRecord, RawEvidence};
pub use crate::freshness::{classify_freshness, FreshnessLevel, PlatformHealthLevel};
pub use crate::health::{find_coverage_gaps, summarize_source_health, CoverageGap, HealthSummary};
pub use crate::proposal::{generate_proposal, BenchmarkProposal};
pub use crate::reliability::{weight_of, Grade};

use shuttle_axum::axum::Router;

/// Build the full in-process app: config and publisher grades from disk/env,
/// audit entries to tracing, `/metrics` when a recorder could be installed.
pub async fn app() -> anyhow::Result<Router> {
    let state = AppState::from_env()?;
    Ok(router(state))
}
