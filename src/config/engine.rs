// src/config/engine.rs
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::anomaly::AnomalyPolicy;
use crate::freshness::{FreshnessPolicy, HealthPolicy};
use crate::health::CoveragePolicy;

pub const ENV_CONFIG_PATH: &str = "ENGINE_CONFIG_PATH";
pub const DEFAULT_CONFIG_PATH: &str = "config/engine.toml";

pub const ENV_COVERAGE_MIN_RECORDS: &str = "ENGINE_COVERAGE_MIN_RECORDS";
pub const ENV_STALE_DAYS: &str = "ENGINE_STALE_DAYS";

/// What to do with a malformed record inside a batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationMode {
    /// Drop the record, report it, keep going.
    #[default]
    Skip,
    /// Fail the whole batch.
    Reject,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationSection {
    pub mode: ValidationMode,
}

/// Every tunable threshold of the engine. Passed by value into the pure
/// functions; nothing reads it from a global.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub freshness: FreshnessPolicy,
    pub health: HealthPolicy,
    pub anomaly: AnomalyPolicy,
    pub coverage: CoveragePolicy,
    pub validation: ValidationSection,
}

impl EngineConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let cfg: EngineConfig = toml::from_str(s).context("parsing engine config TOML")?;
        Ok(cfg.sanitized())
    }

    /// Repair values that would make the classifiers meaningless.
    pub fn sanitized(mut self) -> Self {
        let defaults = EngineConfig::default();

        let f = &mut self.freshness;
        if f.fresh_max_days < 0 {
            f.fresh_max_days = defaults.freshness.fresh_max_days;
        }
        if f.aging_max_days < 0 {
            f.aging_max_days = defaults.freshness.aging_max_days;
        }
        if f.fresh_max_days > f.aging_max_days {
            std::mem::swap(&mut f.fresh_max_days, &mut f.aging_max_days);
        }

        let a = &mut self.anomaly;
        if !a.moderate_pct.is_finite() || a.moderate_pct < 0.0 {
            a.moderate_pct = defaults.anomaly.moderate_pct;
        }
        if !a.significant_pct.is_finite() || a.significant_pct < 0.0 {
            a.significant_pct = defaults.anomaly.significant_pct;
        }
        if a.moderate_pct > a.significant_pct {
            std::mem::swap(&mut a.moderate_pct, &mut a.significant_pct);
        }

        if !self.coverage.stale_days.is_finite() || self.coverage.stale_days < 0.0 {
            self.coverage.stale_days = defaults.coverage.stale_days;
        }

        self
    }

    /// Apply `ENGINE_COVERAGE_MIN_RECORDS` / `ENGINE_STALE_DAYS` when set and parseable.
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(n) = parse_env::<usize>(ENV_COVERAGE_MIN_RECORDS) {
            self.coverage.min_records = n;
        }
        if let Some(d) = parse_env::<f64>(ENV_STALE_DAYS) {
            if d.is_finite() && d >= 0.0 {
                self.coverage.stale_days = d;
            }
        }
        self
    }
}

fn parse_env<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.trim().parse::<T>().ok())
}

/// Load from an explicit path.
pub fn load_from(path: &Path) -> Result<EngineConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading engine config from {}", path.display()))?;
    EngineConfig::from_toml_str(&content)
}

/// Load using env var + fallbacks, then apply env overrides:
/// 1) $ENGINE_CONFIG_PATH (must exist)
/// 2) config/engine.toml
/// 3) built-in defaults
pub fn load_default() -> Result<EngineConfig> {
    let base = if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
        let pb = PathBuf::from(p);
        if !pb.exists() {
            return Err(anyhow!("{ENV_CONFIG_PATH} points to non-existent path"));
        }
        load_from(&pb)?
    } else {
        let default_p = PathBuf::from(DEFAULT_CONFIG_PATH);
        if default_p.exists() {
            load_from(&default_p)?
        } else {
            EngineConfig::default()
        }
    };
    Ok(base.with_env_overrides())
}
