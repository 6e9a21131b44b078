use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shuttle_axum::axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tower_http::cors::CorsLayer;

use crate::anomaly::{detect_anomaly, measure_change, PriceAnomalyEvent, PriceChange};
use crate::audit::{AuditSink, TracingAuditSink};
use crate::config::{self, EngineConfig};
use crate::errors::EngineError;
use crate::evidence::{ingest, validate_batch, RawEvidence, RejectedRecord};
use crate::freshness::PipelineRun;
use crate::health::{
    build_report, find_coverage_gaps, summarize_source_health_at, CategoryCount, CoverageGap,
    HealthInput, HealthReport, HealthSummary, SourceRegistryEntry,
};
use crate::history::{AnomalyLog, ProposalHistory};
use crate::metrics::{self as engine_metrics, Metrics};
use crate::proposal::{generate_category_proposals_at, generate_proposal_at, BenchmarkProposal};
use crate::reliability::PublisherGrades;

pub const ENV_PUBLISHER_GRADES_PATH: &str = "PUBLISHER_GRADES_PATH";
pub const DEFAULT_PUBLISHER_GRADES_PATH: &str = "config/publisher_grades.json";

#[derive(Clone)]
pub struct AppState {
    config: Arc<RwLock<EngineConfig>>,
    publishers: Arc<RwLock<PublisherGrades>>,
    proposals: Arc<ProposalHistory>,
    anomalies: Arc<AnomalyLog>,
    audit: Arc<dyn AuditSink>,
}

impl AppState {
    pub fn new(
        config: EngineConfig,
        publishers: PublisherGrades,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            config: Arc::new(RwLock::new(config)),
            publishers: Arc::new(RwLock::new(publishers)),
            proposals: Arc::new(ProposalHistory::new()),
            anomalies: Arc::new(AnomalyLog::new()),
            audit,
        }
    }

    /// Config from `ENGINE_CONFIG_PATH`/`config/engine.toml`, publishers from
    /// `PUBLISHER_GRADES_PATH`/`config/publisher_grades.json`, audit to tracing.
    pub fn from_env() -> anyhow::Result<Self> {
        let cfg = config::load_default()?;
        let publishers = PublisherGrades::load_from_file(publisher_grades_path());
        Ok(Self::new(cfg, publishers, Arc::new(TracingAuditSink)))
    }

    pub fn proposals(&self) -> &ProposalHistory {
        &self.proposals
    }

    pub fn anomalies(&self) -> &AnomalyLog {
        &self.anomalies
    }

    fn config(&self) -> EngineConfig {
        self.config.read().expect("rwlock poisoned").clone()
    }
}

fn publisher_grades_path() -> PathBuf {
    std::env::var(ENV_PUBLISHER_GRADES_PATH)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_PUBLISHER_GRADES_PATH))
}

pub fn router(state: AppState) -> Router {
    let mut r = Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/proposals", post(create_proposal))
        .route("/proposals/category", post(create_category_proposals))
        .route("/proposals/history", get(proposal_history))
        .route("/sources/health", post(source_health))
        .route("/anomalies/detect", post(detect))
        .route("/anomalies", get(list_anomalies))
        .route("/coverage/gaps", post(coverage_gaps))
        .route("/report", post(report))
        .route("/admin/reload-config", get(admin_reload_config));

    if let Some(m) = Metrics::init() {
        r = r.merge(m.router());
    }

    r.layer(CorsLayer::very_permissive()).with_state(state)
}

/* ----------------------------
Errors
---------------------------- */

#[derive(Debug)]
pub struct ApiError(EngineError);

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        Self(e)
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.0.kind(),
            message: self.0.to_string(),
        };
        (StatusCode::UNPROCESSABLE_ENTITY, Json(body)).into_response()
    }
}

/* ----------------------------
Proposals
---------------------------- */

#[derive(Serialize, Deserialize)]
pub struct ProposalResponse {
    pub proposal: BenchmarkProposal,
    #[serde(default)]
    pub rejected: Vec<RejectedRecord>,
}

fn persist_proposal(state: &AppState, p: &BenchmarkProposal) {
    state.audit.record(&p.audit_entry());
    state.proposals.push(p.clone());
    engine_metrics::record_proposal(p);
}

async fn create_proposal(
    State(state): State<AppState>,
    Json(raw): Json<Vec<RawEvidence>>,
) -> Result<Json<ProposalResponse>, ApiError> {
    let cfg = state.config();
    let outcome = {
        let pubs = state.publishers.read().expect("rwlock poisoned");
        ingest(raw, &pubs, cfg.validation.mode)?
    };
    engine_metrics::record_rejected(outcome.rejected.len());

    let proposal = generate_proposal_at(&outcome.accepted, Utc::now())?;
    persist_proposal(&state, &proposal);

    Ok(Json(ProposalResponse {
        proposal,
        rejected: outcome.rejected,
    }))
}

#[derive(Serialize, Deserialize)]
pub struct ItemFailure {
    pub item_key: String,
    pub error: String,
}

#[derive(Serialize, Deserialize)]
pub struct CategoryProposalsResponse {
    pub proposals: Vec<BenchmarkProposal>,
    pub failures: Vec<ItemFailure>,
    pub rejected: Vec<RejectedRecord>,
}

async fn create_category_proposals(
    State(state): State<AppState>,
    Json(raw): Json<Vec<RawEvidence>>,
) -> Result<Json<CategoryProposalsResponse>, ApiError> {
    let cfg = state.config();
    let outcome = {
        let pubs = state.publishers.read().expect("rwlock poisoned");
        ingest(raw, &pubs, cfg.validation.mode)?
    };
    engine_metrics::record_rejected(outcome.rejected.len());

    let mut proposals = Vec::new();
    let mut failures = Vec::new();
    for (item_key, result) in generate_category_proposals_at(&outcome.accepted, Utc::now())? {
        match result {
            Ok(p) => {
                persist_proposal(&state, &p);
                proposals.push(p);
            }
            Err(e) => failures.push(ItemFailure {
                item_key,
                error: e.to_string(),
            }),
        }
    }

    Ok(Json(CategoryProposalsResponse {
        proposals,
        failures,
        rejected: outcome.rejected,
    }))
}

async fn proposal_history(
    State(state): State<AppState>,
    Query(q): Query<HashMap<String, String>>,
) -> Json<Vec<BenchmarkProposal>> {
    let rows = match (q.get("category"), q.get("item")) {
        (Some(c), Some(i)) => state.proposals.history_for(c, i),
        (Some(c), None) => state.proposals.filtered(|p| &p.category == c),
        _ => state.proposals.snapshot_last_n(50),
    };
    Json(rows)
}

/* ----------------------------
Health, anomalies, coverage
---------------------------- */

#[derive(Deserialize)]
struct SourceHealthReq {
    sources: Vec<SourceRegistryEntry>,
    #[serde(default)]
    latest_run: Option<PipelineRun>,
}

async fn source_health(
    State(state): State<AppState>,
    Json(body): Json<SourceHealthReq>,
) -> Json<HealthSummary> {
    let cfg = state.config();
    let summary = summarize_source_health_at(
        &body.sources,
        body.latest_run.as_ref(),
        Utc::now(),
        &cfg.freshness,
        &cfg.health,
    );
    engine_metrics::record_health_level(summary.level);
    Json(summary)
}

#[derive(Deserialize)]
struct DetectReq {
    item_name: String,
    previous_price: f64,
    new_price: f64,
    #[serde(default)]
    detected_at: Option<DateTime<Utc>>,
}

#[derive(Serialize, Deserialize)]
pub struct DetectResponse {
    pub change: PriceChange,
    pub event: Option<PriceAnomalyEvent>,
}

async fn detect(
    State(state): State<AppState>,
    Json(body): Json<DetectReq>,
) -> Result<Json<DetectResponse>, ApiError> {
    let cfg = state.config();
    let change = measure_change(body.previous_price, body.new_price, &cfg.anomaly)?;
    let event = detect_anomaly(
        &body.item_name,
        body.previous_price,
        body.new_price,
        body.detected_at.unwrap_or_else(Utc::now),
        &cfg.anomaly,
    )?;
    if let Some(e) = &event {
        state.anomalies.push(e.clone());
        engine_metrics::record_anomaly(e);
    }
    Ok(Json(DetectResponse { change, event }))
}

async fn list_anomalies(
    State(state): State<AppState>,
    Query(q): Query<HashMap<String, String>>,
) -> Json<Vec<PriceAnomalyEvent>> {
    let n = q
        .get("limit")
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(50);
    Json(state.anomalies.snapshot_last_n(n))
}

#[derive(Deserialize)]
struct GapsReq {
    categories: BTreeMap<String, CategoryCount>,
    #[serde(default)]
    min_count: Option<usize>,
    #[serde(default)]
    stale_days: Option<f64>,
}

async fn coverage_gaps(
    State(state): State<AppState>,
    Json(body): Json<GapsReq>,
) -> Json<Vec<CoverageGap>> {
    let cfg = state.config();
    Json(find_coverage_gaps(
        &body.categories,
        body.min_count.unwrap_or(cfg.coverage.min_records),
        body.stale_days.unwrap_or(cfg.coverage.stale_days),
    ))
}

async fn report(
    State(state): State<AppState>,
    Json(mut input): Json<HealthInput>,
) -> Result<Json<HealthReport>, ApiError> {
    let cfg = state.config();
    // Malformed evidence must not skew category stats
    let outcome = validate_batch(std::mem::take(&mut input.evidence), cfg.validation.mode)?;
    engine_metrics::record_rejected(outcome.rejected.len());
    input.evidence = outcome.accepted;

    let r = build_report(&input, &cfg, Utc::now());
    engine_metrics::record_health_level(r.sources.level);
    Ok(Json(r))
}

async fn admin_reload_config(State(state): State<AppState>) -> String {
    let fresh = match config::load_default() {
        Ok(c) => c,
        Err(e) => return format!("failed: {e:#}"),
    };
    let pubs = PublisherGrades::load_from_file(publisher_grades_path());
    match (state.config.write(), state.publishers.write()) {
        (Ok(mut c), Ok(mut p)) => {
            *c = fresh;
            *p = pubs;
            "reloaded".to_string()
        }
        _ => "failed: lock poisoned".to_string(),
    }
}
