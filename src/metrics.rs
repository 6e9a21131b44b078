use axum::{routing::get, Router};
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

use crate::anomaly::PriceAnomalyEvent;
use crate::freshness::PlatformHealthLevel;
use crate::proposal::BenchmarkProposal;

#[derive(Clone)]
pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the Prometheus recorder once per process; later calls share it.
    /// Returns `None` if another recorder was installed first.
    pub fn init() -> Option<Self> {
        static HANDLE: OnceCell<Option<PrometheusHandle>> = OnceCell::new();
        let handle = HANDLE.get_or_init(|| match PrometheusBuilder::new().install_recorder() {
            Ok(h) => {
                describe();
                Some(h)
            }
            Err(e) => {
                tracing::warn!(error = %e, "prometheus: recorder not installed");
                None
            }
        });
        handle.clone().map(|handle| Self { handle })
    }

    /// Returns a router exposing `/metrics` with the Prometheus exposition format.
    pub fn router<S: Clone + Send + Sync + 'static>(&self) -> Router<S> {
        let handle = self.handle.clone();
        Router::new().route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        )
    }
}

fn describe() {
    describe_counter!(
        "engine_proposals_generated_total",
        "Benchmark proposals generated."
    );
    describe_counter!(
        "engine_evidence_rejected_total",
        "Evidence records dropped as malformed at ingestion."
    );
    describe_counter!(
        "engine_anomalies_detected_total",
        "Reported price anomalies by severity."
    );
    describe_gauge!(
        "engine_last_health_level",
        "Latest platform level: 0 healthy, 1 aging, 2 degraded."
    );
    describe_histogram!(
        "engine_proposal_confidence",
        "Confidence score of generated proposals."
    );
}

pub fn record_proposal(p: &BenchmarkProposal) {
    counter!("engine_proposals_generated_total").increment(1);
    histogram!("engine_proposal_confidence").record(f64::from(p.confidence_score));
}

pub fn record_rejected(n: usize) {
    if n > 0 {
        counter!("engine_evidence_rejected_total").increment(n as u64);
    }
}

pub fn record_anomaly(e: &PriceAnomalyEvent) {
    counter!("engine_anomalies_detected_total", "severity" => e.severity.as_str()).increment(1);
}

pub fn record_health_level(level: PlatformHealthLevel) {
    gauge!("engine_last_health_level").set(level.as_gauge());
}
