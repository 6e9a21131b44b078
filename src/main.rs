//! Market evidence engine: binary entrypoint.
//! Boots the Axum HTTP server on Shuttle with the library's router.

use shuttle_axum::ShuttleAxum;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Compact logs by default; JSON lines when `ENGINE_LOG_JSON=1`.
/// `RUST_LOG` overrides the filter.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("market_evidence_engine=info,audit=info,warn"));

    let json = std::env::var("ENGINE_LOG_JSON")
        .ok()
        .is_some_and(|v| v == "1");

    let registry = tracing_subscriber::registry().with(filter);
    // Shuttle may already have a subscriber installed; ignore that case.
    let _ = if json {
        registry.with(fmt::layer().json()).try_init()
    } else {
        registry.with(fmt::layer().compact()).try_init()
    };
}

#[shuttle_runtime::main]
async fn axum() -> ShuttleAxum {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();

    init_tracing();

    let router = market_evidence_engine::app().await?;
    tracing::info!("market evidence engine ready");

    Ok(router.into())
}
