use axum::{extract::State, Json};
use serde::Serialize;

use crate::db::{ConnectionProbe, Database};
use crate::errors::AppError;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub database: &'static str,
    pub service: &'static str,
    pub version: &'static str,
    pub pool: PoolStats,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct PoolStats {
    pub size: u32,
    pub idle: usize,
    pub max_connections: u32,
}

impl PoolStats {
    pub fn of(db: &Database) -> Self {
        Self {
            size: db.pool().size(),
            idle: db.pool().num_idle(),
            max_connections: db.settings().max_connections,
        }
    }
}

/// GET /health
/// Returns 200 with service version and pool usage when the database answers,
/// 503 otherwise.
pub async fn health_handler(
    State(state): State<AppState>,
) -> Result<Json<HealthReport>, AppError> {
    health_report(state.probe.as_ref(), PoolStats::of(&state.db))
        .await
        .map(Json)
}

pub async fn health_report(
    probe: &dyn ConnectionProbe,
    pool: PoolStats,
) -> Result<HealthReport, AppError> {
    probe.handshake().await?;

    Ok(HealthReport {
        status: "ok",
        database: "up",
        service: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
        pool,
    })
}
