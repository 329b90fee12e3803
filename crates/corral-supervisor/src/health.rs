//! Aggregate health endpoint.
//!
//! `GET /health` reports `{"errors": [...]}` with status 500 when any
//! managed instance is missing from the engine's running set, stuck
//! mid-action, or failing its periodic in-container probe.

use crate::supervisor::Supervisor;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

/// Application state shared with handlers.
#[derive(Clone)]
pub struct AppState {
    /// The supervisor under observation.
    pub supervisor: Arc<Supervisor>,
}

/// Creates the health router.
#[must_use]
pub fn router(supervisor: Arc<Supervisor>) -> Router {
    Router::new()
        .route("/health", get(get_health))
        .with_state(AppState { supervisor })
}

/// Aggregate health response.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthReport {
    /// One terse message per unhealthy instance; empty when converged.
    pub errors: Vec<String>,
}

async fn get_health(State(state): State<AppState>) -> Response {
    let report = build_report(&state.supervisor).await;
    let status = if report.errors.is_empty() {
        StatusCode::OK
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    (status, Json(report)).into_response()
}

/// Builds the report: per-instance state is snapshotted under the
/// supervisor mutex, then the engine is queried with the mutex released.
async fn build_report(supervisor: &Supervisor) -> HealthReport {
    let mut errors = Vec::new();
    let instances = supervisor.health_snapshot();

    let running: HashSet<String> = match supervisor.engine().list_containers(false).await {
        Ok(containers) => containers
            .into_iter()
            .flat_map(|c| c.names)
            .collect(),
        Err(e) => {
            errors.push(e.to_string());
            return HealthReport { errors };
        }
    };

    for instance in instances {
        if !running.contains(&format!("/{}", instance.name)) {
            errors.push(format!("container is not running: {}", instance.name));
            continue;
        }
        if instance.stuck {
            errors.push(format!("container is stuck: {}", instance.name));
            continue;
        }
        if let Some(probe_error) = instance.probe_error {
            errors.push(format!(
                "container is failing its check: {}: {probe_error}",
                instance.name
            ));
        }
    }

    HealthReport { errors }
}
