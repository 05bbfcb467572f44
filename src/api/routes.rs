use std::sync::Arc;

use axum::{extract::State, routing::get, Json, Router};

use crate::api::health::{HealthReport, HealthState};

#[derive(Clone)]
pub struct ApiState {
    pub health: Arc<HealthState>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(get_health))
        .with_state(state)
}

async fn get_health(State(state): State<ApiState>) -> Json<HealthReport> {
    Json(state.health.report())
}
