pub mod generate;
pub mod status;

use std::sync::Arc;

use axum::extract::State;
use axum::response::Html;
use axum::Json;

use crate::dto::HealthResponse;
use crate::page;
use crate::state::AppState;

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

pub async fn index(State(state): State<Arc<AppState>>) -> Html<String> {
    Html(page::render(&state.services.profile, &state.limits))
}
