use std::sync::Arc;

use axum::{extract::State, Json};

use crate::dto::StatusResponse;
use crate::error::AppError;
use crate::state::AppState;

pub async fn status(State(state): State<Arc<AppState>>) -> Result<Json<StatusResponse>, AppError> {
    let services = &state.services;
    let config = services.model_config()?;
    let status = services.loader.status(&config);
    let handle = services.loader.cached(&config);

    Ok(Json(StatusResponse {
        profile: services.profile.profile.label(),
        title: services.profile.profile.title(),
        model: config.display_name(),
        message: status.to_string(),
        status,
        device: handle.as_ref().map(|h| h.device().label()),
        runtime_name: handle.as_ref().map(|h| h.name().to_string()),
        artifact: handle.as_ref().map(|h| h.artifact().clone()),
        load_ms: handle.as_ref().map(|h| h.load_duration().as_millis() as u64),
        limits: state.limits,
    }))
}
