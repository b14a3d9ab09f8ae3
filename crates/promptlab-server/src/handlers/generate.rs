use std::sync::Arc;

use axum::{extract::State, Json};
use promptlab_core::GenerationRequest;
use promptlab_services::{ModelInfo, Output};
use tracing::{error, info};

use crate::dto::GenerateBody;
use crate::error::AppError;
use crate::state::AppState;

pub async fn generate(
    State(state): State<Arc<AppState>>,
    Json(body): Json<GenerateBody>,
) -> Result<Json<Output>, AppError> {
    let request = GenerationRequest::from(body);
    state.limits.validate(&request)?;

    info!(
        temperature = request.params.temperature,
        top_p = request.params.top_p,
        max_tokens = request.params.max_new_tokens,
        "Generate requested"
    );

    // Loading and decoding block; keep them off the async workers
    let services = state.services.clone();
    let output = tokio::task::spawn_blocking(move || services.run(&request))
        .await?
        .map_err(|e| {
            error!("{}", e);
            AppError::from(e)
        })?;

    Ok(Json(output))
}

pub async fn info(State(state): State<Arc<AppState>>) -> Result<Json<ModelInfo>, AppError> {
    let services = state.services.clone();
    let info = tokio::task::spawn_blocking(move || services.info()).await??;
    Ok(Json(info))
}
