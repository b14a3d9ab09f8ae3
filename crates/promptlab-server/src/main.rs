mod dto;
mod error;
mod handlers;
mod page;
mod state;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::body::Body;
use axum::http::{Request, Response};
use axum::routing::{get, post};
use axum::Router;
use promptlab_core::{AppConfig, Credential, TOKEN_ENV};
use promptlab_services::Services;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .compact()
        .init();

    let config = AppConfig::from_env().context("invalid configuration")?;
    let credential = Credential::from_env(TOKEN_ENV)
        .with_context(|| format!("{} must be set (environment or .env)", TOKEN_ENV))?;

    let services = Arc::new(Services::new(&config, Some(credential)));

    // Start loading right away so the first visitor sees progress, not a cold start
    let loading = services.clone();
    tokio::task::spawn_blocking(move || {
        if let Err(e) = loading.load() {
            error!("{}", e);
        }
    });

    let app = router(Arc::new(AppState::new(services.clone())));

    let addr = format!("0.0.0.0:{}", config.server.port);
    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutting down, releasing models");
    tokio::task::spawn_blocking(move || services.shutdown()).await?;

    Ok(())
}

fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(|req: &Request<Body>| {
            tracing::info_span!(
                "request",
                method = %req.method(),
                uri = %req.uri(),
                version = ?req.version(),
            )
        })
        .on_response(|res: &Response<Body>, latency: Duration, _span: &tracing::Span| {
            info!(
                latency = %format!("{} ms", latency.as_millis()),
                status = %res.status().as_u16(),
                "finished processing request"
            );
        });

    let logged_routes = Router::new()
        .route("/", get(handlers::index))
        .route("/api/generate", post(handlers::generate::generate))
        .route("/api/info", get(handlers::generate::info))
        .layer(trace_layer);

    // Polled every second by the page; left out of request logging
    Router::new()
        .merge(logged_routes)
        .route("/api/status", get(handlers::status::status))
        .route("/health", get(handlers::health))
        .layer(cors)
        .with_state(state)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Could not listen for shutdown signal: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use promptlab_core::{Device, Profile, ProfileConfig};
    use promptlab_services::testing::{FakeBackend, FakeHub, VALID_TOKEN};
    use promptlab_services::{DeviceProbe, OllamaClient};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn app_with(profile: Profile, token: &str, backend: Arc<FakeBackend>) -> (Router, Arc<Services>) {
        let services = Arc::new(Services::with_parts(
            ProfileConfig::preset(profile),
            Arc::new(FakeHub::new()),
            backend,
            Some(Credential::new(token).unwrap()),
            DeviceProbe::fixed(Device::Cpu),
            OllamaClient::new("http://127.0.0.1:9"),
        ));
        (router(Arc::new(AppState::new(services.clone()))), services)
    }

    fn app(profile: Profile) -> Router {
        app_with(profile, VALID_TOKEN, Arc::new(FakeBackend::new())).0
    }

    async fn send(app: Router, req: Request<Body>) -> (StatusCode, Value) {
        let res = app.oneshot(req).await.unwrap();
        let status = res.status();
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    fn post_generate(body: Value) -> Request<Body> {
        Request::post("/api/generate")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn default_body() -> Value {
        json!({
            "prompt": promptlab_core::DEFAULT_PROMPT,
            "temperature": 1.0,
            "max_tokens": 128,
            "top_p": 0.9
        })
    }

    #[tokio::test]
    async fn test_health() {
        let (status, body) = send(
            app(Profile::Gguf),
            Request::get("/health").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_index_serves_page() {
        let res = app(Profile::Gguf)
            .oneshot(Request::get("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let html = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(html.contains("Generate"));
    }

    #[tokio::test]
    async fn test_generate_returns_result() {
        let (status, body) = send(app(Profile::Gguf), post_generate(default_body())).await;

        assert_eq!(status, StatusCode::OK);
        let text = body["result"]["text"].as_str().unwrap();
        assert!(!text.is_empty());
        assert!(body["result"]["tokens_generated"].as_u64().unwrap() <= 128);
    }

    #[tokio::test]
    async fn test_generate_in_compare_mode() {
        let (status, body) = send(app(Profile::LoraCompare), post_generate(default_body())).await;

        assert_eq!(status, StatusCode::OK);
        assert!(body["comparison"]["adapted"]["text"].is_string());
        assert!(body["comparison"]["base"]["text"].is_string());
        assert_ne!(
            body["comparison"]["adapted"]["model"],
            body["comparison"]["base"]["model"]
        );
    }

    #[tokio::test]
    async fn test_out_of_range_slider_is_rejected() {
        let mut body = default_body();
        body["temperature"] = json!(5.0);
        let (status, body) = send(app(Profile::Gguf), post_generate(body)).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["stage"], "request");
        assert!(body["error"].as_str().unwrap().contains("Temperature"));
    }

    #[tokio::test]
    async fn test_empty_prompt_is_rejected() {
        let mut body = default_body();
        body["prompt"] = json!("   ");
        let (status, body) = send(app(Profile::Gguf), post_generate(body)).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["stage"], "request");
    }

    #[tokio::test]
    async fn test_bad_credential_reports_load_stage() {
        let (app, services) = app_with(Profile::Gguf, "hf_revoked", Arc::new(FakeBackend::new()));
        let (status, body) = send(app.clone(), post_generate(default_body())).await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["stage"], "load");
        assert!(body["error"]
            .as_str()
            .unwrap()
            .starts_with("Model load failed:"));
        assert!(!services.status().unwrap().is_ready());

        let (_, status_body) = send(
            app,
            Request::get("/api/status").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status_body["status"]["state"], "failed");
    }

    #[tokio::test]
    async fn test_status_after_load() {
        let (app, services) = app_with(Profile::Gguf, VALID_TOKEN, Arc::new(FakeBackend::new()));

        let (_, before) = send(
            app.clone(),
            Request::get("/api/status").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(before["status"]["state"], "not_started");

        let loader = services.clone();
        tokio::task::spawn_blocking(move || loader.load())
            .await
            .unwrap()
            .unwrap();

        let (status, after) = send(
            app,
            Request::get("/api/status").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(after["status"]["state"], "ready");
        assert_eq!(after["message"], "Model loaded!");
        assert_eq!(after["device"], "CPU");
        assert_eq!(after["profile"], "gguf");
        assert_eq!(after["limits"]["max_tokens"]["default"], 128.0);
        assert_eq!(after["artifact"]["architecture"], "llama");
    }
}
