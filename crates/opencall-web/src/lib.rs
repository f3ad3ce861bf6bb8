//! JSON trigger surface over the crawl orchestrator. No page rendering:
//! listing and directory reads plus the two admin triggers, each returning
//! the structured run report.

use std::sync::Arc;

use anyhow::Context;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use chrono::Utc;
use opencall_sync::{
    build_store_from_env, maybe_build_scheduler, CrawlConfig, CrawlOrchestrator,
};
use serde_json::json;
use tracing::{error, info};

pub const CRATE_NAME: &str = "opencall-web";

#[derive(Clone)]
pub struct AppState {
    orchestrator: Arc<CrawlOrchestrator>,
}

pub fn build_router(orchestrator: Arc<CrawlOrchestrator>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/opencalls", get(list_open_calls))
        .route("/directory", get(list_directory))
        .route("/admin/crawl", post(trigger_crawl))
        .route("/admin/email-sync", post(trigger_email_sync))
        .with_state(AppState { orchestrator })
}

fn server_error(action: &str, err: anyhow::Error) -> Response {
    error!(action, %err, "request failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": format!("{action} failed") })),
    )
        .into_response()
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn list_open_calls(State(state): State<AppState>) -> Response {
    match state.orchestrator.store().list_open_calls().await {
        Ok(records) => Json(records).into_response(),
        Err(err) => server_error("listing open calls", err.into()),
    }
}

async fn list_directory(State(state): State<AppState>) -> Response {
    match state.orchestrator.store().list_directory().await {
        Ok(entries) => Json(entries).into_response(),
        Err(err) => server_error("listing directory", err.into()),
    }
}

async fn trigger_crawl(State(state): State<AppState>) -> Response {
    match state.orchestrator.run().await {
        Ok(report) => Json(report).into_response(),
        Err(err) => server_error("crawl run", err),
    }
}

async fn trigger_email_sync(State(state): State<AppState>) -> Response {
    match state.orchestrator.synchronizer().sync(Utc::now()).await {
        Ok(outcome) => Json(outcome).into_response(),
        Err(err) => server_error("email directory sync", err),
    }
}

/// Binds the trigger surface and, when configured, the cron scheduler
/// sharing the same orchestrator.
pub async fn serve_from_env() -> anyhow::Result<()> {
    let config = CrawlConfig::from_env();
    let store = build_store_from_env(&config).await?;
    let bind = std::env::var("OPENCALL_BIND").unwrap_or_else(|_| "0.0.0.0:8080".to_string());

    let orchestrator = Arc::new(CrawlOrchestrator::new(config, store)?);
    let _scheduler = maybe_build_scheduler(Arc::clone(&orchestrator)).await?;

    let app = build_router(orchestrator);
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("binding {bind}"))?;
    info!(%bind, "trigger surface listening");
    axum::serve(listener, app).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use opencall_storage::{CallStore, MemoryStore};
    use tower::ServiceExt;

    fn test_router() -> Router {
        let store: Arc<dyn CallStore> = Arc::new(MemoryStore::new());
        // No fetchers: crawl runs exercise the pipeline without network.
        let orchestrator = Arc::new(
            CrawlOrchestrator::with_fetchers(CrawlConfig::default(), store, vec![]).unwrap(),
        );
        build_router(orchestrator)
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let response = test_router()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "ok");
    }

    #[tokio::test]
    async fn open_calls_and_directory_start_empty() {
        let app = test_router();
        for path in ["/opencalls", "/directory"] {
            let response = app
                .clone()
                .oneshot(Request::get(path).body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            assert_eq!(body_json(response).await, json!([]));
        }
    }

    #[tokio::test]
    async fn crawl_trigger_returns_structured_report() {
        let response = test_router()
            .oneshot(Request::post("/admin/crawl").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let report = body_json(response).await;
        assert_eq!(report["enabled"], true);
        assert_eq!(report["imported"], json!([]));
        assert!(report["email_directory"].is_object());
    }

    #[tokio::test]
    async fn email_sync_trigger_returns_outcome() {
        let response = test_router()
            .oneshot(Request::post("/admin/email-sync").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let outcome = body_json(response).await;
        assert_eq!(outcome["collected"], 0);
        assert_eq!(outcome["upserted"], 0);
    }
}
