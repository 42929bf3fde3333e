//! HTTP surface of the broker.
//!
//! One public endpoint takes job requests; a small admin surface inspects
//! and clears the queue behind an exact-match token header.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::admission::AdmissionGate;
use crate::config::Config;
use crate::error::BrokerError;
use crate::job::{JobRequest, Product, QueuedJob};
use crate::orchestrator::Orchestrator;
use crate::queue::{QueueStore, enqueue_deduped};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub orchestrator: Arc<Orchestrator>,
    pub gate: Arc<AdmissionGate>,
    pub queue: Arc<dyn QueueStore>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", post(submit_job))
        .route("/__info", get(info))
        .route("/admin/queue", get(admin_queue))
        .route("/admin/queue/clear", post(admin_clear))
        .with_state(state)
}

async fn submit_job(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(job): Json<JobRequest>,
) -> (StatusCode, Json<Value>) {
    // Reject unknown products before the gate is even consulted.
    if let Err(e) = Product::parse(&job.product) {
        return error_response(e);
    }

    if state.gate.is_available().await {
        return match state.orchestrator.run(&job).await {
            Ok(outcome) => (
                StatusCode::OK,
                Json(json!({
                    "status": "ok",
                    "uri": outcome.uri,
                    "dseq": outcome.dseq,
                    "dry_run": outcome.dry_run,
                })),
            ),
            Err(e) => error_response(e),
        };
    }

    if !state.config.queue.enabled {
        return (
            StatusCode::CONFLICT,
            Json(json!({ "status": "busy", "message": "GPU busy" })),
        );
    }

    let key = headers
        .get("idempotency-key")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    match enqueue_deduped(state.queue.as_ref(), QueuedJob::new(job, key)).await {
        Ok(position) => (
            StatusCode::OK,
            Json(json!({ "status": "queued", "position": position })),
        ),
        Err(e) => {
            tracing::error!(error = %e, "failed to enqueue job");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "error", "error": "queue_unavailable" })),
            )
        }
    }
}

fn error_response(e: BrokerError) -> (StatusCode, Json<Value>) {
    match &e {
        BrokerError::InvalidProduct(product) => {
            tracing::debug!(product = %product, "rejected unknown product");
            (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": "invalid_product" })),
            )
        }
        BrokerError::Queue(_) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "error", "error": e.code() })),
        ),
        _ => {
            tracing::error!(error = %e, "job failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "status": "error", "error": e.code() })),
            )
        }
    }
}

async fn info(State(state): State<AppState>) -> Json<Value> {
    let queue_length = state.queue.len().await.unwrap_or(0);
    Json(json!({
        "dry_run": state.config.orchestrator.dry_run,
        "busy_check_disabled": state.config.probe.disabled,
        "queue_enabled": state.config.queue.enabled,
        "queue_durable": state.queue.durable(),
        "queue_length": queue_length,
        "products": Product::ALL.iter().map(|p| p.as_str()).collect::<Vec<_>>(),
    }))
}

#[derive(Deserialize)]
struct PeekParams {
    limit: Option<usize>,
}

// Read-only introspection; only the destructive clear is token-gated.
async fn admin_queue(
    State(state): State<AppState>,
    Query(params): Query<PeekParams>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let jobs = state
        .queue
        .peek(params.limit.unwrap_or(20))
        .await
        .map_err(queue_unavailable)?;
    let length = state.queue.len().await.map_err(queue_unavailable)?;
    Ok(Json(json!({ "length": length, "jobs": jobs })))
}

async fn admin_clear(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    authorize(&state, &headers)?;
    state.queue.clear().await.map_err(queue_unavailable)?;
    tracing::info!("queue cleared by admin");
    Ok(Json(json!({ "status": "cleared" })))
}

/// Exact-match admin auth. A missing configured token denies everything;
/// there is no open-by-default admin surface.
fn authorize(state: &AppState, headers: &HeaderMap) -> Result<(), (StatusCode, Json<Value>)> {
    let presented = headers.get("x-admin-token").and_then(|v| v.to_str().ok());
    match (state.config.admin.token.as_deref(), presented) {
        (Some(expected), Some(given)) if expected == given => Ok(()),
        _ => Err((
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "unauthorized" })),
        )),
    }
}

fn queue_unavailable(e: crate::error::QueueError) -> (StatusCode, Json<Value>) {
    tracing::error!(error = %e, "queue backend unavailable");
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(json!({ "status": "error", "error": "queue_unavailable" })),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    use crate::config::{ProbeConfig, ProbePolicy};
    use crate::market::Marketplace;
    use crate::notify::Notifier;
    use crate::queue::MemoryQueue;
    use crate::teardown::{MemoryTeardownStore, TeardownScheduler, TeardownStore};
    use crate::testing::{FailingQueue, StubMarket, test_config};

    fn app(market: StubMarket, config: Config) -> (Router, Arc<MemoryQueue>) {
        let queue = Arc::new(MemoryQueue::new());
        let router = app_with_queue(market, config, queue.clone() as Arc<dyn QueueStore>);
        (router, queue)
    }

    fn app_with_queue(market: StubMarket, config: Config, queue: Arc<dyn QueueStore>) -> Router {
        let market = Arc::new(market);
        let config = Arc::new(config);
        let teardown = Arc::new(TeardownScheduler::new(
            Arc::new(MemoryTeardownStore::new()) as Arc<dyn TeardownStore>,
            market.clone() as Arc<dyn Marketplace>,
        ));
        let orchestrator = Arc::new(Orchestrator::new(
            config.clone(),
            market as Arc<dyn Marketplace>,
            Arc::new(Notifier::new(config.notify.clone())),
            teardown,
        ));
        let gate = Arc::new(AdmissionGate::new(config.probe.clone()));
        let state = AppState {
            config,
            orchestrator,
            gate,
            queue,
        };
        router(state)
    }

    fn busy_probe() -> ProbeConfig {
        // Closed port under fail-closed reads as busy.
        ProbeConfig {
            disabled: false,
            url: Some("http://127.0.0.1:1/status".to_string()),
            policy: ProbePolicy::FailClosed,
        }
    }

    fn post_job(body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn json_body(resp: axum::response::Response) -> Value {
        let body = axum::body::to_bytes(resp.into_body(), 16384).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn dry_run_request_succeeds() {
        let mut config = test_config();
        config.orchestrator.dry_run = true;
        let (router, _) = app(StubMarket::default(), config);

        let resp = router
            .oneshot(post_job(r#"{"product":"sd","minutes":30}"#))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let json = json_body(resp).await;
        assert_eq!(json["status"], "ok");
        assert_eq!(json["dry_run"], true);
        assert!(json["uri"].as_str().unwrap().contains("/sd-"));
    }

    #[tokio::test]
    async fn unknown_product_is_rejected() {
        let (router, _) = app(StubMarket::default(), test_config());

        let resp = router
            .oneshot(post_job(r#"{"product":"bitcoin-miner"}"#))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let json = json_body(resp).await;
        assert_eq!(json["error"], "invalid_product");
    }

    #[tokio::test]
    async fn busy_without_queue_returns_conflict() {
        let mut config = test_config();
        config.probe = busy_probe();
        let (router, _) = app(StubMarket::default(), config);

        let resp = router
            .oneshot(post_job(r#"{"product":"whisper"}"#))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CONFLICT);
        let json = json_body(resp).await;
        assert_eq!(json["status"], "busy");
        assert_eq!(json["message"], "GPU busy");
    }

    #[tokio::test]
    async fn busy_with_queue_enqueues() {
        let mut config = test_config();
        config.probe = busy_probe();
        config.queue.enabled = true;
        let (router, queue) = app(StubMarket::default(), config);

        let resp = router
            .clone()
            .oneshot(post_job(r#"{"product":"llama","minutes":15}"#))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let json = json_body(resp).await;
        assert_eq!(json["status"], "queued");
        assert_eq!(json["position"], 1);

        let resp = router
            .oneshot(post_job(r#"{"product":"sd"}"#))
            .await
            .unwrap();
        let json = json_body(resp).await;
        assert_eq!(json["position"], 2);
        assert_eq!(queue.len().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn idempotency_key_dedups_enqueue() {
        let mut config = test_config();
        config.probe = busy_probe();
        config.queue.enabled = true;
        let (router, queue) = app(StubMarket::default(), config);

        for _ in 0..2 {
            let req = Request::builder()
                .method("POST")
                .uri("/")
                .header("content-type", "application/json")
                .header("idempotency-key", "order-42")
                .body(Body::from(r#"{"product":"sd"}"#))
                .unwrap();
            let resp = router.clone().oneshot(req).await.unwrap();
            let json = json_body(resp).await;
            assert_eq!(json["status"], "queued");
            assert_eq!(json["position"], 1);
        }
        assert_eq!(queue.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn provisioning_failure_maps_to_error_code() {
        let (router, _) = app(StubMarket::no_leases(), test_config());

        let resp = router
            .oneshot(post_job(r#"{"product":"sd"}"#))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let json = json_body(resp).await;
        assert_eq!(json["status"], "error");
        assert_eq!(json["error"], "no_lease_from_provider");
    }

    #[tokio::test]
    async fn info_reports_flags_and_queue() {
        let mut config = test_config();
        config.orchestrator.dry_run = true;
        config.queue.enabled = true;
        let (router, queue) = app(StubMarket::default(), config);
        queue
            .enqueue(&QueuedJob::new(JobRequest::new("sd"), None))
            .await
            .unwrap();

        let req = Request::builder()
            .uri("/__info")
            .body(Body::empty())
            .unwrap();
        let resp = router.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let json = json_body(resp).await;
        assert_eq!(json["dry_run"], true);
        assert_eq!(json["queue_enabled"], true);
        assert_eq!(json["queue_durable"], false);
        assert_eq!(json["queue_length"], 1);
        assert_eq!(json["products"], json!(["whisper", "sd", "llama"]));
    }

    #[tokio::test]
    async fn clear_requires_configured_token() {
        // No token configured: even a presented header is denied.
        let (router, _) = app(StubMarket::default(), test_config());
        let req = Request::builder()
            .method("POST")
            .uri("/admin/queue/clear")
            .header("x-admin-token", "anything")
            .body(Body::empty())
            .unwrap();
        let resp = router.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn clear_rejects_wrong_or_missing_token() {
        let mut config = test_config();
        config.admin.token = Some("s3cret".to_string());
        let (router, queue) = app(StubMarket::default(), config);
        queue
            .enqueue(&QueuedJob::new(JobRequest::new("sd"), None))
            .await
            .unwrap();

        let req = Request::builder()
            .method("POST")
            .uri("/admin/queue/clear")
            .header("x-admin-token", "nope")
            .body(Body::empty())
            .unwrap();
        let resp = router.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let req = Request::builder()
            .method("POST")
            .uri("/admin/queue/clear")
            .body(Body::empty())
            .unwrap();
        let resp = router.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(queue.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn peek_is_open_and_clear_is_gated() {
        let mut config = test_config();
        config.admin.token = Some("s3cret".to_string());
        let (router, queue) = app(StubMarket::default(), config);
        queue
            .enqueue(&QueuedJob::new(JobRequest::new("llama"), None))
            .await
            .unwrap();

        // Peek needs no token.
        let req = Request::builder()
            .uri("/admin/queue?limit=5")
            .body(Body::empty())
            .unwrap();
        let resp = router.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let json = json_body(resp).await;
        assert_eq!(json["length"], 1);
        assert_eq!(json["jobs"][0]["product"], "llama");

        let req = Request::builder()
            .method("POST")
            .uri("/admin/queue/clear")
            .header("x-admin-token", "s3cret")
            .body(Body::empty())
            .unwrap();
        let resp = router.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(queue.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn unreachable_store_maps_enqueue_to_503() {
        let mut config = test_config();
        config.probe = busy_probe();
        config.queue.enabled = true;
        let router = app_with_queue(
            StubMarket::default(),
            config,
            Arc::new(FailingQueue) as Arc<dyn QueueStore>,
        );

        let resp = router
            .oneshot(post_job(r#"{"product":"sd"}"#))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
        let json = json_body(resp).await;
        assert_eq!(json["status"], "error");
        assert_eq!(json["error"], "queue_unavailable");
    }

    #[tokio::test]
    async fn unreachable_store_maps_peek_to_503() {
        let router = app_with_queue(
            StubMarket::default(),
            test_config(),
            Arc::new(FailingQueue) as Arc<dyn QueueStore>,
        );

        let req = Request::builder()
            .uri("/admin/queue")
            .body(Body::empty())
            .unwrap();
        let resp = router.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
        let json = json_body(resp).await;
        assert_eq!(json["error"], "queue_unavailable");
    }
}
