use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::Request;
use serde_json::{json, Value};
use tower::ServiceExt;
use viralwatch_access::AccessCoordinator;
use viralwatch_core::{build_app_config, MemoryStore, WatchConfig};

use super::*;

const WATCHLIST: &str = "
keywords: [glass skin, snail mucin]
priority_keywords: [glass skin]
brands: [COSRX]
spam_patterns: [giveaway]
";

fn state() -> AppState {
    let watch = WatchConfig::from_yaml_str(WATCHLIST).expect("watchlist");
    let app_config = build_app_config(|key| match key {
        "VIRALWATCH_VIDEO_API_KEYS" => Ok("key-a,key-b".to_string()),
        _ => Err(std::env::VarError::NotPresent),
    })
    .expect("app config");
    let coordinator = Arc::new(AccessCoordinator::from_config(
        &watch,
        &app_config,
        Utc::now(),
    ));
    let notifier = Fanout(LogNotifier, WebhookNotifier::new(Vec::new(), 5).expect("notifier"));
    let pipeline = Pipeline::new(
        &watch,
        coordinator,
        AnyStore::Memory(MemoryStore::new()),
        notifier,
    )
    .expect("pipeline");
    AppState {
        pipeline: Arc::new(pipeline),
    }
}

fn open_app() -> Router {
    let auth = AuthState::from_raw("", true).expect("auth");
    build_app(state(), auth, default_rate_limit_state())
}

async fn body_json(response: axum::response::Response) -> Value {
    let body = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body bytes");
    serde_json::from_slice(&body).expect("json parse")
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).expect("request")
}

fn post_json(uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .expect("request")
}

#[test]
fn normalize_limit_applies_defaults_and_bounds() {
    assert_eq!(normalize_limit(None), 50);
    assert_eq!(normalize_limit(Some(0)), 1);
    assert_eq!(normalize_limit(Some(1_000)), 200);
    assert_eq!(normalize_limit(Some(25)), 25);
}

#[test]
fn api_error_validation_error_maps_to_bad_request() {
    let response = ApiError::new("req-1", "validation_error", "invalid input").into_response();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn health_reports_memory_store() {
    let response = open_app()
        .oneshot(
            Request::builder()
                .uri("/api/v1/health")
                .header("x-request-id", "req-42")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("x-request-id").map(|v| v.to_str().unwrap()),
        Some("req-42")
    );
    let json = body_json(response).await;
    assert_eq!(json["data"]["status"], "ok");
    assert_eq!(json["data"]["store"], "memory");
    assert_eq!(json["meta"]["request_id"], "req-42");
}

#[tokio::test]
async fn submitted_payloads_are_reported_per_item() {
    let body = json!({
        "platform": "video",
        "payloads": [
            {"id": "vid-1", "statistics": {"viewCount": "1200", "likeCount": "90"}, "snippet": {"title": "Glass skin in 5 steps"}},
            {"id": "vid-2", "statistics": {"viewCount": "50"}, "snippet": {"title": "GIVEAWAY glass skin"}},
            {"snippet": {"title": "no id"}}
        ]
    });
    let response = open_app()
        .oneshot(post_json("/api/v1/payloads", &body))
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    let data = &json["data"];
    assert_eq!(data["platform"], "video");
    assert_eq!(data["stats"]["collected"], 3);
    assert_eq!(data["stats"]["accepted"], 2);
    assert_eq!(data["stats"]["noise"], 1);
    assert_eq!(data["stats"]["rejected"], 1);
    assert_eq!(data["reports"][0]["status"], "accepted");
    assert_eq!(data["reports"][0]["noise"], false);
    assert_eq!(data["reports"][2]["status"], "rejected");
}

#[tokio::test]
async fn unknown_platform_is_a_validation_error() {
    let body = json!({"platform": "radio", "payload": {"id": "x"}});
    let response = open_app()
        .oneshot(post_json("/api/v1/payloads", &body))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["error"]["code"], "validation_error");
}

#[tokio::test]
async fn empty_submission_is_rejected() {
    let body = json!({"platform": "video"});
    let response = open_app()
        .oneshot(post_json("/api/v1/payloads", &body))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn quota_lists_masked_credentials() {
    let response = open_app()
        .oneshot(get("/api/v1/quota/video"))
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    let credentials = json["data"]["credentials"].as_array().expect("credentials");
    assert_eq!(credentials.len(), 2);
    assert_eq!(json["data"]["source"], "video");
    assert!(json["data"]["remaining"].as_u64().expect("remaining") > 0);
    assert!(!json.to_string().contains("key-a"));
}

#[tokio::test]
async fn quota_rejects_unknown_source() {
    let response = open_app()
        .oneshot(get("/api/v1/quota/podcast"))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn surge_evaluation_without_data_finds_nothing() {
    let response = open_app()
        .oneshot(post_json("/api/v1/surge/evaluate", &json!({})))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["data"]["surges"], json!([]));
    assert_eq!(json["data"]["alerts"], json!([]));
}

#[tokio::test]
async fn alerts_and_runs_start_empty() {
    let app = open_app();
    let alerts = app
        .clone()
        .oneshot(get("/api/v1/alerts?limit=10"))
        .await
        .expect("response");
    assert_eq!(alerts.status(), StatusCode::OK);
    assert_eq!(body_json(alerts).await["data"], json!([]));

    let runs = app
        .oneshot(get("/api/v1/collection-runs"))
        .await
        .expect("response");
    assert_eq!(runs.status(), StatusCode::OK);
    assert_eq!(body_json(runs).await["data"], json!([]));
}

#[tokio::test]
async fn protected_routes_require_bearer_token_when_enabled() {
    let auth = AuthState::from_raw("secret-token", false).expect("auth");
    let app = build_app(state(), auth, default_rate_limit_state());

    let denied = app
        .clone()
        .oneshot(get("/api/v1/alerts"))
        .await
        .expect("response");
    assert_eq!(denied.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(denied).await["error"]["code"], "unauthorized");

    let allowed = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/v1/alerts")
                .header(header::AUTHORIZATION, "Bearer secret-token")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(allowed.status(), StatusCode::OK);

    let health = app.oneshot(get("/api/v1/health")).await.expect("response");
    assert_eq!(health.status(), StatusCode::OK);
}

#[tokio::test]
async fn rate_limit_applies_to_protected_routes() {
    let auth = AuthState::from_raw("", true).expect("auth");
    let app = build_app(state(), auth, RateLimitState::new(1, Duration::from_secs(60)));

    let first = app
        .clone()
        .oneshot(get("/api/v1/alerts"))
        .await
        .expect("response");
    assert_eq!(first.status(), StatusCode::OK);

    let second = app.oneshot(get("/api/v1/alerts")).await.expect("response");
    assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
    let retry_after: u64 = second
        .headers()
        .get(header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
        .expect("retry-after header");
    assert!((1..=60).contains(&retry_after));
    assert_eq!(body_json(second).await["error"]["code"], "rate_limited");
}

#[tokio::test]
async fn payloads_settle_the_grant_they_were_fetched_with() {
    let app = open_app();
    let before = body_json(
        app.clone()
            .oneshot(get("/api/v1/quota/video"))
            .await
            .expect("response"),
    )
    .await["data"]["remaining"]
        .as_u64()
        .expect("remaining");

    let issued = app
        .clone()
        .oneshot(post_json("/api/v1/quota/video/grants", &json!({"cost": 7})))
        .await
        .expect("response");
    assert_eq!(issued.status(), StatusCode::OK);
    let grant = body_json(issued).await["data"].clone();
    assert_eq!(grant["cost"], 7);
    assert_eq!(grant["attempt"], 1);
    assert_eq!(grant["credential_index"], 0);
    assert!(!grant.to_string().contains("key-a"));
    let grant_id = grant["grant_id"].as_str().expect("grant id").to_string();

    let after = body_json(
        app.clone()
            .oneshot(get("/api/v1/quota/video"))
            .await
            .expect("response"),
    )
    .await["data"]["remaining"]
        .as_u64()
        .expect("remaining");
    assert_eq!(before - after, 7);

    let body = json!({
        "platform": "video",
        "grant_id": grant_id,
        "payload": {"id": "vid-9", "statistics": {"viewCount": "10"}, "snippet": {"title": "glass skin"}}
    });
    let submitted = app
        .clone()
        .oneshot(post_json("/api/v1/payloads", &body))
        .await
        .expect("response");
    assert_eq!(submitted.status(), StatusCode::OK);

    let resubmitted = app
        .oneshot(post_json("/api/v1/payloads", &body))
        .await
        .expect("response");
    assert_eq!(resubmitted.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn unknown_grant_id_is_not_found() {
    let body = json!({
        "platform": "video",
        "grant_id": uuid::Uuid::new_v4(),
        "payload": {"id": "vid-1", "snippet": {"title": "glass skin"}}
    });
    let response = open_app()
        .oneshot(post_json("/api/v1/payloads", &body))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["error"]["code"], "not_found");
}

#[tokio::test]
async fn grant_for_another_platform_is_rejected() {
    let app = open_app();
    let issued = app
        .clone()
        .oneshot(post_json("/api/v1/quota/video/grants", &json!({})))
        .await
        .expect("response");
    let grant_id = body_json(issued).await["data"]["grant_id"].clone();

    let body = json!({
        "platform": "marketplace",
        "grant_id": grant_id,
        "payload": {"asin": "B0TEST", "title": "glass skin essence"}
    });
    let response = app
        .oneshot(post_json("/api/v1/payloads", &body))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn rate_limited_outcome_asks_collector_to_reacquire() {
    let app = open_app();
    let issued = app
        .clone()
        .oneshot(post_json("/api/v1/quota/video/grants", &json!({})))
        .await
        .expect("response");
    let grant_id = body_json(issued).await["data"]["grant_id"]
        .as_str()
        .expect("grant id")
        .to_string();
    let uri = format!("/api/v1/grants/{grant_id}/outcome");

    let reported = app
        .clone()
        .oneshot(post_json(&uri, &json!({"outcome": "rate_limited"})))
        .await
        .expect("response");
    assert_eq!(reported.status(), StatusCode::OK);
    assert_eq!(body_json(reported).await["data"]["action"], "reacquire");

    let again = app
        .oneshot(post_json(&uri, &json!({"outcome": "success"})))
        .await
        .expect("response");
    assert_eq!(again.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn oversized_grant_cost_is_a_validation_error() {
    let response = open_app()
        .oneshot(post_json(
            "/api/v1/quota/video/grants",
            &json!({"cost": u64::MAX}),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
