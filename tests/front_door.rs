use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    response::Response,
    Router,
};
use serde_json::Value;
use tower::util::ServiceExt;
use vllm_model_relay::{
    backend::mock::{MockBackend, MockCompletion},
    build_app,
    config::RelayConfig,
    models::BackendEndpoint,
    registry::BackendRegistry,
    state::AppState,
};

fn text_endpoint() -> BackendEndpoint {
    BackendEndpoint::new("vllm_server", 8000)
}

fn sql_endpoint() -> BackendEndpoint {
    BackendEndpoint::new("vllm_server", 8001)
}

fn app_with(backend: Arc<MockBackend>) -> Router {
    let registry = BackendRegistry::new([
        ("yasserrmd/Text2SQL-1.5B", text_endpoint()),
        ("premai-io/prem-1B-SQL", sql_endpoint()),
    ])
    .expect("valid registry");
    build_app(AppState::new(&RelayConfig::new(registry), backend))
}

fn default_backend() -> Arc<MockBackend> {
    Arc::new(
        MockBackend::new()
            .with_endpoint(text_endpoint(), "/models/yasserrmd/Text2SQL-1.5B")
            .with_endpoint(sql_endpoint(), "/models/yasserrmd/Text2SQL-1.5B"),
    )
}

async fn post_json(app: Router, uri: &str, body: &str) -> Response {
    app.oneshot(
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_owned()))
            .expect("request build"),
    )
    .await
    .expect("request execution")
}

async fn json_body(response: Response) -> Value {
    let bytes = to_bytes(response.into_body(), 1024 * 1024)
        .await
        .expect("body should be readable");
    serde_json::from_slice(&bytes).expect("body should be JSON")
}

#[tokio::test]
async fn generate_returns_trimmed_text() {
    let backend = default_backend();
    backend.set_completion(
        &text_endpoint(),
        MockCompletion::Text(" SELECT name FROM employees;\n".to_owned()),
    );
    let app = app_with(backend);

    let response = post_json(
        app,
        "/v1/generate",
        r#"{"model":"yasserrmd/Text2SQL-1.5B","prompt":"List all employees","max_tokens":64}"#,
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["text"], "SELECT name FROM employees;");
    assert_eq!(body["model"], "yasserrmd/Text2SQL-1.5B");
}

#[tokio::test]
async fn unknown_model_is_a_bad_request() {
    let backend = default_backend();
    let app = app_with(backend.clone());

    let response = post_json(
        app,
        "/v1/generate",
        r#"{"model":"facebook/opt-125m","prompt":"hello"}"#,
    )
    .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert_eq!(body["error"]["type"], "unknown_model");
    assert!(body["error"]["message"]
        .as_str()
        .expect("message")
        .contains("premai-io/prem-1B-SQL"));
    assert_eq!(backend.network_calls(), 0);
}

#[tokio::test]
async fn blank_prompt_is_a_bad_request() {
    let response = post_json(
        app_with(default_backend()),
        "/v1/generate",
        r#"{"model":"yasserrmd/Text2SQL-1.5B","prompt":"   "}"#,
    )
    .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["error"]["type"], "invalid_request");
}

#[tokio::test]
async fn wrong_model_on_port_is_a_conflict() {
    let response = post_json(
        app_with(default_backend()),
        "/v1/generate",
        r#"{"model":"premai-io/prem-1B-SQL","prompt":"hello"}"#,
    )
    .await;

    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(json_body(response).await["error"]["type"], "model_mismatch");
}

#[tokio::test]
async fn backend_outages_are_bad_gateway() {
    let backend = default_backend();
    backend.take_down(&text_endpoint());

    let response = post_json(
        app_with(backend),
        "/v1/generate",
        r#"{"model":"yasserrmd/Text2SQL-1.5B","prompt":"hello"}"#,
    )
    .await;

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(json_body(response).await["error"]["type"], "unreachable");
}

#[tokio::test]
async fn models_endpoint_lists_registry() {
    let response = app_with(default_backend())
        .oneshot(
            Request::builder()
                .uri("/v1/models")
                .body(Body::empty())
                .expect("request build"),
        )
        .await
        .expect("request execution");

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    let models = body["models"].as_array().expect("models array");
    assert_eq!(models.len(), 2);
    assert_eq!(models[0]["id"], "premai-io/prem-1B-SQL");
    assert_eq!(models[0]["endpoint"], "vllm_server:8001");
}

#[tokio::test]
async fn load_test_reports_aggregate_stats() {
    let backend = default_backend();
    let response = post_json(
        app_with(backend.clone()),
        "/v1/load-test",
        r#"{"model":"yasserrmd/Text2SQL-1.5B","concurrency":3,"requests_per_caller":2}"#,
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["count"], 6);
    assert_eq!(body["success_rate"], 1.0);
    assert!(body.get("records").is_none());
    assert_eq!(backend.complete_calls(), 6);
}

#[tokio::test]
async fn load_test_rejects_out_of_range_parameters() {
    let response = post_json(
        app_with(default_backend()),
        "/v1/load-test",
        r#"{"model":"yasserrmd/Text2SQL-1.5B","concurrency":0,"requests_per_caller":2}"#,
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = post_json(
        app_with(default_backend()),
        "/v1/load-test",
        r#"{"model":"org/unknown","concurrency":2,"requests_per_caller":2}"#,
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn load_test_rejects_out_of_range_max_tokens() {
    for max_tokens in [0, 513] {
        let backend = default_backend();
        let body = serde_json::json!({
            "model": "yasserrmd/Text2SQL-1.5B",
            "concurrency": 2,
            "requests_per_caller": 2,
            "max_tokens": max_tokens,
        })
        .to_string();
        let response = post_json(app_with(backend.clone()), "/v1/load-test", &body).await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert_eq!(body["error"]["type"], "invalid_request");
        assert_eq!(backend.network_calls(), 0);
    }
}
