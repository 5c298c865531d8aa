use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use super::support::{self, create_app, png};
use crate::web;

async fn call(router: &axum::Router, method: &str, uri: &str, body: Value) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();

    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

#[tokio::test(flavor = "multi_thread")]
async fn test_upload_and_search() {
    let (app, paths, _tmp) = create_app(support::capabilities());
    let router = web::router(Arc::new(app), &paths.uploads_path);

    let (status, report) = call(
        &router,
        "POST",
        "/api/images/upload",
        json!({
            "files": [
                {"file_name": "a.png", "data_b64": STANDARD.encode(png(16, 16))},
                {"file_name": "b.gif", "data_b64": STANDARD.encode(b"GIF89a")},
            ],
            "labels": "Beach, sunset",
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["uploaded"].as_array().unwrap().len(), 1);
    assert_eq!(report["failed"][0]["file_name"], "b.gif");
    assert_eq!(report["uploaded"][0]["manual_labels"], json!(["beach", "sunset"]));

    let (status, page) = call(
        &router,
        "POST",
        "/api/images/search",
        json!({"query": "sunset beach", "threshold": 0.3}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["results"][0]["id"], 1);
    assert_eq!(page["images"][0]["file_name"], "a.png");
    assert_eq!(page["degraded"], false);

    let (status, page) = call(
        &router,
        "POST",
        "/api/images/search",
        json!({"query": "", "filters": {"camera_make": {"value": "Canon"}}}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["results"], json!([]));
    assert_eq!(page["total_candidates"], 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_error_statuses() {
    let (app, paths, _tmp) = create_app(support::capabilities());
    let router = web::router(Arc::new(app), &paths.uploads_path);

    let (status, body) = call(&router, "POST", "/api/images/get", json!({"id": 5})).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("not found"));

    let (status, _) = call(
        &router,
        "POST",
        "/api/images/search",
        json!({"query": "beach", "threshold": 2.0}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = call(
        &router,
        "POST",
        "/api/images/search",
        json!({"filters": {"iso": {"min": 800, "max": 100}}}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = call(
        &router,
        "POST",
        "/api/images/upload",
        json!({"files": [{"file_name": "a.png", "data_b64": "***"}]}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = call(&router, "POST", "/api/images/similar", json!({"id": 3})).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_manage_images() {
    let (app, paths, _tmp) = create_app(support::capabilities());
    let router = web::router(Arc::new(app), &paths.uploads_path);

    call(
        &router,
        "POST",
        "/api/images/upload",
        json!({"files": [{"file_name": "a.png", "data_b64": STANDARD.encode(png(8, 8))}]}),
    )
    .await;

    let (status, record) = call(
        &router,
        "POST",
        "/api/images/labels",
        json!({"id": 1, "append": ["Dog"]}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(record["manual_labels"], json!(["dog"]));

    let (status, list) = call(&router, "POST", "/api/images/list", json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list["total"], 1);

    let (status, stats) = call(&router, "POST", "/api/stats", json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stats["total_images"], 1);

    let (status, config) = call(&router, "GET", "/api/config", Value::Null).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(config["search"]["result_limit"], 100);

    let (status, _) = call(&router, "POST", "/api/images/delete", json!({"id": 1})).await;
    assert_eq!(status, StatusCode::OK);

    let (_, list) = call(&router, "POST", "/api/images/list", json!({})).await;
    assert_eq!(list["total"], 0);
}
