use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use super::support::{animal, create_app, vector_with_similarity, FakeEmbedder};
use crate::records::RecordStore;
use crate::web::router;

const QUERY: &[u8] = b"query photo";
const PHOTO: &[u8] = b"\xFF\xD8\xFF\xE0luna";

async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let body = serde_json::from_slice(&body).unwrap_or(Value::Null);
    (status, body)
}

fn post(uri: &str, body: impl Into<Body>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(body.into())
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test(flavor = "multi_thread")]
async fn test_search_without_image_is_bad_request() {
    let embedder = Arc::new(FakeEmbedder::new());
    let (app, _tmp) = create_app(embedder.clone());

    let (status, body) = send(router(app), post("/api/animals/search", "{}")).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("image"));
    assert_eq!(embedder.calls(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_search_with_invalid_json_is_bad_request() {
    let embedder = Arc::new(FakeEmbedder::new());
    let (app, _tmp) = create_app(embedder.clone());

    let (status, body) = send(router(app), post("/api/animals/search", "{not json")).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());
    assert_eq!(embedder.calls(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_search_returns_ranked_matches() {
    let embedder = Arc::new(FakeEmbedder::new().with(QUERY, vec![1.0, 0.0]));
    let (app, _tmp) = create_app(embedder);

    for (name, similarity) in [("Bolt", 0.5), ("Luna", 0.95), ("Rex", 0.9)] {
        let record = app.records.create(animal(name, None)).unwrap();
        app.records
            .set_image_vector(&record.id, vector_with_similarity(similarity))
            .unwrap();
    }

    let request = json!({"image": STANDARD.encode(QUERY)}).to_string();
    let (status, body) = send(router(app), post("/api/animals/search", request)).await;

    assert_eq!(status, StatusCode::OK);
    let names: Vec<&str> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["data"]["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["Luna", "Rex", "Bolt"]);
    assert!(body[0]["id"].is_string());
    assert!(body[0]["similarity"].is_number());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_search_with_empty_store_returns_empty_list() {
    let embedder = Arc::new(FakeEmbedder::new().with(QUERY, vec![1.0, 0.0]));
    let (app, _tmp) = create_app(embedder);

    let request = json!({"image": STANDARD.encode(QUERY)}).to_string();
    let (status, body) = send(router(app), post("/api/animals/search", request)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!([]));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_search_embedding_failure_is_internal_error() {
    let (app, _tmp) = create_app(Arc::new(FakeEmbedder::failing()));

    let request = json!({"image": STANDARD.encode(QUERY)}).to_string();
    let (status, body) = send(router(app), post("/api/animals/search", request)).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["error"].is_string());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_create_with_photo_generates_vector() {
    let embedder = Arc::new(FakeEmbedder::new().with(PHOTO, vec![0.6, 0.8]));
    let (app, _tmp) = create_app(embedder.clone());

    let request = json!({
        "name": "Luna",
        "species": "cat",
        "image_b64": STANDARD.encode(PHOTO),
    })
    .to_string();
    let (status, created) = send(router(app.clone()), post("/api/animals/create", request)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(created["name"], "Luna");
    assert!(created["photoRef"].as_str().unwrap().starts_with("animals/"));
    assert!(created.get("image_b64").is_none());

    let id = created["id"].as_str().unwrap();
    let (status, fetched) = send(router(app), get(&format!("/api/animals/{id}"))).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["imageVector"], json!([0.6, 0.8]));
    assert!(fetched["vectorGeneratedAt"].is_string());
    assert_eq!(embedder.calls(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_create_without_photo_has_no_vector() {
    let embedder = Arc::new(FakeEmbedder::new());
    let (app, _tmp) = create_app(embedder.clone());

    let request = json!({"name": "Rex"}).to_string();
    let (status, created) = send(router(app), post("/api/animals/create", request)).await;

    assert_eq!(status, StatusCode::OK);
    assert!(created.get("imageVector").map_or(true, Value::is_null));
    assert_eq!(embedder.calls(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_create_with_invalid_photo_is_bad_request() {
    let (app, _tmp) = create_app(Arc::new(FakeEmbedder::new()));

    let request = json!({"name": "Rex", "image_b64": "%%%"}).to_string();
    let (status, _) = send(router(app.clone()), post("/api/animals/create", request)).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(app.records.total().unwrap(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_create_with_reserved_fields_is_bad_request() {
    let (app, tmp) = create_app(Arc::new(FakeEmbedder::new()));

    for request in [
        json!({"name": "Rex", "imageVector": [1.0, 0.0]}),
        json!({"name": "Evil", "id": "x"}),
        json!({"name": "Old", "vectorGeneratedAt": "2024-01-01T00:00:00Z"}),
    ] {
        let (status, body) =
            send(router(app.clone()), post("/api/animals/create", request.to_string())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("reserved"));
    }

    let reloaded = crate::records::BackendJson::load(tmp.path().join("animals.json")).unwrap();
    assert_eq!(reloaded.total().unwrap(), 0);
    assert!(reloaded.scan_vectored().unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_get_unknown_animal_is_not_found() {
    let (app, _tmp) = create_app(Arc::new(FakeEmbedder::new()));

    let (status, body) = send(router(app), get("/api/animals/01HZZZZZZZZZZZZZZZZZZZZZZZ")).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].is_string());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_health_counts_records() {
    let (app, _tmp) = create_app(Arc::new(FakeEmbedder::new()));
    let record = app.records.create(animal("Rex", None)).unwrap();
    app.records.create(animal("Mia", None)).unwrap();
    app.records.set_image_vector(&record.id, vec![1.0]).unwrap();

    let (status, body) = send(router(app), get("/api/health")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"status": "ok", "records": 2, "vectored": 1}));
}
