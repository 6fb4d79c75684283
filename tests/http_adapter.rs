//! HTTP Adapter Tests
//!
//! Drives the axum router in-process:
//! - Routes map to the right operations
//! - JSON:API media type negotiation (415, 406)
//! - Response headers: Content-Type, Location, Link, CORS

mod common;

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use apiary::document::MEDIA_TYPE;
use apiary::http::{router, HttpConfig, HttpServer};

use common::{setup_api, BASE_URL};

fn setup_router() -> Router {
    router(Arc::new(setup_api().api))
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn send_json(method: &str, uri: &str, content_type: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, content_type)
        .body(Body::from(body.to_string()))
        .unwrap()
}

// =============================================================================
// Routing
// =============================================================================

/// Collection GET returns a JSON:API document
#[tokio::test]
async fn test_get_collection() {
    let response = setup_router().oneshot(get("/people")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], MEDIA_TYPE);
    assert!(response.headers().contains_key(header::LINK));
    let body = body_json(response).await;
    assert_eq!(body["data"].as_array().unwrap().len(), 2);
}

/// Bracketed query parameters reach the engine decoded
#[tokio::test]
async fn test_query_parameters_decoded() {
    let filter = urlencoding::encode(r#"{"name":"name","op":"eq","val":"Bo"}"#).into_owned();
    let uri = format!("/people?filter={}&page%5Bsize%5D=5", filter);

    let response = setup_router().oneshot(get(&uri)).await.unwrap();

    let body = body_json(response).await;
    assert_eq!(body["data"][0]["attributes"]["name"], json!("Bo"));
    assert_eq!(body["meta"]["total"], json!(1));
}

/// Related and relationship routes are told apart
#[tokio::test]
async fn test_related_and_relationship_routes() {
    let app = setup_router();

    let related = app.clone().oneshot(get("/articles/1/author")).await.unwrap();
    let linkage = app
        .oneshot(get("/articles/1/relationships/author"))
        .await
        .unwrap();

    assert_eq!(body_json(related).await["data"]["attributes"]["name"], json!("Ann"));
    assert_eq!(
        body_json(linkage).await["data"],
        json!({"type": "people", "id": "1"})
    );
}

/// POST creates with 201 and Location
#[tokio::test]
async fn test_post_creates() {
    let request = send_json(
        "POST",
        "/people",
        MEDIA_TYPE,
        json!({"data": {"type": "people", "attributes": {"name": "Cy"}}}),
    );

    let response = setup_router().oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(
        response.headers()[header::LOCATION],
        format!("{}/people/3", BASE_URL).as_str()
    );
}

/// DELETE answers 204 with no body
#[tokio::test]
async fn test_delete_no_content() {
    let request = Request::builder()
        .method("DELETE")
        .uri("/comments/2")
        .body(Body::empty())
        .unwrap();

    let response = setup_router().oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert!(!response.headers().contains_key(header::CONTENT_TYPE));
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert!(bytes.is_empty());
}

/// Unsupported methods are 405 with an error document
#[tokio::test]
async fn test_method_not_allowed() {
    let request = Request::builder()
        .method("PUT")
        .uri("/people/1")
        .body(Body::empty())
        .unwrap();

    let response = setup_router().oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(body_json(response).await["errors"][0]["status"], json!("405"));
}

// =============================================================================
// Content Negotiation
// =============================================================================

/// Media type parameters on Content-Type are rejected
#[tokio::test]
async fn test_content_type_with_parameters_is_415() {
    let request = send_json(
        "POST",
        "/people",
        "application/vnd.api+json; charset=utf-8",
        json!({"data": {"type": "people", "attributes": {"name": "Cy"}}}),
    );

    let response = setup_router().oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
}

/// Accept listing only parameterized JSON:API types is rejected
#[tokio::test]
async fn test_accept_only_with_parameters_is_406() {
    let request = Request::builder()
        .uri("/people")
        .header(header::ACCEPT, "application/vnd.api+json; ext=bulk")
        .body(Body::empty())
        .unwrap();

    let response = setup_router().oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::NOT_ACCEPTABLE);
}

/// A plain JSON:API entry among parameterized ones is accepted
#[tokio::test]
async fn test_accept_with_plain_entry() {
    let request = Request::builder()
        .uri("/people")
        .header(
            header::ACCEPT,
            "application/vnd.api+json; ext=bulk, application/vnd.api+json",
        )
        .body(Body::empty())
        .unwrap();

    let response = setup_router().oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

/// Invalid JSON bodies are a 400 error document
#[tokio::test]
async fn test_invalid_json_body() {
    let request = Request::builder()
        .method("POST")
        .uri("/people")
        .header(header::CONTENT_TYPE, MEDIA_TYPE)
        .body(Body::from("{not json"))
        .unwrap();

    let response = setup_router().oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(response.headers()[header::CONTENT_TYPE], MEDIA_TYPE);
}

// =============================================================================
// Server Layers
// =============================================================================

/// With no configured origins any origin is allowed
#[tokio::test]
async fn test_cors_allows_any_origin_by_default() {
    let api = Arc::new(setup_api().api);
    let app = HttpServer::new(api, HttpConfig::default()).router();
    let request = Request::builder()
        .uri("/people")
        .header(header::ORIGIN, "http://elsewhere.test")
        .body(Body::empty())
        .unwrap();

    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
}
