//! # JSON:API over axum
//!
//! Routes the four endpoint shapes to [`Api::handle`], enforces JSON:API
//! content negotiation and writes `application/vnd.api+json` bodies.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::{Body, Bytes},
    extract::{rejection::QueryRejection, Path, Query, State},
    http::{header, HeaderMap, HeaderValue, Method as HttpMethod, StatusCode},
    response::{IntoResponse, Response},
    routing::any,
    Router,
};
use serde_json::Value;
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::document::{DocumentError, MEDIA_TYPE};
use crate::engine::{Api, ApiError, ApiRequest, ApiResponse, Method, Route};
use crate::observability::Logger;
use crate::query::RawQuery;

use super::config::HttpConfig;

type ApiState = Arc<Api>;

/// HTTP front end for an [`Api`]
pub struct HttpServer {
    config: HttpConfig,
    router: Router,
}

impl HttpServer {
    pub fn new(api: Arc<Api>, config: HttpConfig) -> Self {
        let cors = cors_layer(&config.cors_origins);
        let router = router(api).layer(cors).layer(TraceLayer::new_for_http());
        Self { config, router }
    }

    /// Get the socket address
    pub fn socket_addr(&self) -> String {
        self.config.socket_addr()
    }

    /// Get the router (for testing)
    pub fn router(self) -> Router {
        self.router
    }

    /// Bind and serve until the process stops
    pub async fn start(self) -> Result<(), std::io::Error> {
        let addr: SocketAddr = self.config.socket_addr().parse().map_err(|e| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("invalid socket address '{}': {}", self.config.socket_addr(), e),
            )
        })?;

        let listener = TcpListener::bind(addr).await?;
        let local = listener.local_addr()?.to_string();
        Logger::info("SERVER_LISTENING", &[("address", local.as_str())]);
        axum::serve(listener, self.router).await
    }
}

/// Routes without middleware layers
pub fn router(api: Arc<Api>) -> Router {
    Router::new()
        .route("/:collection", any(collection_endpoint))
        .route("/:collection/:id", any(resource_endpoint))
        .route(
            "/:collection/:id/relationships/:relation",
            any(relationship_endpoint),
        )
        .route("/:collection/:id/:relation", any(related_endpoint))
        .with_state(api)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.is_empty() {
        return CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
    }
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(Any)
        .allow_headers(Any)
}

async fn collection_endpoint(
    State(api): State<ApiState>,
    method: HttpMethod,
    Path(collection): Path<String>,
    query: Result<Query<RawQuery>, QueryRejection>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    dispatch(&api, method, Route::collection(collection), query, &headers, &body).await
}

async fn resource_endpoint(
    State(api): State<ApiState>,
    method: HttpMethod,
    Path((collection, id)): Path<(String, String)>,
    query: Result<Query<RawQuery>, QueryRejection>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    dispatch(&api, method, Route::resource(collection, id), query, &headers, &body).await
}

async fn relationship_endpoint(
    State(api): State<ApiState>,
    method: HttpMethod,
    Path((collection, id, relation)): Path<(String, String, String)>,
    query: Result<Query<RawQuery>, QueryRejection>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let route = Route::relationship(collection, id, relation);
    dispatch(&api, method, route, query, &headers, &body).await
}

async fn related_endpoint(
    State(api): State<ApiState>,
    method: HttpMethod,
    Path((collection, id, relation)): Path<(String, String, String)>,
    query: Result<Query<RawQuery>, QueryRejection>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let route = Route::related(collection, id, relation);
    dispatch(&api, method, route, query, &headers, &body).await
}

async fn dispatch(
    api: &Api,
    method: HttpMethod,
    route: Route,
    query: Result<Query<RawQuery>, QueryRejection>,
    headers: &HeaderMap,
    body: &[u8],
) -> Response {
    let query = match decode_query(query) {
        Ok(query) => query,
        Err(err) => return err.into_response(),
    };
    match build_request(method, route, query, headers, body) {
        Ok(request) => into_response(api.handle(request).await),
        Err(err) => err.into_response(),
    }
}

/// Query string rejections become JSON:API error documents
fn decode_query(query: Result<Query<RawQuery>, QueryRejection>) -> Result<RawQuery, ApiError> {
    query
        .map(|Query(raw)| raw)
        .map_err(|rejection| ApiError::MalformedQuery(rejection.body_text()))
}

fn build_request(
    method: HttpMethod,
    route: Route,
    query: RawQuery,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<ApiRequest, ApiError> {
    let method = Method::parse(method.as_str()).ok_or_else(|| ApiError::MethodNotAllowed {
        method: method.to_string(),
    })?;
    negotiate(headers, !body.is_empty())?;

    let mut request = ApiRequest::new(method, route).with_query(query);
    if let Some(body) = parse_body(body)? {
        request = request.with_body(body);
    }
    Ok(request)
}

/// JSON:API media type rules for `Content-Type` and `Accept`
fn negotiate(headers: &HeaderMap, has_body: bool) -> Result<(), ApiError> {
    if has_body {
        if let Some(content_type) = headers.get(header::CONTENT_TYPE).and_then(|v| v.to_str().ok()) {
            let (essence, has_params) = media_type(content_type);
            if essence == MEDIA_TYPE && has_params {
                return Err(ApiError::UnsupportedMediaType);
            }
        }
    }

    let accepted: Vec<bool> = headers
        .get_all(header::ACCEPT)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(media_type)
        .filter(|(essence, _)| essence == MEDIA_TYPE)
        .map(|(_, has_params)| has_params)
        .collect();
    if !accepted.is_empty() && accepted.iter().all(|has_params| *has_params) {
        return Err(ApiError::NotAcceptable);
    }
    Ok(())
}

/// Lowercased `type/subtype` and whether parameters follow it
fn media_type(value: &str) -> (String, bool) {
    let mut parts = value.split(';');
    let essence = parts.next().unwrap_or_default().trim().to_ascii_lowercase();
    let has_params = parts.any(|p| !p.trim().is_empty());
    (essence, has_params)
}

fn parse_body(body: &[u8]) -> Result<Option<Value>, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    serde_json::from_slice(body)
        .map(Some)
        .map_err(|e| DocumentError::invalid("", format!("body is not valid JSON: {}", e)).into())
}

fn into_response(response: ApiResponse) -> Response {
    let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut builder = Response::builder().status(status);
    for (name, value) in &response.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    let built = match &response.document {
        Some(document) => builder
            .header(header::CONTENT_TYPE, MEDIA_TYPE)
            .body(Body::from(document.to_value().to_string())),
        None => builder.body(Body::empty()),
    };
    built.unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}
