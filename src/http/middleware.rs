//! Middleware chain: recovery, access logging, CORS, content-type default.
//!
//! Chain order is outermost-first: Recovery(Logger(CORS(ContentType(
//! Capture(handler))))). Composition lives in `http::server`.

use std::any::Any;
use std::net::SocketAddr;
use std::time::Instant;

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::header::{
    ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN,
    ACCESS_CONTROL_MAX_AGE, CONTENT_TYPE,
};
use axum::http::{HeaderName, HeaderValue, Method, Request, Response as HttpResponse, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use http_body_util::Full;

/// CORS defaults applied to every response that does not already carry the
/// header (an upstream-provided value wins).
fn cors_defaults() -> [(HeaderName, HeaderValue); 4] {
    [
        (ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*")),
        (
            ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static("GET, POST, PUT, DELETE, OPTIONS, PATCH"),
        ),
        (
            ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static("Content-Type, Authorization, X-Requested-With"),
        ),
        (ACCESS_CONTROL_MAX_AGE, HeaderValue::from_static("86400")),
    ]
}

/// Access log: one line per request with method, path, status, duration,
/// and remote address.
pub async fn access_log(req: Request<Body>, next: Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let remote = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.to_string())
        .unwrap_or_else(|| "-".to_string());
    let start = Instant::now();

    let response = next.run(req).await;

    tracing::info!(
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        duration_ms = start.elapsed().as_millis() as u64,
        remote = %remote,
        "request completed"
    );
    response
}

/// CORS: answers OPTIONS preflight directly and fills in default headers on
/// every other response.
pub async fn cors(req: Request<Body>, next: Next) -> Response {
    if req.method() == Method::OPTIONS {
        let mut response = StatusCode::OK.into_response();
        for (name, value) in cors_defaults() {
            response.headers_mut().insert(name, value);
        }
        return response;
    }

    let mut response = next.run(req).await;
    for (name, value) in cors_defaults() {
        if !response.headers().contains_key(&name) {
            response.headers_mut().insert(name, value);
        }
    }
    response
}

/// Default Content-Type to application/json on body-bearing methods.
pub async fn default_content_type(mut req: Request<Body>, next: Next) -> Response {
    let body_bearing = matches!(*req.method(), Method::POST | Method::PUT | Method::PATCH);
    if body_bearing && !req.headers().contains_key(CONTENT_TYPE) {
        req.headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    }
    next.run(req).await
}

/// Turn a handler panic into a plain 500, used with `CatchPanicLayer`.
pub fn handle_panic(err: Box<dyn Any + Send + 'static>) -> HttpResponse<Full<axum::body::Bytes>> {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.as_str()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s
    } else {
        "unknown panic"
    };
    tracing::error!(panic = %detail, "handler panicked");

    HttpResponse::builder()
        .status(StatusCode::INTERNAL_SERVER_ERROR)
        .header(CONTENT_TYPE, HeaderValue::from_static("text/plain"))
        .body(Full::from("Internal Server Error"))
        .expect("static response")
}
