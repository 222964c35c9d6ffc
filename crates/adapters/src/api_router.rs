//! `/api` routes.
//!
//! `GET /api` lists resolvable handlers; `/api/:name` and
//! `/api/:name/*subpath` dispatch to the named handler for GET, POST, PUT,
//! DELETE and PATCH.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, on, MethodFilter};
use axum::{Json, Router};
use devshim_protocol::{ApiListing, ShimError, StructuredResponse, DEFAULT_CONTENT_TYPE};
use devshim_runtime::{dispatch, HandlerRegistry, InboundRequest};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::error;

#[derive(Clone)]
struct AppState {
    registry: Arc<HandlerRegistry>,
    api_title: Arc<str>,
}

/// Build the `/api` router over a shared registry
pub fn api_router(registry: Arc<HandlerRegistry>, api_title: impl Into<String>) -> Router {
    let state = AppState {
        registry,
        api_title: Arc::from(api_title.into()),
    };

    let handler_methods = MethodFilter::GET
        .or(MethodFilter::POST)
        .or(MethodFilter::PUT)
        .or(MethodFilter::DELETE)
        .or(MethodFilter::PATCH);

    Router::new()
        .route("/api", get(list_functions))
        .route("/api/:name", on(handler_methods, invoke_handler))
        .route("/api/:name/*subpath", on(handler_methods, invoke_handler))
        .with_state(state)
}

async fn list_functions(State(state): State<AppState>) -> Json<ApiListing> {
    let registry = state.registry.clone();
    let functions = match tokio::task::spawn_blocking(move || registry.list()).await {
        Ok(functions) => functions,
        Err(e) => {
            error!(error = %e, "Handler listing task failed");
            Vec::new()
        }
    };

    Json(ApiListing::running(&*state.api_title, functions))
}

async fn invoke_handler(
    State(state): State<AppState>,
    Path(params): Path<HashMap<String, String>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let name = params.get("name").cloned().unwrap_or_default();
    let request = InboundRequest {
        method: method.as_str().to_string(),
        path: uri.path().to_string(),
        headers: header_map(&headers),
        body: body.to_vec(),
    };

    let registry = state.registry.clone();
    let response = tokio::task::spawn_blocking(move || dispatch(&registry, &name, request))
        .await
        .unwrap_or_else(|e| {
            error!(error = %e, "Dispatch task failed");
            StructuredResponse::from_error(&ShimError::execution(e))
        });

    into_http_response(response)
}

/// Flatten request headers; a repeated name keeps its last value.
fn header_map(headers: &HeaderMap) -> HashMap<String, String> {
    headers
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            )
        })
        .collect()
}

/// Convert a structured response into an HTTP response
pub fn into_http_response(response: StructuredResponse) -> Response {
    let status =
        StatusCode::from_u16(response.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let content_type = HeaderValue::from_str(response.content_type())
        .unwrap_or_else(|_| HeaderValue::from_static(DEFAULT_CONTENT_TYPE));

    (
        status,
        [(header::CONTENT_TYPE, content_type)],
        response.into_body(),
    )
        .into_response()
}
