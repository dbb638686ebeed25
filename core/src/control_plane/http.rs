// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Control-plane HTTP surface. Thin: every handler decodes,
//! delegates to [`SandboxService`], and encodes. The only real logic here is
//! bearer-token auth and the 1 MiB body cap.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use subtle::ConstantTimeEq;
use tower_http::limit::RequestBodyLimitLayer;

use crate::control_plane::service::SandboxService;
use crate::wire::{CreateSandboxRequest, DestroySandboxRequest, ExecuteRequest};

const MAX_BODY_BYTES: usize = 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<SandboxService>,
    pub auth_token: Option<Arc<str>>,
}

pub fn app(state: AppState) -> Router {
    let auth_state = state.clone();
    Router::new()
        .route("/v1/sandbox/health", get(health))
        .route("/v1/sandbox/create", post(create_sandbox))
        .route("/v1/sandbox/execute", post(execute_tool))
        .route("/v1/sandbox/destroy", post(destroy_sandbox))
        .layer(middleware::from_fn_with_state(auth_state, auth_layer))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(middleware::from_fn(reject_oversized_body_as_bad_request))
        .with_state(state)
}

/// `RequestBodyLimitLayer` answers an over-cap body with its own `413`
/// before any handler runs. Every other malformed-body case here is a `400`,
/// so fold this one in too rather than leaking a second error shape.
async fn reject_oversized_body_as_bad_request(request: axum::extract::Request, next: Next) -> Response {
    let response = next.run(request).await;
    if response.status() == StatusCode::PAYLOAD_TOO_LARGE {
        return (StatusCode::BAD_REQUEST, Json("request body exceeds maximum size")).into_response();
    }
    response
}

async fn auth_layer(
    State(state): State<AppState>,
    headers: HeaderMap,
    request: axum::extract::Request,
    next: Next,
) -> Response {
    let Some(expected) = &state.auth_token else {
        return next.run(request).await;
    };

    let provided = headers
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .or_else(|| headers.get("X-Sandbox-Token").and_then(|v| v.to_str().ok()));

    match provided {
        Some(token) if bool::from(token.as_bytes().ct_eq(expected.as_bytes())) => {
            next.run(request).await
        }
        _ => (StatusCode::UNAUTHORIZED, Json("unauthorized")).into_response(),
    }
}

async fn health(State(state): State<AppState>) -> Response {
    match state.service.health().await {
        Ok(resp) => Json(resp).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, Json(e.to_string())).into_response(),
    }
}

async fn create_sandbox(
    State(state): State<AppState>,
    body: Result<Json<CreateSandboxRequest>, axum::extract::rejection::JsonRejection>,
) -> Response {
    let Json(req) = match body {
        Ok(j) => j,
        Err(e) => return bad_request(e),
    };
    match state.service.create_sandbox(req).await {
        Ok(resp) => Json(resp).into_response(),
        Err(e) => internal_error(e),
    }
}

async fn execute_tool(
    State(state): State<AppState>,
    body: Result<Json<ExecuteRequest>, axum::extract::rejection::JsonRejection>,
) -> Response {
    let Json(req) = match body {
        Ok(j) => j,
        Err(e) => return bad_request(e),
    };
    // execute_tool is total: it never returns an Err, only a structured
    // ExecuteResponse, so the HTTP layer always answers 200 here.
    Json(state.service.execute_tool(req).await).into_response()
}

async fn destroy_sandbox(
    State(state): State<AppState>,
    body: Result<Json<DestroySandboxRequest>, axum::extract::rejection::JsonRejection>,
) -> Response {
    let Json(req) = match body {
        Ok(j) => j,
        Err(e) => return bad_request(e),
    };
    match state.service.destroy_sandbox(req).await {
        Ok(resp) => Json(resp).into_response(),
        Err(e) => internal_error(e),
    }
}

fn bad_request(e: axum::extract::rejection::JsonRejection) -> Response {
    (StatusCode::BAD_REQUEST, Json(e.to_string())).into_response()
}

fn internal_error(e: anyhow::Error) -> Response {
    (StatusCode::INTERNAL_SERVER_ERROR, Json(e.to_string())).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::local::LocalBackend;
    use crate::builtin_tools::calculator_tool;
    use crate::registry::ToolRegistry;
    use tower::ServiceExt;

    fn test_app(auth_token: Option<&str>) -> Router {
        let registry = Arc::new(ToolRegistry::new());
        registry.register(calculator_tool()).unwrap();
        let backend_registry = ToolRegistry::new();
        backend_registry.register(calculator_tool()).unwrap();
        let backend: Arc<dyn crate::backend::Backend> = Arc::new(LocalBackend::new(backend_registry));
        let service = Arc::new(SandboxService::new(backend, registry));
        app(AppState {
            service,
            auth_token: auth_token.map(Into::into),
        })
    }

    #[tokio::test]
    async fn health_returns_ok_status() {
        let app = test_app(None);
        let resp = app
            .oneshot(
                axum::http::Request::builder()
                    .uri("/v1/sandbox/health")
                    .body(axum::body::Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn s5_missing_auth_header_is_401() {
        let app = test_app(Some("secret-token"));
        let resp = app
            .oneshot(
                axum::http::Request::builder()
                    .method("POST")
                    .uri("/v1/sandbox/execute")
                    .header("content-type", "application/json")
                    .body(axum::body::Body::from("{}"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn correct_bearer_token_is_accepted() {
        let app = test_app(Some("secret-token"));
        let body = serde_json::json!({
            "tool": {"name": "calculator", "args": {"expression": "1+1"}},
            "policy": {"allowed_tools": ["calculator"]},
        });
        let resp = app
            .oneshot(
                axum::http::Request::builder()
                    .method("POST")
                    .uri("/v1/sandbox/execute")
                    .header("content-type", "application/json")
                    .header("Authorization", "Bearer secret-token")
                    .body(axum::body::Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }
}
