// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! The in-process reference backend. No isolation beyond the
//! policy gate; useful for development and for tools that carry no real
//! blast radius.

use std::time::Instant;

use async_trait::async_trait;

use crate::backend::Backend;
use crate::domain::policy::{self, Decision};
use crate::error::SandboxError;
use crate::registry::ToolRegistry;
use crate::wire::{
    CreateSandboxRequest, CreateSandboxResponse, DestroySandboxRequest, DestroySandboxResponse,
    ExecuteRequest, ExecuteResponse, HealthResponse, Status, Usage,
};

pub struct LocalBackend {
    registry: ToolRegistry,
}

impl LocalBackend {
    pub fn new(registry: ToolRegistry) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl Backend for LocalBackend {
    async fn create_sandbox(
        &self,
        req: CreateSandboxRequest,
    ) -> anyhow::Result<CreateSandboxResponse> {
        let sandbox_id = req.sandbox_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        Ok(CreateSandboxResponse {
            sandbox_id,
            status: Status::Ok,
        })
    }

    async fn execute_tool(&self, req: ExecuteRequest) -> ExecuteResponse {
        let Some(tool) = self.registry.get(&req.tool.name) else {
            return ExecuteResponse::error(
                req.tool_call_id,
                SandboxError::invalid_request("tool not found"),
            );
        };

        let decision = policy::evaluate(&req.policy, &tool, &req.tool.args);
        if let Decision::Deny(reason) = decision {
            return ExecuteResponse::error(req.tool_call_id, SandboxError::policy_denied(reason));
        }
        let args = policy::apply_normalized_path(req.tool.args, decision.normalized_path());

        let start = Instant::now();
        let call = tool.handler.call(args);
        let outcome = match req.policy.timeout {
            Some(timeout) if !timeout.is_zero() => tokio::time::timeout(timeout, call).await,
            _ => Ok(call.await),
        };

        let elapsed_ms = start.elapsed().as_millis() as u64;
        match outcome {
            Err(_elapsed) => ExecuteResponse::error(
                req.tool_call_id,
                SandboxError::tool_failed("deadline exceeded"),
            ),
            Ok(Err(handler_err)) => {
                ExecuteResponse::error(req.tool_call_id, SandboxError::tool_failed(handler_err.to_string()))
            }
            Ok(Ok(result)) => ExecuteResponse::ok(
                req.tool_call_id,
                result,
                Usage {
                    cpu_ms: elapsed_ms,
                    mem_mb: 0,
                },
            ),
        }
    }

    async fn destroy_sandbox(
        &self,
        _req: DestroySandboxRequest,
    ) -> anyhow::Result<DestroySandboxResponse> {
        // The local backend is stateless per call; there is nothing to tear
        // down, so destroy is trivially idempotent.
        Ok(DestroySandboxResponse { status: Status::Ok })
    }

    async fn health(&self) -> anyhow::Result<HealthResponse> {
        Ok(HealthResponse {
            status: "ok".into(),
            version: env!("CARGO_PKG_VERSION").into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtin_tools::calculator_tool;
    use crate::domain::policy::Policy;
    use crate::wire::{ToolCall, Trace};

    fn backend() -> LocalBackend {
        let registry = ToolRegistry::new();
        registry.register(calculator_tool()).unwrap();
        LocalBackend::new(registry)
    }

    fn request(tool: &str, args: serde_json::Value, policy: Policy) -> ExecuteRequest {
        ExecuteRequest {
            sandbox_id: None,
            tool_call_id: Some("call-1".into()),
            tool: ToolCall {
                name: tool.into(),
                args,
            },
            policy,
            trace: Trace::default(),
        }
    }

    #[tokio::test]
    async fn s1_calculator_executes_successfully() {
        let backend = backend();
        let mut policy = Policy::default();
        policy.allowed_tools.insert("calculator".into());
        let resp = backend
            .execute_tool(request(
                "calculator",
                serde_json::json!({"expression": "1+1"}),
                policy,
            ))
            .await;
        assert_eq!(resp.status, Status::Ok);
        assert_eq!(resp.result.unwrap()["result"], 2.0);
    }

    #[tokio::test]
    async fn unknown_tool_is_invalid_request() {
        let backend = backend();
        let resp = backend
            .execute_tool(request("nope", serde_json::json!({}), Policy::default()))
            .await;
        assert_eq!(resp.status, Status::Error);
        assert_eq!(resp.error.unwrap().code, crate::error::ErrorCode::InvalidRequest);
    }

    #[tokio::test]
    async fn policy_denial_never_invokes_handler() {
        let backend = backend();
        let mut policy = Policy::default();
        policy.allowed_tools.insert("other_tool".into());
        let resp = backend
            .execute_tool(request(
                "calculator",
                serde_json::json!({"expression": "1+1"}),
                policy,
            ))
            .await;
        assert_eq!(resp.status, Status::Error);
        assert_eq!(resp.error.unwrap().code, crate::error::ErrorCode::PolicyDenied);
    }

    #[tokio::test]
    async fn destroy_sandbox_is_idempotent() {
        let backend = backend();
        let first = backend
            .destroy_sandbox(DestroySandboxRequest {
                sandbox_id: "sb-1".into(),
            })
            .await
            .unwrap();
        let second = backend
            .destroy_sandbox(DestroySandboxRequest {
                sandbox_id: "sb-1".into(),
            })
            .await
            .unwrap();
        assert_eq!(first.status, Status::Ok);
        assert_eq!(second.status, Status::Ok);
    }
}
