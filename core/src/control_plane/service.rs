// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! The control-plane service: wraps one backend and the shared
//! tool registry, runs the policy evaluator ahead of dispatch, and records
//! an audit entry around every decision.

use std::sync::Arc;

use crate::backend::Backend;
use crate::control_plane::audit::{AuditDecision, AuditEntry, AuditSink, TracingAuditSink};
use crate::domain::policy::{self, Decision};
use crate::error::SandboxError;
use crate::registry::ToolRegistry;
use crate::wire::{
    CreateSandboxRequest, CreateSandboxResponse, DestroySandboxRequest, DestroySandboxResponse,
    ExecuteRequest, ExecuteResponse, HealthResponse, Status,
};

pub struct SandboxService {
    backend: Arc<dyn Backend>,
    registry: Arc<ToolRegistry>,
    auditor: Arc<dyn AuditSink>,
}

impl SandboxService {
    pub fn new(backend: Arc<dyn Backend>, registry: Arc<ToolRegistry>) -> Self {
        Self {
            backend,
            registry,
            auditor: Arc::new(TracingAuditSink),
        }
    }

    pub fn with_auditor(mut self, auditor: Arc<dyn AuditSink>) -> Self {
        self.auditor = auditor;
        self
    }

    pub async fn create_sandbox(
        &self,
        req: CreateSandboxRequest,
    ) -> anyhow::Result<CreateSandboxResponse> {
        self.backend.create_sandbox(req).await
    }

    pub async fn destroy_sandbox(
        &self,
        req: DestroySandboxRequest,
    ) -> anyhow::Result<DestroySandboxResponse> {
        self.backend.destroy_sandbox(req).await
    }

    pub async fn health(&self) -> anyhow::Result<HealthResponse> {
        self.backend.health().await
    }

    /// Evaluate before dispatch; a denial never reaches the backend. A
    /// backend call that somehow returns nothing usable is normalized to
    /// `error/internal` so the caller always sees a structured answer.
    pub async fn execute_tool(&self, req: ExecuteRequest) -> ExecuteResponse {
        let run_id = req.trace.run_id.clone();
        let tool_name = req.tool.name.clone();

        let Some(tool) = self.registry.get(&tool_name) else {
            return ExecuteResponse::error(
                req.tool_call_id,
                SandboxError::invalid_request("tool not found"),
            );
        };

        if let Decision::Deny(reason) = policy::evaluate(&req.policy, &tool, &req.tool.args) {
            self.auditor.record(AuditEntry {
                run_id,
                tool: tool_name,
                decision: AuditDecision::Deny,
                status: Status::Error,
                error_message: Some(reason.clone()),
            });
            return ExecuteResponse::error(req.tool_call_id, SandboxError::policy_denied(reason));
        }

        let response = self.backend.execute_tool(req).await;
        self.auditor.record(AuditEntry {
            run_id,
            tool: tool_name,
            decision: AuditDecision::Allow,
            status: response.status,
            error_message: response.error.as_ref().map(|e| e.message.clone()),
        });
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::local::LocalBackend;
    use crate::builtin_tools::calculator_tool;
    use crate::wire::{ToolCall, Trace};

    fn service() -> SandboxService {
        let registry = Arc::new(ToolRegistry::new());
        registry.register(calculator_tool()).unwrap();
        let backend_registry = ToolRegistry::new();
        backend_registry.register(calculator_tool()).unwrap();
        let backend: Arc<dyn Backend> = Arc::new(LocalBackend::new(backend_registry));
        SandboxService::new(backend, registry)
    }

    #[tokio::test]
    async fn denied_requests_never_reach_the_backend() {
        let svc = service();
        let mut policy = crate::domain::policy::Policy::default();
        policy.allowed_tools.insert("other".into());
        let resp = svc
            .execute_tool(ExecuteRequest {
                sandbox_id: None,
                tool_call_id: None,
                tool: ToolCall {
                    name: "calculator".into(),
                    args: serde_json::json!({"expression": "1+1"}),
                },
                policy,
                trace: Trace::default(),
            })
            .await;
        assert_eq!(resp.status, Status::Error);
        assert_eq!(resp.error.unwrap().code, crate::error::ErrorCode::PolicyDenied);
    }

    #[tokio::test]
    async fn unregistered_tool_is_invalid_request_before_evaluation() {
        let svc = service();
        let resp = svc
            .execute_tool(ExecuteRequest {
                sandbox_id: None,
                tool_call_id: None,
                tool: ToolCall {
                    name: "nonexistent".into(),
                    args: serde_json::json!({}),
                },
                policy: crate::domain::policy::Policy::default(),
                trace: Trace::default(),
            })
            .await;
        assert_eq!(resp.error.unwrap().code, crate::error::ErrorCode::InvalidRequest);
    }

    #[tokio::test]
    async fn allowed_request_executes_successfully() {
        let svc = service();
        let mut policy = crate::domain::policy::Policy::default();
        policy.allowed_tools.insert("calculator".into());
        let resp = svc
            .execute_tool(ExecuteRequest {
                sandbox_id: None,
                tool_call_id: None,
                tool: ToolCall {
                    name: "calculator".into(),
                    args: serde_json::json!({"expression": "2*3"}),
                },
                policy,
                trace: Trace::default(),
            })
            .await;
        assert_eq!(resp.status, Status::Ok);
        assert_eq!(resp.result.unwrap()["result"], 6.0);
    }
}
