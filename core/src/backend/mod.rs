// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! The backend interface and its two implementations.

pub mod local;
pub mod microvm;

use async_trait::async_trait;

use crate::wire::{
    CreateSandboxRequest, CreateSandboxResponse, DestroySandboxRequest, DestroySandboxResponse,
    ExecuteRequest, ExecuteResponse, HealthResponse,
};

/// Every backend implements this. `execute_tool` is total: internal failures
/// (crash, timeout, policy denial) are reported as a structured
/// `ExecuteResponse`, never as an `Err`. Only genuine transport-level
/// failures — the backend process itself being unreachable — may surface as
/// an `Err`, and callers should treat that as `error/internal`.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn create_sandbox(&self, req: CreateSandboxRequest) -> anyhow::Result<CreateSandboxResponse>;
    async fn execute_tool(&self, req: ExecuteRequest) -> ExecuteResponse;
    async fn destroy_sandbox(&self, req: DestroySandboxRequest) -> anyhow::Result<DestroySandboxResponse>;
    async fn health(&self) -> anyhow::Result<HealthResponse>;
}
