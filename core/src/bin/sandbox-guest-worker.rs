// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! In-guest NDJSON worker.
//!
//! Listens on a vsock stream socket bound to the port the host configured.
//! Per accepted connection: read one NDJSON request (capped at 1 MiB), look
//! the tool up in its own registry, re-run the policy evaluator — this
//! worker never trusts the host's prior evaluation — execute, and write
//! back exactly one NDJSON response line.

use std::sync::Arc;

use aegis_sandbox_core::builtin_tools::{calculator_tool, file_system_tool, http_client_tool};
use aegis_sandbox_core::domain::policy::{apply_normalized_path, evaluate, Decision};
use aegis_sandbox_core::error::SandboxError;
use aegis_sandbox_core::registry::ToolRegistry;
use aegis_sandbox_core::wire::{ExecuteRequest, ExecuteResponse, Usage};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_vsock::{VsockAddr, VsockListener, VMADDR_CID_ANY};
use tracing_subscriber::EnvFilter;

const MAX_REQUEST_BYTES: usize = 1024 * 1024;

fn build_registry() -> ToolRegistry {
    let registry = ToolRegistry::new();
    let _ = registry.register(calculator_tool());
    let _ = registry.register(file_system_tool());
    let _ = registry.register(http_client_tool());
    registry
}

async fn read_one_line(
    stream: &mut tokio_vsock::VsockStream,
) -> Result<Vec<u8>, SandboxError> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = stream
            .read(&mut chunk)
            .await
            .map_err(|e| SandboxError::internal(format!("read failed: {e}")))?;
        if n == 0 {
            if buf.is_empty() {
                return Err(SandboxError::invalid_request("connection closed before a request was sent"));
            }
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
        if buf.len() > MAX_REQUEST_BYTES {
            return Err(SandboxError::invalid_request("request too large"));
        }
        if buf.contains(&b'\n') {
            break;
        }
    }
    Ok(buf)
}

async fn handle_request(registry: &ToolRegistry, line: &[u8]) -> ExecuteResponse {
    let req: ExecuteRequest = match serde_json::from_slice(line) {
        Ok(req) => req,
        Err(e) => {
            return ExecuteResponse::error(None, SandboxError::invalid_request(e.to_string()))
        }
    };

    let tool_call_id = req.tool_call_id.clone();
    let Some(tool) = registry.get(&req.tool.name) else {
        return ExecuteResponse::error(
            tool_call_id,
            SandboxError::invalid_request(format!("unknown tool: {}", req.tool.name)),
        );
    };

    let decision = evaluate(&req.policy, &tool, &req.tool.args);
    if let Decision::Deny(reason) = decision {
        return ExecuteResponse::error(tool_call_id, SandboxError::policy_denied(reason));
    }
    let args = apply_normalized_path(req.tool.args.clone(), decision.normalized_path());

    let started = std::time::Instant::now();
    let call = tool.handler.call(args);
    let outcome = match req.policy.timeout.filter(|d| !d.is_zero()) {
        Some(timeout) => match tokio::time::timeout(timeout, call).await {
            Ok(result) => result,
            Err(_) => {
                return ExecuteResponse::error(tool_call_id, SandboxError::tool_failed("deadline"))
            }
        },
        None => call.await,
    };

    match outcome {
        Ok(result) => {
            let usage = Usage {
                cpu_ms: started.elapsed().as_millis() as u64,
                mem_mb: 0,
            };
            ExecuteResponse::ok(tool_call_id, result, usage)
        }
        Err(e) => ExecuteResponse::error(tool_call_id, SandboxError::tool_failed(e.to_string())),
    }
}

async fn serve(port: u32) -> std::io::Result<()> {
    let registry = Arc::new(build_registry());
    let listener = VsockListener::bind(VsockAddr::new(VMADDR_CID_ANY, port))?;
    tracing::info!(port, "guest worker listening on vsock");

    loop {
        let (mut stream, peer) = listener.accept().await?;
        let registry = Arc::clone(&registry);
        tokio::spawn(async move {
            let line = match read_one_line(&mut stream).await {
                Ok(line) => line,
                Err(err) => {
                    let resp = ExecuteResponse::error(None, err);
                    let _ = write_response(&mut stream, &resp).await;
                    return;
                }
            };
            let resp = handle_request(&registry, &line).await;
            if let Err(e) = write_response(&mut stream, &resp).await {
                tracing::warn!(?peer, error = %e, "failed to write response");
            }
        });
    }
}

async fn write_response(
    stream: &mut tokio_vsock::VsockStream,
    resp: &ExecuteResponse,
) -> std::io::Result<()> {
    let mut line = serde_json::to_vec(resp).expect("ExecuteResponse always serializes");
    line.push(b'\n');
    stream.write_all(&line).await
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let port: u32 = std::env::var("MAS_VSOCK_PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(5005);

    serve(port).await?;
    Ok(())
}
