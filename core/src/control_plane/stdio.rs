// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Stdin/stdout line protocol: one JSON `LineRequest` per line on
//! stdin, one JSON `LineResponse` per line on stdout. An alternate transport
//! to the HTTP control plane for invoking the sandbox as a short-lived
//! subprocess rather than a long-running service; goes through the same
//! [`SandboxService`] — policy evaluation and audit recording are identical
//! to the HTTP path.

use std::time::Instant;

use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use crate::control_plane::service::SandboxService;
use crate::error::SandboxError;
use crate::wire::{ExecuteRequest, LineRequest, LineResponse, ToolCall, Trace};

/// Reads `LineRequest`s from `input` until EOF, writing a `LineResponse` for
/// each to `output`. Returns once `input` is exhausted.
pub async fn run<R, W>(service: &SandboxService, input: R, mut output: W) -> std::io::Result<()>
where
    R: tokio::io::AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = BufReader::new(input).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let response = handle_line(service, &line).await;
        let mut encoded = serde_json::to_vec(&response).expect("LineResponse always serializes");
        encoded.push(b'\n');
        output.write_all(&encoded).await?;
        output.flush().await?;
    }
    Ok(())
}

async fn handle_line(service: &SandboxService, line: &str) -> LineResponse {
    let started = Instant::now();
    let request: LineRequest = match serde_json::from_str(line) {
        Ok(req) => req,
        Err(e) => {
            return LineResponse {
                id: None,
                result: None,
                error: Some(SandboxError::invalid_request(e.to_string())),
                exit_code: 1,
                duration: humantime::format_duration(started.elapsed()).to_string(),
            }
        }
    };

    let id = request.id.clone();
    let exec_req = ExecuteRequest {
        sandbox_id: None,
        tool_call_id: id.clone(),
        tool: ToolCall {
            name: request.tool,
            args: request.args,
        },
        policy: request.policy,
        trace: Trace::default(),
    };
    let response = service.execute_tool(exec_req).await;

    LineResponse {
        id,
        result: response.result,
        error: response.error,
        exit_code: response.exit_code,
        duration: humantime::format_duration(started.elapsed()).to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::local::LocalBackend;
    use crate::backend::Backend;
    use crate::builtin_tools::calculator_tool;
    use crate::registry::ToolRegistry;
    use std::sync::Arc;

    fn service() -> SandboxService {
        let registry = Arc::new(ToolRegistry::new());
        registry.register(calculator_tool()).unwrap();
        let backend_registry = ToolRegistry::new();
        backend_registry.register(calculator_tool()).unwrap();
        let backend: Arc<dyn Backend> = Arc::new(LocalBackend::new(backend_registry));
        SandboxService::new(backend, registry)
    }

    #[tokio::test]
    async fn allowed_request_writes_one_ok_response_line() {
        let svc = service();
        let input = b"{\"id\":\"1\",\"tool\":\"calculator\",\"args\":{\"expression\":\"1+1\"},\"policy\":{\"allowed_tools\":[\"calculator\"]}}\n".to_vec();
        let mut output = Vec::new();
        run(&svc, input.as_slice(), &mut output).await.unwrap();

        let lines: Vec<&str> = std::str::from_utf8(&output).unwrap().lines().collect();
        assert_eq!(lines.len(), 1);
        let resp: LineResponse = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(resp.id.as_deref(), Some("1"));
        assert_eq!(resp.exit_code, 0);
        assert_eq!(resp.result.unwrap()["result"], 2.0);
    }

    #[tokio::test]
    async fn denied_request_reports_policy_denied_without_touching_the_handler() {
        let svc = service();
        let input = b"{\"id\":\"2\",\"tool\":\"calculator\",\"args\":{\"expression\":\"1+1\"},\"policy\":{\"allowed_tools\":[\"other\"]}}\n".to_vec();
        let mut output = Vec::new();
        run(&svc, input.as_slice(), &mut output).await.unwrap();

        let resp: LineResponse = serde_json::from_slice(&output).unwrap();
        assert_eq!(resp.exit_code, 1);
        assert_eq!(resp.error.unwrap().code, crate::error::ErrorCode::PolicyDenied);
    }

    #[tokio::test]
    async fn malformed_line_is_reported_without_aborting_the_stream() {
        let svc = service();
        let input = b"not json\n{\"id\":\"3\",\"tool\":\"calculator\",\"args\":{\"expression\":\"2+2\"},\"policy\":{\"allowed_tools\":[\"calculator\"]}}\n".to_vec();
        let mut output = Vec::new();
        run(&svc, input.as_slice(), &mut output).await.unwrap();

        let lines: Vec<&str> = std::str::from_utf8(&output).unwrap().lines().collect();
        assert_eq!(lines.len(), 2);
        let first: LineResponse = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first.error.unwrap().code, crate::error::ErrorCode::InvalidRequest);
        let second: LineResponse = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second.result.unwrap()["result"], 4.0);
    }
}
