// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Host-side invocation of the vsock caller binary. The
//! backend never talks vsock itself; it shells out to a small caller
//! process so that the vsock connection's lifetime is scoped to exactly one
//! request and a deadline can be enforced simply by killing the child.

use std::path::Path;
use std::time::Duration;

use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::backend::microvm::config::{MicroVmConfig, VsockConfig};
use crate::wire::ExecuteRequest;

#[derive(Debug, Error)]
pub enum CallerError {
    #[error("deadline exceeded")]
    Deadline,
    #[error("failed to spawn caller process: {0}")]
    Spawn(std::io::Error),
    #[error("caller process exited without producing a response line")]
    NoResponse,
    #[error("caller response was not valid JSON: {0}")]
    Decode(serde_json::Error),
}

/// Serializes `req` as one JSON line, invokes the configured caller binary
/// with its placeholders expanded, and parses the last non-empty stdout
/// line as the response. `timeout` of zero means unbounded.
pub async fn call(
    config: &MicroVmConfig,
    vsock: &VsockConfig,
    api_socket: &Path,
    vsock_uds: &Path,
    req: &ExecuteRequest,
    timeout: Duration,
) -> Result<crate::wire::ExecuteResponse, CallerError> {
    let mut line = serde_json::to_string(req).map_err(CallerError::Decode)?;
    line.push('\n');

    let args: Vec<String> = config
        .tool_runner
        .args
        .iter()
        .map(|a| {
            a.replace("{vsock_uds}", &vsock_uds.to_string_lossy())
                .replace("{api_socket}", &api_socket.to_string_lossy())
        })
        .collect();

    let mut command = Command::new(&config.tool_runner.caller_binary);
    command
        .args(&args)
        .env("MAS_VSOCK_UDS", vsock_uds)
        .env("MAS_VSOCK_CID", vsock.cid.to_string())
        .env("MAS_VSOCK_PORT", vsock.port.to_string())
        .env("MAS_FIRECRACKER_SOCKET", api_socket)
        .kill_on_drop(true)
        .stdin(std::process::Stdio::piped())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped());

    let mut child = command.spawn().map_err(CallerError::Spawn)?;

    if let Some(mut stdin) = child.stdin.take() {
        let _ = stdin.write_all(line.as_bytes()).await;
        let _ = stdin.shutdown().await;
    }

    let output = if timeout.is_zero() {
        child.wait_with_output().await.map_err(CallerError::Spawn)?
    } else {
        match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(CallerError::Spawn)?,
            Err(_) => {
                // The timed-out future owned `child`; dropping it here kills
                // the process (`kill_on_drop`) instead of leaking it.
                return Err(CallerError::Deadline);
            }
        }
    };

    let stdout = String::from_utf8_lossy(&output.stdout);
    let last_line = stdout
        .lines()
        .rev()
        .find(|l| !l.trim().is_empty())
        .ok_or(CallerError::NoResponse)?;

    serde_json::from_str(last_line).map_err(CallerError::Decode)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::microvm::config::ToolRunnerConfig;
    use crate::wire::{ToolCall, Trace};
    use std::path::PathBuf;

    fn request() -> ExecuteRequest {
        ExecuteRequest {
            sandbox_id: None,
            tool_call_id: Some("call-1".into()),
            tool: ToolCall {
                name: "calculator".into(),
                args: serde_json::json!({"expression": "1+1"}),
            },
            policy: Default::default(),
            trace: Trace::default(),
        }
    }

    fn echo_config() -> MicroVmConfig {
        MicroVmConfig {
            hypervisor_binary: PathBuf::new(),
            kernel_image: PathBuf::new(),
            rootfs: PathBuf::new(),
            boot_args: String::new(),
            vcpu_count: 1,
            mem_size_mib: 512,
            api_socket: "/tmp/api.sock".into(),
            log_path: None,
            metrics_path: None,
            vsock: None,
            network: None,
            cgroup: None,
            drives: vec![],
            tool_runner: ToolRunnerConfig {
                caller_binary: PathBuf::from("cat"),
                args: vec![],
            },
            pool_capacity: 1,
        }
    }

    #[tokio::test]
    async fn cat_echoing_the_request_is_rejected_as_an_invalid_response() {
        // `cat` is not a real vsock caller: it echoes the *request* line back
        // on stdout, which is not a valid `ExecuteResponse` (missing
        // `status`). This exercises the exact framing contract - one line in,
        // last non-empty line out, parsed as a response - without a real
        // guest worker.
        let vsock = VsockConfig { cid: 3, port: 5000, uds_path: "/tmp/vsock.sock".into() };
        let cfg = echo_config();
        let result = call(
            &cfg,
            &vsock,
            Path::new("/tmp/api.sock"),
            Path::new("/tmp/vsock.sock"),
            &request(),
            Duration::from_secs(2),
        )
        .await;
        assert!(matches!(result, Err(CallerError::Decode(_))));
    }

    #[tokio::test]
    async fn deadline_kills_a_slow_caller() {
        let vsock = VsockConfig { cid: 3, port: 5000, uds_path: "/tmp/vsock.sock".into() };
        let mut cfg = echo_config();
        cfg.tool_runner.caller_binary = PathBuf::from("sleep");
        cfg.tool_runner.args = vec!["5".into()];
        let result = call(
            &cfg,
            &vsock,
            Path::new("/tmp/api.sock"),
            Path::new("/tmp/vsock.sock"),
            &request(),
            Duration::from_millis(100),
        )
        .await;
        assert!(matches!(result, Err(CallerError::Deadline)));
    }
}
