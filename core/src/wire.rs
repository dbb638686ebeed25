//! Request/response records exchanged across every transport this crate
//! speaks: control-plane HTTP, the stdin/stdout line protocol, and the
//! vsock NDJSON link between the host caller and the guest worker. All of
//! them share these types so a frame can be decoded once and forwarded
//! without re-shaping.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::domain::policy::Policy;
use crate::error::SandboxError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    #[serde(default = "default_args")]
    pub args: serde_json::Value,
}

fn default_args() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Trace {
    #[serde(default)]
    pub run_id: Option<String>,
    #[serde(default)]
    pub step_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteRequest {
    #[serde(default)]
    pub sandbox_id: Option<String>,
    #[serde(default)]
    pub tool_call_id: Option<String>,
    pub tool: ToolCall,
    #[serde(default)]
    pub policy: Policy,
    #[serde(default)]
    pub trace: Trace,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Ok,
    Error,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub cpu_ms: u64,
    #[serde(default)]
    pub mem_mb: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteResponse {
    pub tool_call_id: Option<String>,
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<SandboxError>,
    #[serde(default)]
    pub exit_code: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
}

impl ExecuteResponse {
    pub fn ok(tool_call_id: Option<String>, result: serde_json::Value, usage: Usage) -> Self {
        Self {
            tool_call_id,
            status: Status::Ok,
            result: Some(result),
            error: None,
            exit_code: 0,
            usage: Some(usage),
            stderr: None,
        }
    }

    pub fn error(tool_call_id: Option<String>, error: SandboxError) -> Self {
        Self {
            tool_call_id,
            status: Status::Error,
            result: None,
            error: Some(error),
            exit_code: 1,
            usage: None,
            stderr: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSandboxRequest {
    #[serde(default)]
    pub sandbox_id: Option<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSandboxResponse {
    pub sandbox_id: String,
    pub status: Status,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DestroySandboxRequest {
    pub sandbox_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DestroySandboxResponse {
    pub status: Status,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// One line of the stdin/stdout alternate transport's input side.
/// Deliberately flatter than [`ExecuteRequest`]: `tool` names the tool
/// directly rather than nesting it under a `ToolCall`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineRequest {
    #[serde(default)]
    pub id: Option<String>,
    pub tool: String,
    #[serde(default = "default_args")]
    pub args: serde_json::Value,
    #[serde(default)]
    pub policy: Policy,
}

/// One line of the stdin/stdout alternate transport's output side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineResponse {
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<SandboxError>,
    pub exit_code: i32,
    pub duration: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn execute_request_round_trips_through_json() {
        let req = ExecuteRequest {
            sandbox_id: Some("sb-1".into()),
            tool_call_id: Some("call-1".into()),
            tool: ToolCall {
                name: "calculator".into(),
                args: serde_json::json!({"expression": "1+1"}),
            },
            policy: Policy::default(),
            trace: Trace::default(),
        };
        let encoded = serde_json::to_string(&req).unwrap();
        let decoded: ExecuteRequest = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded.tool.name, "calculator");
        assert_eq!(decoded.sandbox_id.as_deref(), Some("sb-1"));
    }

    #[test]
    fn execute_response_round_trips_through_json() {
        let resp = ExecuteResponse::ok(
            Some("call-1".into()),
            serde_json::json!({"result": 2}),
            Usage { cpu_ms: 4, mem_mb: 1 },
        );
        let encoded = serde_json::to_string(&resp).unwrap();
        let decoded: ExecuteResponse = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded.status, Status::Ok);
        assert_eq!(decoded.usage.unwrap().cpu_ms, 4);
    }

    #[test]
    fn line_request_round_trips_through_json() {
        let req = LineRequest {
            id: Some("req-1".into()),
            tool: "calculator".into(),
            args: serde_json::json!({"expression": "1+1"}),
            policy: Policy::default(),
        };
        let encoded = serde_json::to_string(&req).unwrap();
        let decoded: LineRequest = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded.tool, "calculator");
        assert_eq!(decoded.id.as_deref(), Some("req-1"));
    }

    #[test]
    fn error_response_omits_result() {
        let resp = ExecuteResponse::error(None, SandboxError::policy_denied("nope"));
        let v = serde_json::to_value(&resp).unwrap();
        assert!(v.get("result").is_none());
        assert_eq!(v["error"]["code"], "policy_denied");
    }
}
