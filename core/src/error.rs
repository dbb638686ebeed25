use serde::{Deserialize, Serialize};

/// The closed error taxonomy that crosses every backend/control-plane boundary.
///
/// Internal layers raise their own `thiserror` enums with richer detail;
/// those get logged and then collapsed into one of these five codes before
/// they reach a caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InvalidRequest,
    PolicyDenied,
    ToolFailed,
    SandboxCrash,
    Internal,
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorCode::InvalidRequest => "invalid_request",
            ErrorCode::PolicyDenied => "policy_denied",
            ErrorCode::ToolFailed => "tool_failed",
            ErrorCode::SandboxCrash => "sandbox_crash",
            ErrorCode::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// The `{code, message}` pair carried on an `ExecuteResponse` when `status = error`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxError {
    pub code: ErrorCode,
    pub message: String,
}

impl SandboxError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidRequest, message)
    }

    pub fn policy_denied(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::PolicyDenied, message)
    }

    pub fn tool_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ToolFailed, message)
    }

    pub fn sandbox_crash(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::SandboxCrash, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, message)
    }
}

impl std::fmt::Display for SandboxError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for SandboxError {}
