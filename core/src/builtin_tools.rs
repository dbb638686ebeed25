// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! A minimal set of built-in tool handlers. These exist to exercise the
//! registry and policy gate end to end; they are not meant to be a complete
//! tool surface.

use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::tool::{Capability, Tool, ToolError, ToolHandler};

struct Calculator;

#[async_trait]
impl ToolHandler for Calculator {
    async fn call(&self, args: serde_json::Value) -> Result<serde_json::Value, ToolError> {
        let expr = args
            .get("expression")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolError::Handler("missing expression argument".into()))?;
        let result = eval_simple_arithmetic(expr)
            .ok_or_else(|| ToolError::Handler(format!("cannot evaluate expression: {expr}")))?;
        Ok(serde_json::json!({ "expression": expr, "result": result }))
    }
}

/// Evaluates `<number> <+|-|*|/> <number>` only. No precedence, no
/// parentheses: this is an exercise handler, not a calculator product.
fn eval_simple_arithmetic(expr: &str) -> Option<f64> {
    let expr = expr.trim();
    for op in ['+', '-', '*', '/'] {
        if let Some(idx) = expr.find(op) {
            if idx == 0 {
                continue;
            }
            let (lhs, rhs) = expr.split_at(idx);
            let lhs: f64 = lhs.trim().parse().ok()?;
            let rhs: f64 = rhs[1..].trim().parse().ok()?;
            return Some(match op {
                '+' => lhs + rhs,
                '-' => lhs - rhs,
                '*' => lhs * rhs,
                '/' => lhs / rhs,
                _ => unreachable!(),
            });
        }
    }
    expr.parse().ok()
}

struct FileSystem;

#[async_trait]
impl ToolHandler for FileSystem {
    async fn call(&self, args: serde_json::Value) -> Result<serde_json::Value, ToolError> {
        let action = args.get("action").and_then(|v| v.as_str()).unwrap_or("read");
        let path = args
            .get("path")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolError::Handler("missing path argument".into()))?;
        match action {
            "read" => {
                let contents = tokio::fs::read_to_string(path)
                    .await
                    .map_err(|e| ToolError::Handler(e.to_string()))?;
                Ok(serde_json::json!({ "path": path, "contents": contents }))
            }
            "write" => {
                let data = args.get("contents").and_then(|v| v.as_str()).unwrap_or("");
                tokio::fs::write(path, data)
                    .await
                    .map_err(|e| ToolError::Handler(e.to_string()))?;
                Ok(serde_json::json!({ "path": path, "bytes_written": data.len() }))
            }
            other => Err(ToolError::Handler(format!("unsupported action: {other}"))),
        }
    }
}

struct HttpClient {
    client: reqwest::Client,
}

#[async_trait]
impl ToolHandler for HttpClient {
    async fn call(&self, args: serde_json::Value) -> Result<serde_json::Value, ToolError> {
        let url = args
            .get("url")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolError::Handler("missing url argument".into()))?;
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ToolError::Handler(e.to_string()))?;
        let status = resp.status().as_u16();
        let body = resp.text().await.map_err(|e| ToolError::Handler(e.to_string()))?;
        Ok(serde_json::json!({ "status": status, "body": body }))
    }
}

pub fn calculator_tool() -> Tool {
    Tool::new(
        "calculator",
        "Evaluates a simple arithmetic expression",
        [],
        serde_json::json!({
            "type": "object",
            "properties": { "expression": { "type": "string" } },
            "required": ["expression"],
        }),
        Arc::new(Calculator),
    )
}

pub fn file_system_tool() -> Tool {
    Tool::new(
        "file_system",
        "Reads or writes a file under an allowed root",
        [Capability::File],
        serde_json::json!({
            "type": "object",
            "properties": {
                "action": { "type": "string", "enum": ["read", "write"] },
                "path": { "type": "string" },
                "contents": { "type": "string" },
            },
            "required": ["path"],
        }),
        Arc::new(FileSystem),
    )
}

pub fn http_client_tool() -> Tool {
    Tool::new(
        "http_client",
        "Issues a GET request to an allowed host",
        [Capability::Network],
        serde_json::json!({
            "type": "object",
            "properties": { "url": { "type": "string" } },
            "required": ["url"],
        }),
        Arc::new(HttpClient {
            client: reqwest::Client::new(),
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn calculator_adds_two_numbers() {
        let tool = calculator_tool();
        let out = tool
            .handler
            .call(serde_json::json!({"expression": "1+1"}))
            .await
            .unwrap();
        assert_eq!(out["result"], 2.0);
    }

    #[tokio::test]
    async fn calculator_rejects_missing_expression() {
        let tool = calculator_tool();
        let err = tool.handler.call(serde_json::json!({})).await.unwrap_err();
        assert!(matches!(err, ToolError::Handler(_)));
    }

    #[tokio::test]
    async fn file_system_round_trips_through_tempdir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        let tool = file_system_tool();
        tool.handler
            .call(serde_json::json!({"action": "write", "path": path, "contents": "hi"}))
            .await
            .unwrap();
        let out = tool
            .handler
            .call(serde_json::json!({"action": "read", "path": path}))
            .await
            .unwrap();
        assert_eq!(out["contents"], "hi");
    }
}
