// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! The per-request policy record and its evaluator.
//!
//! `evaluate` is deterministic and total: every `(policy, tool, args)` triple
//! maps to exactly one `Decision`. It is also pure — no I/O beyond the
//! symlink-aware path resolution in [`crate::domain::path_sanitizer`], which
//! only reads filesystem metadata, never writes.

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::path_sanitizer::{self, PathSanitizerError};
use crate::domain::tool::{Capability, Tool};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkPolicy {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub allowed_hosts: Vec<String>,
}

/// Governs one request. Immutable for the duration of the call; applied
/// before dispatch to either backend.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Policy {
    #[serde(default)]
    pub allowed_tools: HashSet<String>,
    #[serde(default)]
    pub allowed_capabilities: HashSet<Capability>,
    #[serde(default)]
    pub network: NetworkPolicy,
    #[serde(default)]
    pub allowed_paths: Vec<PathBuf>,
    #[serde(default)]
    pub workdir: Option<PathBuf>,
    #[serde(default, with = "humantime_serde::option")]
    pub timeout: Option<Duration>,
    #[serde(default)]
    pub memory_limit_mb: Option<u64>,
    /// Parsed and carried for forward compatibility; not enforced by any
    /// backend here. The pool's capacity is the sole admission control.
    #[serde(default)]
    pub max_concurrent: Option<u32>,
    #[serde(default)]
    pub env_whitelist: Vec<String>,
}

impl Policy {
    fn allowed_roots(&self) -> Vec<PathBuf> {
        let mut roots: Vec<PathBuf> = self.allowed_paths.clone();
        if let Some(wd) = &self.workdir {
            roots.push(wd.clone());
        }
        roots
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// `normalized_path` is set only for the `file_system` tool: the
    /// symlink-resolved, absolute path the evaluator actually checked
    /// containment against. Callers must substitute this back into the
    /// handler's `path` argument rather than re-passing the raw request
    /// string, otherwise a symlink swapped in after this decision and before
    /// the handler runs reopens the traversal this check exists to close.
    Allow { normalized_path: Option<PathBuf> },
    Deny(String),
}

impl Decision {
    pub fn is_allow(&self) -> bool {
        matches!(self, Decision::Allow { .. })
    }

    pub fn normalized_path(&self) -> Option<&PathBuf> {
        match self {
            Decision::Allow { normalized_path } => normalized_path.as_ref(),
            Decision::Deny(_) => None,
        }
    }
}

/// Six numbered steps, first matching denial wins, otherwise allow.
pub fn evaluate(policy: &Policy, tool: &Tool, args: &serde_json::Value) -> Decision {
    if !policy.allowed_tools.is_empty() && !policy.allowed_tools.contains(&tool.name) {
        return Decision::Deny("tool not allowed".into());
    }

    if !policy.allowed_capabilities.is_empty() {
        for cap in &tool.capabilities {
            if !policy.allowed_capabilities.contains(cap) {
                return Decision::Deny(format!("capability not allowed: {cap}"));
            }
        }
        if tool.capabilities.is_empty() {
            // An empty capability set can't satisfy a non-empty required set.
            return Decision::Deny("capability not allowed: none declared".into());
        }
    }

    if tool.has_capability(Capability::Network) && !policy.network.enabled {
        return Decision::Deny("network disabled".into());
    }

    let mut file_system_path = None;
    if tool.name == "file_system" {
        let Some(path_str) = args.get("path").and_then(|v| v.as_str()) else {
            return Decision::Deny("missing path argument".into());
        };
        let roots = policy.allowed_roots();
        if roots.is_empty() {
            return Decision::Deny("path not allowed".into());
        }
        let normalized = match path_sanitizer::normalize(path_str) {
            Ok(p) => p,
            Err(PathSanitizerError::Traversal(_)) => {
                return Decision::Deny("path traversal attempt".into())
            }
            Err(_) => return Decision::Deny("invalid path".into()),
        };
        let allowed = roots.iter().any(|root| {
            let normalized_root = match path_sanitizer::normalize_root(root) {
                Ok(r) => r,
                Err(_) => return false,
            };
            path_sanitizer::contains(&normalized_root, &normalized)
        });
        if !allowed {
            return Decision::Deny("path not allowed".into());
        }
        file_system_path = Some(normalized);
    }

    if tool.has_capability(Capability::Network) && !policy.network.allowed_hosts.is_empty() {
        let url_str = args.get("url").and_then(|v| v.as_str()).unwrap_or("");
        let host = url::Url::parse(url_str)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.to_string()))
            .filter(|h| !h.is_empty());
        let Some(host) = host else {
            return Decision::Deny("invalid url".into());
        };
        if !policy.network.allowed_hosts.iter().any(|allowed| allowed == &host) {
            return Decision::Deny("host not allowed".into());
        }
    }

    Decision::Allow {
        normalized_path: file_system_path,
    }
}

/// Rewrites `args.path` to `normalized_path` so the handler operates on the
/// already symlink-resolved path the evaluator just checked containment
/// against, rather than re-resolving the caller's original string (and
/// potentially following a symlink swapped in between the two checks).
/// A no-op when `normalized_path` is `None` (every tool but `file_system`).
pub fn apply_normalized_path(mut args: serde_json::Value, normalized_path: Option<&PathBuf>) -> serde_json::Value {
    if let Some(path) = normalized_path {
        if let Some(obj) = args.as_object_mut() {
            obj.insert("path".into(), serde_json::Value::String(path.to_string_lossy().into_owned()));
        }
    }
    args
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::tool::{Tool, ToolError, ToolHandler};
    use async_trait::async_trait;
    use std::sync::Arc;

    struct Noop;
    #[async_trait]
    impl ToolHandler for Noop {
        async fn call(&self, _args: serde_json::Value) -> Result<serde_json::Value, ToolError> {
            Ok(serde_json::json!({}))
        }
    }

    fn tool(name: &str, caps: &[Capability]) -> Tool {
        Tool::new(
            name,
            "test tool",
            caps.iter().copied(),
            serde_json::json!({}),
            Arc::new(Noop),
        )
    }

    #[test]
    fn denies_tool_not_in_allowlist() {
        let t = tool("calculator", &[]);
        let mut p = Policy::default();
        p.allowed_tools.insert("other".into());
        assert_eq!(
            evaluate(&p, &t, &serde_json::json!({})),
            Decision::Deny("tool not allowed".into())
        );
    }

    #[test]
    fn allows_with_empty_allowlists() {
        let t = tool("calculator", &[]);
        let p = Policy::default();
        assert!(evaluate(&p, &t, &serde_json::json!({})).is_allow());
    }

    #[test]
    fn denies_network_capability_when_disabled() {
        let t = tool("http_client", &[Capability::Network]);
        let p = Policy::default();
        assert_eq!(
            evaluate(&p, &t, &serde_json::json!({"url": "https://example.com"})),
            Decision::Deny("network disabled".into())
        );
    }

    #[test]
    fn denies_host_not_in_allowed_hosts() {
        let t = tool("http_client", &[Capability::Network]);
        let mut p = Policy::default();
        p.network.enabled = true;
        p.network.allowed_hosts = vec!["example.com".into()];
        let d = evaluate(&p, &t, &serde_json::json!({"url": "https://other.com"}));
        assert_eq!(d, Decision::Deny("host not allowed".into()));
    }

    #[test]
    fn allows_host_in_allowed_hosts() {
        let t = tool("http_client", &[Capability::Network]);
        let mut p = Policy::default();
        p.network.enabled = true;
        p.network.allowed_hosts = vec!["example.com".into()];
        let d = evaluate(&p, &t, &serde_json::json!({"url": "https://example.com/path"}));
        assert!(d.is_allow());
    }

    #[test]
    fn empty_capability_set_cannot_satisfy_nonempty_allowed_set() {
        let t = tool("mystery", &[]);
        let mut p = Policy::default();
        p.allowed_capabilities.insert(Capability::File);
        assert!(!evaluate(&p, &t, &serde_json::json!({})).is_allow());
    }

    #[test]
    fn file_system_denies_missing_path() {
        let t = tool("file_system", &[Capability::File]);
        let mut p = Policy::default();
        p.allowed_paths = vec![PathBuf::from("/tmp")];
        assert_eq!(
            evaluate(&p, &t, &serde_json::json!({})),
            Decision::Deny("missing path argument".into())
        );
    }

    #[test]
    fn file_system_denies_when_no_roots_configured() {
        let t = tool("file_system", &[Capability::File]);
        let p = Policy::default();
        assert_eq!(
            evaluate(&p, &t, &serde_json::json!({"path": "/tmp/x"})),
            Decision::Deny("path not allowed".into())
        );
    }

    #[test]
    fn file_system_allow_carries_the_normalized_path() {
        let t = tool("file_system", &[Capability::File]);
        let mut p = Policy::default();
        p.allowed_paths = vec![PathBuf::from("/tmp")];
        let d = evaluate(&p, &t, &serde_json::json!({"path": "/tmp/sub/../x"}));
        assert_eq!(d.normalized_path(), Some(&PathBuf::from("/tmp/x")));
    }

    #[test]
    fn non_file_system_allow_carries_no_normalized_path() {
        let t = tool("calculator", &[]);
        let d = evaluate(&Policy::default(), &t, &serde_json::json!({}));
        assert_eq!(d.normalized_path(), None);
    }

    #[test]
    fn apply_normalized_path_rewrites_the_path_argument() {
        let args = serde_json::json!({"action": "read", "path": "/tmp/sub/../x"});
        let rewritten = apply_normalized_path(args, Some(&PathBuf::from("/tmp/x")));
        assert_eq!(rewritten["path"], "/tmp/x");
        assert_eq!(rewritten["action"], "read");
    }

    #[test]
    fn apply_normalized_path_is_a_noop_when_none() {
        let args = serde_json::json!({"path": "/tmp/x"});
        let rewritten = apply_normalized_path(args.clone(), None);
        assert_eq!(rewritten, args);
    }
}
