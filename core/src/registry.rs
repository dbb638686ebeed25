// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Name → Tool registry. Readers never block each other;
//! registration is the only write path and is serialized by `DashMap`'s
//! per-shard locking.

use dashmap::DashMap;
use thiserror::Error;

use crate::domain::tool::Tool;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("tool already registered: {0}")]
    Duplicate(String),
    #[error("invalid tool name")]
    InvalidName,
}

#[derive(Default)]
pub struct ToolRegistry {
    tools: DashMap<String, Tool>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, tool: Tool) -> Result<(), RegistryError> {
        if tool.name.is_empty() {
            return Err(RegistryError::InvalidName);
        }
        if self.tools.contains_key(&tool.name) {
            return Err(RegistryError::Duplicate(tool.name));
        }
        self.tools.insert(tool.name.clone(), tool);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Tool> {
        self.tools.get(name).map(|entry| entry.value().clone())
    }

    pub fn has(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn count(&self) -> usize {
        self.tools.len()
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.iter().map(|e| e.key().clone()).collect()
    }

    pub fn list(&self) -> Vec<Tool> {
        self.tools.iter().map(|e| e.value().clone()).collect()
    }

    pub fn filter(&self, predicate: impl Fn(&Tool) -> bool) -> Vec<Tool> {
        self.tools
            .iter()
            .filter(|e| predicate(e.value()))
            .map(|e| e.value().clone())
            .collect()
    }

    pub fn get_by_names(&self, names: &[String]) -> Vec<Tool> {
        names.iter().filter_map(|n| self.get(n)).collect()
    }
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

    fn tool(name: &str) -> Tool {
        Tool::new(name, "d", [], serde_json::json!({}), Arc::new(Noop))
    }

    #[test]
    fn register_then_get_round_trips() {
        let r = ToolRegistry::new();
        r.register(tool("calculator")).unwrap();
        assert!(r.has("calculator"));
        assert_eq!(r.get("calculator").unwrap().name, "calculator");
    }

    #[test]
    fn duplicate_registration_fails() {
        let r = ToolRegistry::new();
        r.register(tool("calculator")).unwrap();
        assert_eq!(
            r.register(tool("calculator")),
            Err(RegistryError::Duplicate("calculator".into()))
        );
    }

    #[test]
    fn empty_name_rejected() {
        let r = ToolRegistry::new();
        assert_eq!(r.register(tool("")), Err(RegistryError::InvalidName));
    }

    #[test]
    fn unknown_tool_returns_none() {
        let r = ToolRegistry::new();
        assert!(r.get("nope").is_none());
    }

    #[test]
    fn list_and_count_reflect_registrations() {
        let r = ToolRegistry::new();
        r.register(tool("a")).unwrap();
        r.register(tool("b")).unwrap();
        assert_eq!(r.count(), 2);
        assert_eq!(r.list().len(), 2);
    }
}
