// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! The tool contract: a named handler with a declared capability set and a
//! JSON-Schema describing its arguments.

use std::collections::HashSet;
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A side effect a tool may perform. The policy evaluator gates on this set,
/// not on the tool's name, so a new tool automatically inherits the right
/// scrutiny as long as it declares itself honestly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Network,
    File,
    Unsafe,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Capability::Network => "network",
            Capability::File => "file",
            Capability::Unsafe => "unsafe",
        };
        f.write_str(s)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("{0}")]
    Handler(String),
}

/// A tool's executable side: raw JSON args in, raw JSON result or error out.
/// Handlers never see the policy; the registry and the evaluator are what
/// stand between an untrusted call and this trait.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, args: serde_json::Value) -> Result<serde_json::Value, ToolError>;
}

/// A registered tool: the handler plus its immutable metadata.
#[derive(Clone)]
pub struct Tool {
    pub name: String,
    pub description: String,
    pub capabilities: HashSet<Capability>,
    pub input_schema: serde_json::Value,
    pub handler: std::sync::Arc<dyn ToolHandler>,
}

impl fmt::Debug for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tool")
            .field("name", &self.name)
            .field("capabilities", &self.capabilities)
            .finish_non_exhaustive()
    }
}

impl Tool {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        capabilities: impl IntoIterator<Item = Capability>,
        input_schema: serde_json::Value,
        handler: std::sync::Arc<dyn ToolHandler>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            capabilities: capabilities.into_iter().collect(),
            input_schema,
            handler,
        }
    }

    pub fn has_capability(&self, cap: Capability) -> bool {
        self.capabilities.contains(&cap)
    }
}
