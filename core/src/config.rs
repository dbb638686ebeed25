// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Process-level configuration tying the core library into a runnable
//! daemon: listen address, auth token, and the selected backend.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::backend::microvm::MicroVmConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeKind {
    Local,
    #[serde(rename = "microvm")]
    MicroVm,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    #[serde(default)]
    pub auth_token: Option<String>,
    #[serde(default = "default_runtime")]
    pub runtime: RuntimeKind,
    #[serde(default)]
    pub runtime_config_path: Option<PathBuf>,
    #[serde(default)]
    pub microvm: Option<MicroVmConfig>,
}

fn default_listen_addr() -> String {
    "127.0.0.1:8070".into()
}

fn default_runtime() -> RuntimeKind {
    RuntimeKind::Local
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            auth_token: None,
            runtime: default_runtime(),
            runtime_config_path: None,
            microvm: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("runtime is microvm but no microvm config was supplied")]
    MissingMicroVmConfig,
}

impl SandboxConfig {
    pub fn load(path: &std::path::Path) -> Result<Self, ConfigLoadError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigLoadError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;
        let config: SandboxConfig =
            serde_json::from_str(&contents).map_err(|e| ConfigLoadError::Parse {
                path: path.to_path_buf(),
                source: e,
            })?;
        if config.runtime == RuntimeKind::MicroVm && config.microvm.is_none() {
            return Err(ConfigLoadError::MissingMicroVmConfig);
        }
        Ok(config)
    }
}
