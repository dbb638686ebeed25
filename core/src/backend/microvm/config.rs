// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Static description of how to launch a microVM.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_BOOT_ARGS: &str = "console=ttyS0 reboot=k panic=1 pci=off";
pub const DEFAULT_CPU_PERIOD_US: u64 = 100_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VsockConfig {
    pub cid: u32,
    pub port: u32,
    /// Host-side UDS path; may contain an `{id}` placeholder.
    pub uds_path: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Tap device name; may contain an `{id}` placeholder.
    pub tap_device: String,
    #[serde(default)]
    pub allowed_cidrs: Vec<String>,
    #[serde(default)]
    pub mac: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CgroupConfig {
    /// Relative or absolute path under `/sys/fs/cgroup`; may contain `{id}`.
    pub path: String,
    #[serde(default)]
    pub cpu_weight: Option<u64>,
    #[serde(default)]
    pub cpu_quota_us: Option<u64>,
    #[serde(default = "default_cpu_period")]
    pub cpu_period_us: u64,
    #[serde(default)]
    pub memory_max: Option<u64>,
    #[serde(default)]
    pub pids_max: Option<u64>,
}

fn default_cpu_period() -> u64 {
    DEFAULT_CPU_PERIOD_US
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriveConfig {
    pub id: String,
    /// Host path; may contain an `{id}` placeholder.
    pub path_template: String,
    #[serde(default)]
    pub read_only: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolRunnerConfig {
    pub caller_binary: PathBuf,
    /// Argv template; entries may contain `{vsock_uds}` / `{api_socket}`.
    #[serde(default)]
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MicroVmConfig {
    pub hypervisor_binary: PathBuf,
    pub kernel_image: PathBuf,
    pub rootfs: PathBuf,
    #[serde(default = "default_boot_args")]
    pub boot_args: String,
    #[serde(default = "default_vcpu_count")]
    pub vcpu_count: u32,
    #[serde(default = "default_mem_size_mib")]
    pub mem_size_mib: u64,
    /// API socket path; may contain an `{id}` placeholder.
    pub api_socket: String,
    #[serde(default)]
    pub log_path: Option<String>,
    #[serde(default)]
    pub metrics_path: Option<String>,
    #[serde(default)]
    pub vsock: Option<VsockConfig>,
    #[serde(default)]
    pub network: Option<NetworkConfig>,
    #[serde(default)]
    pub cgroup: Option<CgroupConfig>,
    #[serde(default)]
    pub drives: Vec<DriveConfig>,
    pub tool_runner: ToolRunnerConfig,
    #[serde(default = "default_pool_capacity")]
    pub pool_capacity: usize,
}

fn default_boot_args() -> String {
    DEFAULT_BOOT_ARGS.into()
}
fn default_vcpu_count() -> u32 {
    1
}
fn default_mem_size_mib() -> u64 {
    512
}
fn default_pool_capacity() -> usize {
    1
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("hypervisor binary path is required")]
    MissingHypervisorBinary,
    #[error("kernel image path is required")]
    MissingKernelImage,
    #[error("rootfs path is required")]
    MissingRootfs,
    #[error("vsock is configured but cid/port/uds_path is unset")]
    IncompleteVsock,
    #[error("network is enabled but tap_device is unset")]
    MissingTapDevice,
    #[error("drive id must not be 'rootfs' and must be unique: {0}")]
    InvalidDriveId(String),
    #[error("with pool_capacity > 1, path template '{0}' must contain an '{{id}}' placeholder")]
    MissingIdPlaceholder(String),
}

impl MicroVmConfig {
    /// Run once per config, memoized by the backend via a `OnceCell`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.hypervisor_binary.as_os_str().is_empty() {
            return Err(ConfigError::MissingHypervisorBinary);
        }
        if self.kernel_image.as_os_str().is_empty() {
            return Err(ConfigError::MissingKernelImage);
        }
        if self.rootfs.as_os_str().is_empty() {
            return Err(ConfigError::MissingRootfs);
        }
        if let Some(vsock) = &self.vsock {
            if vsock.uds_path.is_empty() || vsock.port == 0 {
                return Err(ConfigError::IncompleteVsock);
            }
        }
        if let Some(net) = &self.network {
            if net.tap_device.is_empty() {
                return Err(ConfigError::MissingTapDevice);
            }
        }

        let mut seen_ids = std::collections::HashSet::new();
        for drive in &self.drives {
            if drive.id == "rootfs" || !seen_ids.insert(drive.id.clone()) {
                return Err(ConfigError::InvalidDriveId(drive.id.clone()));
            }
        }

        if self.pool_capacity > 1 {
            self.require_id_placeholder(&self.api_socket)?;
            if let Some(vsock) = &self.vsock {
                self.require_id_placeholder(&vsock.uds_path)?;
            }
            if let Some(net) = &self.network {
                self.require_id_placeholder(&net.tap_device)?;
            }
            for drive in &self.drives {
                if !drive.read_only {
                    self.require_id_placeholder(&drive.path_template)?;
                }
            }
        }

        Ok(())
    }

    fn require_id_placeholder(&self, template: &str) -> Result<(), ConfigError> {
        if template.contains("{id}") {
            Ok(())
        } else {
            Err(ConfigError::MissingIdPlaceholder(template.to_string()))
        }
    }
}

/// Expands every `{id}` placeholder in `template` with `id`.
pub fn expand_id(template: &str, id: &str) -> String {
    template.replace("{id}", id)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> MicroVmConfig {
        MicroVmConfig {
            hypervisor_binary: PathBuf::from("/usr/bin/firecracker"),
            kernel_image: PathBuf::from("/var/lib/aegis/vmlinux"),
            rootfs: PathBuf::from("/var/lib/aegis/rootfs.ext4"),
            boot_args: default_boot_args(),
            vcpu_count: 1,
            mem_size_mib: 512,
            api_socket: "/run/aegis/{id}/api.sock".into(),
            log_path: None,
            metrics_path: None,
            vsock: None,
            network: None,
            cgroup: None,
            drives: vec![],
            tool_runner: ToolRunnerConfig {
                caller_binary: PathBuf::from("/usr/bin/sandbox-vsock-caller"),
                args: vec![],
            },
            pool_capacity: 1,
        }
    }

    #[test]
    fn valid_single_capacity_config_passes() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn missing_hypervisor_binary_rejected() {
        let mut cfg = base_config();
        cfg.hypervisor_binary = PathBuf::new();
        assert_eq!(cfg.validate(), Err(ConfigError::MissingHypervisorBinary));
    }

    #[test]
    fn pool_capacity_above_one_requires_id_placeholder() {
        let mut cfg = base_config();
        cfg.pool_capacity = 2;
        cfg.api_socket = "/run/aegis/api.sock".into();
        assert!(matches!(cfg.validate(), Err(ConfigError::MissingIdPlaceholder(_))));
    }

    #[test]
    fn duplicate_drive_id_rejected() {
        let mut cfg = base_config();
        cfg.drives = vec![
            DriveConfig { id: "data".into(), path_template: "/d/{id}".into(), read_only: false },
            DriveConfig { id: "data".into(), path_template: "/d2/{id}".into(), read_only: false },
        ];
        cfg.pool_capacity = 2;
        assert!(matches!(cfg.validate(), Err(ConfigError::InvalidDriveId(_))));
    }

    #[test]
    fn drive_named_rootfs_rejected() {
        let mut cfg = base_config();
        cfg.drives = vec![DriveConfig { id: "rootfs".into(), path_template: "/d/{id}".into(), read_only: false }];
        assert!(matches!(cfg.validate(), Err(ConfigError::InvalidDriveId(_))));
    }

    #[test]
    fn expand_id_replaces_all_occurrences() {
        assert_eq!(expand_id("/run/{id}/a-{id}.sock", "vm1"), "/run/vm1/a-vm1.sock");
    }
}
