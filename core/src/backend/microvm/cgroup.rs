// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! cgroup v2 resource confinement for a single VM process.

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::backend::microvm::config::CgroupConfig;

const CGROUP_ROOT: &str = "/sys/fs/cgroup";

#[derive(Debug, Error)]
pub enum CgroupError {
    #[error("cgroup v2 is not available: {0} does not exist")]
    NotV2(String),
    #[error("failed to create cgroup directory {0}: {1}")]
    CreateDir(String, std::io::Error),
    #[error("failed to write {0}: {1}")]
    Write(String, std::io::Error),
}

fn resolve_path(path: &str) -> PathBuf {
    let p = Path::new(path);
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        Path::new(CGROUP_ROOT).join(p)
    }
}

/// Creates the cgroup and writes its limits, skipping any unset field,
/// finally placing `pid` into `cgroup.procs`. Any step failing aborts the
/// whole spawn with that step's error — callers are expected to treat this
/// as fatal for the VM.
pub fn apply(config: &CgroupConfig, pid: u32) -> Result<PathBuf, CgroupError> {
    let controllers = Path::new(CGROUP_ROOT).join("cgroup.controllers");
    if !controllers.exists() {
        return Err(CgroupError::NotV2(controllers.display().to_string()));
    }

    let cgroup_dir = resolve_path(&config.path);
    std::fs::create_dir_all(&cgroup_dir)
        .map_err(|e| CgroupError::CreateDir(cgroup_dir.display().to_string(), e))?;

    if let Some(weight) = config.cpu_weight {
        write_file(&cgroup_dir.join("cpu.weight"), &weight.to_string())?;
    }
    if let Some(quota) = config.cpu_quota_us {
        write_file(
            &cgroup_dir.join("cpu.max"),
            &format!("{} {}", quota, config.cpu_period_us),
        )?;
    }
    if let Some(mem) = config.memory_max {
        write_file(&cgroup_dir.join("memory.max"), &mem.to_string())?;
    }
    if let Some(pids) = config.pids_max {
        write_file(&cgroup_dir.join("pids.max"), &pids.to_string())?;
    }
    write_file(&cgroup_dir.join("cgroup.procs"), &pid.to_string())?;

    Ok(cgroup_dir)
}

/// Best-effort removal on teardown; a missing directory is not an error.
pub fn remove(cgroup_dir: &Path) {
    if cgroup_dir.exists() {
        let _ = std::fs::remove_dir(cgroup_dir);
    }
}

fn write_file(path: &Path, contents: &str) -> Result<(), CgroupError> {
    std::fs::write(path, contents).map_err(|e| CgroupError::Write(path.display().to_string(), e))
}
