// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! The microVM backend: ties config validation, the pool,
//! hypervisor API client, cgroup/iptables enforcement, and the vsock caller
//! into one `Backend` implementation.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::OnceCell;
use uuid::Uuid;

use crate::backend::microvm::config::{expand_id, MicroVmConfig};
use crate::backend::microvm::pool::{Pool, PoolError, VmInstance};
use crate::backend::microvm::{cgroup, hypervisor_client::HypervisorClient, iptables, vsock_caller};
use crate::backend::Backend;
use crate::error::SandboxError;
use crate::wire::{
    CreateSandboxRequest, CreateSandboxResponse, DestroySandboxRequest, DestroySandboxResponse,
    ExecuteRequest, ExecuteResponse, HealthResponse, Status,
};

const SOCKET_READY_TIMEOUT: Duration = Duration::from_secs(5);

pub struct MicroVmBackend {
    config: MicroVmConfig,
    pool: OnceCell<Arc<Pool>>,
}

impl MicroVmBackend {
    pub fn new(config: MicroVmConfig) -> Self {
        Self {
            config,
            pool: OnceCell::new(),
        }
    }

    async fn pool(&self) -> Result<&Arc<Pool>, SandboxError> {
        self.pool
            .get_or_try_init(|| async {
                self.config
                    .validate()
                    .map_err(|e| SandboxError::internal(e.to_string()))?;
                let pool = Arc::new(Pool::new(self.config.pool_capacity));
                self.warm(&pool).await?;
                Ok::<_, SandboxError>(pool)
            })
            .await
    }

    /// Sequentially spawn every VM; if any spawn fails, tear down everything
    /// that did start and fail the whole warm.
    async fn warm(&self, pool: &Arc<Pool>) -> Result<(), SandboxError> {
        let mut spawned = Vec::new();
        for _ in 0..self.config.pool_capacity {
            let id = Uuid::new_v4().to_string();
            match self.spawn_vm(&id).await {
                Ok(vm) => spawned.push(vm),
                Err(e) => {
                    for vm in spawned {
                        teardown_vm(vm).await;
                    }
                    return Err(SandboxError::internal(format!("pool warm failed: {e}")));
                }
            }
        }
        for vm in spawned {
            pool.admit(vm)
                .await
                .map_err(|e| SandboxError::internal(e.to_string()))?;
        }
        pool.mark_warmed().await;
        Ok(())
    }

    /// Fresh workdir, template expansion, process launch, cgroup placement,
    /// socket readiness, then the ordered PUT sequence.
    async fn spawn_vm(&self, id: &str) -> anyhow::Result<VmInstance> {
        let workdir = std::env::temp_dir().join(format!("aegis-sandbox-{id}"));
        tokio::fs::create_dir_all(&workdir).await?;

        let api_socket = PathBuf::from(expand_id(&self.config.api_socket, id));
        let vsock_uds_path = self
            .config
            .vsock
            .as_ref()
            .map(|v| PathBuf::from(expand_id(&v.uds_path, id)));

        let mut command = tokio::process::Command::new(&self.config.hypervisor_binary);
        command.arg("--api-sock").arg(&api_socket);
        if let Some(log_path) = &self.config.log_path {
            command.arg("--log-path").arg(expand_id(log_path, id));
        }
        if let Some(metrics_path) = &self.config.metrics_path {
            command.arg("--metrics-path").arg(expand_id(metrics_path, id));
        }
        command
            .current_dir(&workdir)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null());

        let mut process = command.spawn()?;

        let mut cgroup_dir = None;
        if let Some(cgroup_cfg) = &self.config.cgroup {
            if let Some(pid) = process.id() {
                let mut resolved = cgroup_cfg.clone();
                resolved.path = expand_id(&cgroup_cfg.path, id);
                match cgroup::apply(&resolved, pid) {
                    Ok(dir) => cgroup_dir = Some(dir),
                    Err(e) => {
                        let _ = process.kill().await;
                        let _ = tokio::fs::remove_dir_all(&workdir).await;
                        return Err(e.into());
                    }
                }
            }
        }

        let mut net_rules = Vec::new();
        if let Some(net) = &self.config.network {
            let tap = expand_id(&net.tap_device, id);
            match iptables::install(&tap, &net.allowed_cidrs, id).await {
                Ok(rules) => net_rules = rules,
                Err(e) => {
                    let _ = process.kill().await;
                    if let Some(dir) = &cgroup_dir {
                        cgroup::remove(dir);
                    }
                    let _ = tokio::fs::remove_dir_all(&workdir).await;
                    return Err(e.into());
                }
            }
        }

        if let Err(e) = self
            .configure_via_hypervisor_api(&api_socket, id, vsock_uds_path.as_deref())
            .await
        {
            let _ = process.kill().await;
            let _ = iptables::teardown(&net_rules).await;
            if let Some(dir) = &cgroup_dir {
                cgroup::remove(dir);
            }
            let _ = tokio::fs::remove_dir_all(&workdir).await;
            return Err(e);
        }

        Ok(VmInstance {
            id: id.to_string(),
            sandbox_id: None,
            api_socket_path: api_socket,
            vsock_uds_path,
            workdir,
            cgroup_dir,
            net_rules,
            process,
        })
    }

    async fn configure_via_hypervisor_api(
        &self,
        api_socket: &PathBuf,
        id: &str,
        vsock_uds: Option<&std::path::Path>,
    ) -> anyhow::Result<()> {
        let client = HypervisorClient::new(api_socket.clone());
        client.wait_ready(SOCKET_READY_TIMEOUT).await?;

        client
            .put(
                "/machine-config",
                &serde_json::json!({
                    "vcpu_count": self.config.vcpu_count,
                    "mem_size_mib": self.config.mem_size_mib,
                }),
            )
            .await?;

        client
            .put(
                "/boot-source",
                &serde_json::json!({
                    "kernel_image_path": self.config.kernel_image,
                    "boot_args": self.config.boot_args,
                }),
            )
            .await?;

        client
            .put(
                "/drives/rootfs",
                &serde_json::json!({
                    "drive_id": "rootfs",
                    "path_on_host": self.config.rootfs,
                    "is_root_device": true,
                    "is_read_only": true,
                }),
            )
            .await?;

        for drive in &self.config.drives {
            client
                .put(
                    &format!("/drives/{}", drive.id),
                    &serde_json::json!({
                        "drive_id": drive.id,
                        "path_on_host": expand_id(&drive.path_template, id),
                        "is_root_device": false,
                        "is_read_only": drive.read_only,
                    }),
                )
                .await?;
        }

        if let Some(net) = &self.config.network {
            client
                .put(
                    "/network-interfaces/eth0",
                    &serde_json::json!({
                        "iface_id": "eth0",
                        "host_dev_name": expand_id(&net.tap_device, id),
                        "guest_mac": net.mac,
                    }),
                )
                .await?;
        }

        if let (Some(vsock), Some(uds)) = (&self.config.vsock, vsock_uds) {
            client
                .put(
                    "/vsock",
                    &serde_json::json!({
                        "guest_cid": vsock.cid,
                        "uds_path": uds,
                    }),
                )
                .await?;
        }

        client
            .put("/actions", &serde_json::json!({"action_type": "InstanceStart"}))
            .await?;

        Ok(())
    }

    fn timeout_of(&self, policy: &crate::domain::policy::Policy) -> Duration {
        policy.timeout.unwrap_or(Duration::ZERO)
    }
}

async fn teardown_vm(mut vm: VmInstance) {
    let _ = vm.process.kill().await;
    let _ = iptables::teardown(&vm.net_rules).await;
    if let Some(dir) = &vm.cgroup_dir {
        cgroup::remove(dir);
    }
    let _ = tokio::fs::remove_dir_all(&vm.workdir).await;
}

#[async_trait]
impl Backend for MicroVmBackend {
    async fn create_sandbox(
        &self,
        req: CreateSandboxRequest,
    ) -> anyhow::Result<CreateSandboxResponse> {
        let pool = self.pool().await?;
        let sandbox_id = req.sandbox_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        pool.reserve(&sandbox_id).await?;
        Ok(CreateSandboxResponse {
            sandbox_id,
            status: Status::Ok,
        })
    }

    async fn execute_tool(&self, req: ExecuteRequest) -> ExecuteResponse {
        let pool = match self.pool().await {
            Ok(p) => p,
            Err(e) => return ExecuteResponse::error(req.tool_call_id, e),
        };

        let Some(vsock) = self.config.vsock.clone() else {
            return ExecuteResponse::error(
                req.tool_call_id,
                SandboxError::internal("microvm backend requires vsock configuration"),
            );
        };

        if let Some(net) = &self.config.network {
            if !net.allowed_cidrs.is_empty() && !req.policy.network.allowed_hosts.is_empty() {
                let cidrs: Vec<_> = net
                    .allowed_cidrs
                    .iter()
                    .filter_map(|c| iptables::parse_allowed_cidr(c).ok())
                    .collect();
                if let Some(bad_host) =
                    iptables::host_outside_allowed_cidrs(&req.policy.network.allowed_hosts, &cidrs).await
                {
                    return ExecuteResponse::error(
                        req.tool_call_id,
                        SandboxError::policy_denied(format!("host not allowed: {bad_host}")),
                    );
                }
            }
        }

        let (vm_id, is_reserved) = match &req.sandbox_id {
            Some(sandbox_id) => match pool.reserved_vm(sandbox_id).await {
                Some(id) => (id, true),
                None => {
                    return ExecuteResponse::error(
                        req.tool_call_id,
                        SandboxError::invalid_request("sandbox not found"),
                    )
                }
            },
            None => match pool.acquire().await {
                Ok(lease) => (lease.vm_id, false),
                Err(PoolError::Closed) => {
                    return ExecuteResponse::error(
                        req.tool_call_id,
                        SandboxError::internal("pool closed"),
                    )
                }
                Err(_) => {
                    return ExecuteResponse::error(
                        req.tool_call_id,
                        SandboxError::sandbox_crash("acquire cancelled"),
                    )
                }
            },
        };

        let Some((api_socket, vsock_uds)) = pool.vm_metadata(&vm_id).await else {
            return ExecuteResponse::error(
                req.tool_call_id,
                SandboxError::sandbox_crash("vm disappeared"),
            );
        };
        let Some(vsock_uds) = vsock_uds else {
            return ExecuteResponse::error(
                req.tool_call_id,
                SandboxError::internal("vm has no vsock socket configured"),
            );
        };

        let timeout = self.timeout_of(&req.policy);
        let tool_call_id = req.tool_call_id.clone();
        let result = vsock_caller::call(&self.config, &vsock, &api_socket, &vsock_uds, &req, timeout).await;

        if !is_reserved {
            pool.release(&vm_id).await;
        }

        match result {
            Ok(response) => response,
            Err(vsock_caller::CallerError::Deadline) => {
                ExecuteResponse::error(tool_call_id, SandboxError::tool_failed("deadline"))
            }
            Err(e) => ExecuteResponse::error(tool_call_id, SandboxError::sandbox_crash(e.to_string())),
        }
    }

    async fn destroy_sandbox(
        &self,
        req: DestroySandboxRequest,
    ) -> anyhow::Result<DestroySandboxResponse> {
        let pool = self.pool().await?;
        pool.destroy_sandbox(&req.sandbox_id).await?;
        Ok(DestroySandboxResponse { status: Status::Ok })
    }

    async fn health(&self) -> anyhow::Result<HealthResponse> {
        let warmed = match self.pool.get() {
            Some(pool) => pool.is_warmed().await,
            None => false,
        };
        Ok(HealthResponse {
            status: if warmed { "ok".into() } else { "not_warmed".into() },
            version: env!("CARGO_PKG_VERSION").into(),
        })
    }
}
