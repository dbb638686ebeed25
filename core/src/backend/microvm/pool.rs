// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! The warm VM pool. Bookkeeping maps are guarded by one mutex for short
//! critical sections; the ready queue is a bounded channel that is itself
//! the blocking-acquire primitive.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use thiserror::Error;
use tokio::process::Child;
use tokio::sync::{mpsc, Mutex};

use crate::backend::microvm::iptables::InstalledRule;

pub struct VmInstance {
    pub id: String,
    pub sandbox_id: Option<String>,
    pub api_socket_path: PathBuf,
    pub vsock_uds_path: Option<PathBuf>,
    pub workdir: PathBuf,
    pub cgroup_dir: Option<PathBuf>,
    pub net_rules: Vec<InstalledRule>,
    pub process: Child,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PoolError {
    #[error("pool is closed")]
    Closed,
    #[error("sandbox already exists: {0}")]
    SandboxAlreadyExists(String),
    #[error("sandbox not found: {0}")]
    SandboxNotFound(String),
    #[error("acquire cancelled")]
    Cancelled,
}

struct PoolState {
    all: HashMap<String, VmInstance>,
    reserved: HashMap<String, String>, // sandbox_id -> vm id
    retire: HashSet<String>,
    warmed: bool,
    closed: bool,
}

/// What the caller got back from `acquire`/`reserve`: enough to address the
/// VM through the rest of the pool's API without owning it.
pub struct Lease {
    pub vm_id: String,
}

pub struct Pool {
    capacity: usize,
    state: Mutex<PoolState>,
    ready_tx: mpsc::Sender<String>,
    ready_rx: Mutex<mpsc::Receiver<String>>,
}

impl Pool {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            capacity,
            state: Mutex::new(PoolState {
                all: HashMap::new(),
                reserved: HashMap::new(),
                retire: HashSet::new(),
                warmed: false,
                closed: false,
            }),
            ready_tx: tx,
            ready_rx: Mutex::new(rx),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub async fn is_warmed(&self) -> bool {
        self.state.lock().await.warmed
    }

    pub async fn mark_warmed(&self) {
        self.state.lock().await.warmed = true;
    }

    /// Registers a freshly spawned VM and pushes it onto the ready queue.
    /// Used both by pool warming and by single-VM replacement after an
    /// eviction.
    pub async fn admit(&self, vm: VmInstance) -> Result<(), PoolError> {
        let id = vm.id.clone();
        {
            let mut state = self.state.lock().await;
            if state.closed {
                return Err(PoolError::Closed);
            }
            state.all.insert(id.clone(), vm);
        }
        self.ready_tx
            .send(id)
            .await
            .map_err(|_| PoolError::Closed)?;
        Ok(())
    }

    /// Transient acquire: blocks on the ready queue; a VM
    /// found marked for retirement is destroyed and the wait retried.
    pub async fn acquire(&self) -> Result<Lease, PoolError> {
        loop {
            let id = {
                let mut rx = self.ready_rx.lock().await;
                rx.recv().await.ok_or(PoolError::Closed)?
            };

            let retired = {
                let mut state = self.state.lock().await;
                if state.retire.remove(&id) {
                    true
                } else {
                    false
                }
            };

            if retired {
                self.destroy_vm(&id).await;
                continue;
            }

            return Ok(Lease { vm_id: id });
        }
    }

    /// Releases a transiently acquired VM: destroyed if it was retired while
    /// in flight, otherwise returned to the ready queue.
    pub async fn release(&self, vm_id: &str) {
        let retired = {
            let mut state = self.state.lock().await;
            state.retire.remove(vm_id)
        };
        if retired {
            self.destroy_vm(vm_id).await;
            return;
        }
        if self.ready_tx.send(vm_id.to_string()).await.is_err() {
            self.destroy_vm(vm_id).await;
        }
    }

    /// Reserved acquire: binds a VM from the ready queue under
    /// `sandbox_id` for repeated direct use.
    pub async fn reserve(&self, sandbox_id: &str) -> Result<Lease, PoolError> {
        {
            let state = self.state.lock().await;
            if state.reserved.contains_key(sandbox_id) {
                return Err(PoolError::SandboxAlreadyExists(sandbox_id.to_string()));
            }
        }
        let lease = self.acquire().await?;
        let mut state = self.state.lock().await;
        state
            .reserved
            .insert(sandbox_id.to_string(), lease.vm_id.clone());
        Ok(lease)
    }

    /// Resolves a previously reserved `sandbox_id` to its bound VM id.
    pub async fn reserved_vm(&self, sandbox_id: &str) -> Option<String> {
        self.state.lock().await.reserved.get(sandbox_id).cloned()
    }

    /// Marks `sandbox_id` for retirement. If currently reserved, destroys
    /// immediately; otherwise leaves a marker picked up on next dequeue.
    pub async fn destroy_sandbox(&self, sandbox_id: &str) -> Result<(), PoolError> {
        let vm_id = {
            let mut state = self.state.lock().await;
            state.reserved.remove(sandbox_id)
        };
        match vm_id {
            Some(id) => {
                self.destroy_vm(&id).await;
                Ok(())
            }
            None => Ok(()), // destroy of an unknown id is a no-op success
        }
    }

    /// Marks an arbitrary VM id for retirement, independent of any sandbox
    /// reservation. `acquire`/`release` pick this up the next time the VM
    /// passes through the ready queue.
    pub async fn mark_for_retirement(&self, vm_id: &str) {
        self.state.lock().await.retire.insert(vm_id.to_string());
    }

    /// Dequeues every currently idle VM, destroying `id` (or anything
    /// already marked retired) and re-enqueuing the rest. Lets the pool
    /// evict one specific idle VM without waiting for a caller to acquire
    /// and release it first.
    pub async fn drain_stop(&self, id: &str) {
        let mut drained = Vec::new();
        {
            let mut rx = self.ready_rx.lock().await;
            while let Ok(vm_id) = rx.try_recv() {
                drained.push(vm_id);
            }
        }
        for vm_id in drained {
            let should_destroy = {
                let mut state = self.state.lock().await;
                vm_id == id || state.retire.remove(&vm_id)
            };
            if should_destroy {
                self.destroy_vm(&vm_id).await;
            } else if self.ready_tx.send(vm_id.clone()).await.is_err() {
                self.destroy_vm(&vm_id).await;
            }
        }
    }

    async fn destroy_vm(&self, vm_id: &str) {
        let mut state = self.state.lock().await;
        if let Some(mut vm) = state.all.remove(vm_id) {
            drop(state);
            let _ = vm.process.kill().await;
            let _ = crate::backend::microvm::iptables::teardown(&vm.net_rules).await;
            if let Some(cgroup_dir) = &vm.cgroup_dir {
                crate::backend::microvm::cgroup::remove(cgroup_dir);
            }
            let _ = tokio::fs::remove_dir_all(&vm.workdir).await;
        }
    }

    pub async fn vm_metadata(&self, vm_id: &str) -> Option<(PathBuf, Option<PathBuf>)> {
        let state = self.state.lock().await;
        state
            .all
            .get(vm_id)
            .map(|vm| (vm.api_socket_path.clone(), vm.vsock_uds_path.clone()))
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.all.len()
    }
}
