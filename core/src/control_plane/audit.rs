// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Pluggable audit recording. Durable backing is out of scope here; the
//! default sink just logs.

use crate::wire::Status;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditDecision {
    Allow,
    Deny,
}

#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub run_id: Option<String>,
    pub tool: String,
    pub decision: AuditDecision,
    pub status: Status,
    pub error_message: Option<String>,
}

pub trait AuditSink: Send + Sync {
    fn record(&self, entry: AuditEntry);
}

pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, entry: AuditEntry) {
        match entry.decision {
            AuditDecision::Deny => tracing::warn!(
                run_id = entry.run_id.as_deref().unwrap_or(""),
                tool = %entry.tool,
                status = ?entry.status,
                error = entry.error_message.as_deref().unwrap_or(""),
                "sandbox policy denial"
            ),
            AuditDecision::Allow => tracing::info!(
                run_id = entry.run_id.as_deref().unwrap_or(""),
                tool = %entry.tool,
                status = ?entry.status,
                "sandbox tool execution"
            ),
        }
    }
}
