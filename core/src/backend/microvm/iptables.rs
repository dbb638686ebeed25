// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Network enforcement for a VM's tap device via `iptables`.

use std::net::IpAddr;
use std::process::Stdio;

use ipnet::IpNet;
use thiserror::Error;
use tokio::process::Command;

#[derive(Debug, Error)]
pub enum IptablesError {
    #[error("iptables binary not found on PATH")]
    BinaryMissing,
    #[error("invalid CIDR or IP: {0}")]
    InvalidCidr(String),
    #[error("iptables {args:?} failed (status {status}): {stderr}")]
    CommandFailed {
        args: Vec<String>,
        status: i32,
        stderr: String,
    },
}

/// One concrete rule installed for an instance, recorded verbatim so
/// teardown can issue the mirror delete.
#[derive(Debug, Clone)]
pub struct InstalledRule {
    /// Arguments after the leading `-I`, e.g. `["FORWARD", "-i", "tap0", "-j", "DROP", ...]`.
    args: Vec<String>,
}

pub fn parse_allowed_cidr(entry: &str) -> Result<IpNet, IptablesError> {
    if let Ok(net) = entry.parse::<IpNet>() {
        return Ok(net);
    }
    entry
        .parse::<IpAddr>()
        .map(|ip| IpNet::new(ip, if ip.is_ipv4() { 32 } else { 128 }).expect("valid host prefix"))
        .map_err(|_| IptablesError::InvalidCidr(entry.to_string()))
}

/// A sanity check layered on top of the iptables enforcement (which remains
/// the primary control). Resolves each of `allowed_hosts` via DNS and
/// confirms every returned IP lies within the union of `allowed_cidrs`;
/// returns the first host that doesn't.
pub async fn host_outside_allowed_cidrs(
    allowed_hosts: &[String],
    allowed_cidrs: &[IpNet],
) -> Option<String> {
    if allowed_cidrs.is_empty() {
        return None;
    }
    for host in allowed_hosts {
        let ips = match tokio::net::lookup_host((host.as_str(), 0)).await {
            Ok(addrs) => addrs.map(|a| a.ip()).collect::<Vec<_>>(),
            Err(_) => return Some(host.clone()),
        };
        if ips.is_empty() {
            return Some(host.clone());
        }
        let all_within = ips
            .iter()
            .all(|ip| allowed_cidrs.iter().any(|cidr| cidr.contains(ip)));
        if !all_within {
            return Some(host.clone());
        }
    }
    None
}

async fn ensure_binary_available() -> Result<(), IptablesError> {
    which_iptables().await.ok_or(IptablesError::BinaryMissing)
}

async fn which_iptables() -> Option<()> {
    let status = Command::new("sh")
        .arg("-c")
        .arg("command -v iptables")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .ok()?;
    status.success().then_some(())
}

async fn run_iptables(args: &[String]) -> Result<(), IptablesError> {
    let mut full_args = vec!["-w".to_string()];
    full_args.extend(args.iter().cloned());
    let output = Command::new("iptables")
        .args(&full_args)
        .output()
        .await
        .map_err(|_| IptablesError::BinaryMissing)?;
    if !output.status.success() {
        return Err(IptablesError::CommandFailed {
            args: full_args,
            status: output.status.code().unwrap_or(-1),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        });
    }
    Ok(())
}

/// Installs the three-rule-group enforcement for one instance. On failure
/// partway through, the rules installed so far are rewound before the error
/// surfaces.
pub async fn install(
    tap_device: &str,
    allowed_cidrs: &[String],
    instance_id: &str,
) -> Result<Vec<InstalledRule>, IptablesError> {
    if allowed_cidrs.is_empty() {
        return Ok(Vec::new());
    }
    ensure_binary_available().await?;

    let comment = format!("aegis-sandbox:{instance_id}");
    let mut installed = Vec::new();

    let default_deny = vec![
        "FORWARD".to_string(),
        "-i".to_string(),
        tap_device.to_string(),
        "-m".to_string(),
        "comment".to_string(),
        "--comment".to_string(),
        comment.clone(),
        "-j".to_string(),
        "DROP".to_string(),
    ];
    if let Err(e) = install_one(&default_deny, &mut installed).await {
        teardown(&installed).await;
        return Err(e);
    }

    for cidr_entry in allowed_cidrs {
        let cidr = match parse_allowed_cidr(cidr_entry) {
            Ok(c) => c,
            Err(e) => {
                teardown(&installed).await;
                return Err(e);
            }
        };
        let accept = vec![
            "FORWARD".to_string(),
            "-i".to_string(),
            tap_device.to_string(),
            "-d".to_string(),
            cidr.to_string(),
            "-m".to_string(),
            "comment".to_string(),
            "--comment".to_string(),
            comment.clone(),
            "-j".to_string(),
            "ACCEPT".to_string(),
        ];
        if let Err(e) = install_one(&accept, &mut installed).await {
            teardown(&installed).await;
            return Err(e);
        }
    }

    let return_traffic = vec![
        "FORWARD".to_string(),
        "-o".to_string(),
        tap_device.to_string(),
        "-m".to_string(),
        "conntrack".to_string(),
        "--ctstate".to_string(),
        "RELATED,ESTABLISHED".to_string(),
        "-m".to_string(),
        "comment".to_string(),
        "--comment".to_string(),
        comment,
        "-j".to_string(),
        "ACCEPT".to_string(),
    ];
    if let Err(e) = install_one(&return_traffic, &mut installed).await {
        teardown(&installed).await;
        return Err(e);
    }

    Ok(installed)
}

async fn install_one(rule_args: &[String], installed: &mut Vec<InstalledRule>) -> Result<(), IptablesError> {
    let mut args = vec!["-I".to_string()];
    args.extend(rule_args.iter().cloned());
    run_iptables(&args).await?;
    installed.push(InstalledRule {
        args: rule_args.to_vec(),
    });
    Ok(())
}

/// Mirrors each installed rule's `-I` as a `-D`, in reverse order, collecting
/// the first error but attempting every rule regardless.
pub async fn teardown(installed: &[InstalledRule]) -> Option<IptablesError> {
    let mut first_error = None;
    for rule in installed.iter().rev() {
        let mut args = vec!["-D".to_string()];
        args.extend(rule.args.iter().cloned());
        if let Err(e) = run_iptables(&args).await {
            if first_error.is_none() {
                first_error = Some(e);
            }
        }
    }
    first_error
}
