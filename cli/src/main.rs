// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # Aegis Sandbox CLI
//!
//! The `aegis-sandbox` binary fronts the sandbox execution runtime: a local
//! in-process backend or a microVM pool, behind a control-plane HTTP
//! service.
//!
//! ## Commands
//!
//! - `aegis-sandbox serve` - run the control-plane HTTP service
//! - `aegis-sandbox health-check` - probe a running instance's `/v1/sandbox/health`
//! - `aegis-sandbox stdio` - run the stdin/stdout line protocol

use std::path::PathBuf;
use std::sync::Arc;

use aegis_sandbox_core::backend::local::LocalBackend;
use aegis_sandbox_core::backend::microvm::MicroVmBackend;
use aegis_sandbox_core::backend::Backend;
use aegis_sandbox_core::builtin_tools::{calculator_tool, file_system_tool, http_client_tool};
use aegis_sandbox_core::config::{RuntimeKind, SandboxConfig};
use aegis_sandbox_core::control_plane::{self, AppState, SandboxService};
use aegis_sandbox_core::registry::ToolRegistry;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

/// Aegis Sandbox - microVM-isolated tool execution
#[derive(Parser)]
#[command(name = "aegis-sandbox")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to a JSON configuration file (overrides discovery)
    #[arg(short, long, global = true, env = "AEGIS_SANDBOX_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "AEGIS_SANDBOX_LOG_LEVEL", default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the control-plane HTTP service
    Serve {
        /// Override the configured listen address
        #[arg(long, env = "AEGIS_SANDBOX_LISTEN")]
        listen: Option<String>,

        /// Override the configured bearer auth token
        #[arg(long, env = "AEGIS_SANDBOX_AUTH_TOKEN")]
        auth_token: Option<String>,

        /// Override the configured execution backend
        #[arg(long, env = "AEGIS_SANDBOX_RUNTIME", value_parser = parse_runtime_kind)]
        runtime: Option<RuntimeKind>,

        /// Path to a microVM runtime config JSON file, required when
        /// `--runtime microvm` is selected without one already set via
        /// `--config`
        #[arg(long, env = "AEGIS_SANDBOX_RUNTIME_CONFIG", value_name = "FILE")]
        runtime_config: Option<PathBuf>,
    },
    /// Probe a running instance's health endpoint
    HealthCheck {
        /// Base URL of the running instance, e.g. http://127.0.0.1:8070
        #[arg(long, default_value = "http://127.0.0.1:8070")]
        url: String,
    },
    /// Read one line-delimited JSON tool request per line on stdin, writing
    /// a matching response line to stdout, until stdin is closed
    Stdio {
        /// Override the configured execution backend
        #[arg(long, env = "AEGIS_SANDBOX_RUNTIME", value_parser = parse_runtime_kind)]
        runtime: Option<RuntimeKind>,

        /// Path to a microVM runtime config JSON file, required when
        /// `--runtime microvm` is selected without one already set via
        /// `--config`
        #[arg(long, env = "AEGIS_SANDBOX_RUNTIME_CONFIG", value_name = "FILE")]
        runtime_config: Option<PathBuf>,
    },
}

fn parse_runtime_kind(s: &str) -> Result<RuntimeKind, String> {
    match s {
        "local" => Ok(RuntimeKind::Local),
        "microvm" => Ok(RuntimeKind::MicroVm),
        other => Err(format!("unknown runtime '{other}', expected local or microvm")),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(&cli.log_level)?;

    match cli.command {
        Some(Commands::Serve {
            listen,
            auth_token,
            runtime,
            runtime_config,
        }) => serve(cli.config, listen, auth_token, runtime, runtime_config).await,
        Some(Commands::HealthCheck { url }) => health_check(&url).await,
        Some(Commands::Stdio {
            runtime,
            runtime_config,
        }) => stdio(cli.config, runtime, runtime_config).await,
        None => {
            eprintln!("No command specified. Use --help for usage.");
            std::process::exit(1);
        }
    }
}

fn resolve_config(
    config_path: Option<PathBuf>,
    runtime_override: Option<RuntimeKind>,
    runtime_config_override: Option<PathBuf>,
) -> Result<SandboxConfig> {
    let mut config = match config_path {
        Some(path) => {
            SandboxConfig::load(&path).with_context(|| format!("loading {}", path.display()))?
        }
        None => SandboxConfig::default(),
    };
    if let Some(runtime) = runtime_override {
        config.runtime = runtime;
    }
    if let Some(path) = runtime_config_override {
        let microvm_config: aegis_sandbox_core::backend::microvm::MicroVmConfig =
            serde_json::from_str(
                &std::fs::read_to_string(&path)
                    .with_context(|| format!("reading {}", path.display()))?,
            )
            .with_context(|| format!("parsing {}", path.display()))?;
        config.microvm = Some(microvm_config);
        config.runtime_config_path = Some(path);
    }
    Ok(config)
}

fn build_backend(config: &SandboxConfig) -> Result<Arc<dyn Backend>> {
    Ok(match config.runtime {
        RuntimeKind::Local => Arc::new(LocalBackend::new(builtin_registry())),
        RuntimeKind::MicroVm => {
            let microvm_config = config
                .microvm
                .clone()
                .context("runtime is microvm but no microvm config was supplied")?;
            Arc::new(MicroVmBackend::new(microvm_config))
        }
    })
}

async fn serve(
    config_path: Option<PathBuf>,
    listen_override: Option<String>,
    auth_token_override: Option<String>,
    runtime_override: Option<RuntimeKind>,
    runtime_config_override: Option<PathBuf>,
) -> Result<()> {
    let mut config = resolve_config(config_path, runtime_override, runtime_config_override)?;
    if let Some(listen) = listen_override {
        config.listen_addr = listen;
    }
    if let Some(token) = auth_token_override {
        config.auth_token = Some(token);
    }

    let backend = build_backend(&config)?;
    let service = Arc::new(SandboxService::new(backend, Arc::new(builtin_registry())));
    let app = control_plane::app(AppState {
        service,
        auth_token: config.auth_token.clone().map(Into::into),
    });

    let listener = tokio::net::TcpListener::bind(&config.listen_addr)
        .await
        .with_context(|| format!("binding {}", config.listen_addr))?;
    info!(addr = %config.listen_addr, runtime = ?config.runtime, "aegis-sandbox listening");
    axum::serve(listener, app).await.context("serving control plane")?;
    Ok(())
}

async fn stdio(
    config_path: Option<PathBuf>,
    runtime_override: Option<RuntimeKind>,
    runtime_config_override: Option<PathBuf>,
) -> Result<()> {
    let config = resolve_config(config_path, runtime_override, runtime_config_override)?;
    let backend = build_backend(&config)?;
    let service = SandboxService::new(backend, Arc::new(builtin_registry()));

    info!(runtime = ?config.runtime, "aegis-sandbox reading line protocol on stdin");
    aegis_sandbox_core::control_plane::stdio::run(&service, tokio::io::stdin(), tokio::io::stdout())
        .await
        .context("running stdin/stdout line protocol")
}

async fn health_check(base_url: &str) -> Result<()> {
    let url = format!("{}/v1/sandbox/health", base_url.trim_end_matches('/'));
    let resp = reqwest::get(&url).await.context("sending health check request")?;
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    println!("{status}: {body}");
    if !status.is_success() {
        std::process::exit(1);
    }
    Ok(())
}

fn builtin_registry() -> ToolRegistry {
    let registry = ToolRegistry::new();
    registry.register(calculator_tool()).expect("builtin tool names are unique");
    registry.register(file_system_tool()).expect("builtin tool names are unique");
    registry.register(http_client_tool()).expect("builtin tool names are unique");
    registry
}

/// Initialize tracing subscriber for logging.
fn init_logging(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("failed to create log filter")?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();

    Ok(())
}
