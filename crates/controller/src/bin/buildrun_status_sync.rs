/*
 * 5D Labs Build Orchestrator - BuildRun Status Sync
 * Copyright (C) 2025 5D Labs
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as published
 * by the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program. If not, see <https://www.gnu.org/licenses/>.
 */

//! BuildRun Status Sync - copies `TaskRun` results onto a `BuildRun`
//!
//! Reads the named results of the `TaskRun` behind a `BuildRun`, merges
//! them into the `BuildRun` status and commits it, retrying on conflicts.
//! Exits non-zero when the status could not be committed.

use clap::Parser;
use controller::tasks::{
    config::ControllerConfig, status::CommitContext, sync_build_run_status,
    types::Context as TaskContext,
};
use std::path::Path;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "buildrun-status-sync")]
#[command(about = "Propagate TaskRun results into BuildRun status")]
#[command(version)]
struct Args {
    /// Namespace of the BuildRun
    #[arg(long, env = "BUILDRUN_NAMESPACE", default_value = "default")]
    namespace: String,

    /// Name of the BuildRun to update
    #[arg(long)]
    build_run: String,

    /// TaskRun to read results from (defaults to the one recorded on the BuildRun)
    #[arg(long)]
    task_run: Option<String>,

    /// Mounted configuration file
    #[arg(long, env = "CONTROLLER_CONFIG_PATH", default_value = "/config/config.yaml")]
    config: String,

    /// Read configuration from this ConfigMap instead of the mounted file
    #[arg(long)]
    config_map: Option<String>,

    /// Validate the write on the API server without persisting it
    #[arg(long)]
    dry_run: bool,

    /// Emit logs as JSON
    #[arg(long, env = "JSON_LOGS")]
    json_logs: bool,
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,controller=debug".into());

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

async fn load_controller_config(client: &kube::Client, args: &Args) -> ControllerConfig {
    if let Some(name) = &args.config_map {
        return match ControllerConfig::from_configmap(client, &args.namespace, name).await {
            Ok(cfg) => {
                info!("Loaded controller configuration from ConfigMap {}", name);
                cfg
            }
            Err(err) => {
                warn!(
                    "Failed to load configuration from ConfigMap {}: {}. Using defaults.",
                    name, err
                );
                ControllerConfig::default()
            }
        };
    }

    if !Path::new(&args.config).exists() {
        info!("No configuration at {}, using defaults", args.config);
        return ControllerConfig::default();
    }

    match ControllerConfig::from_mounted_file(&args.config) {
        Ok(cfg) => {
            info!("Loaded controller configuration from {}", args.config);
            cfg
        }
        Err(err) => {
            warn!(
                "Failed to load configuration from {}: {}. Using defaults.",
                args.config, err
            );
            ControllerConfig::default()
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.json_logs);

    info!(
        "Starting 5D Labs BuildRun Status Sync v{}",
        env!("CARGO_PKG_VERSION")
    );

    let client = kube::Client::try_default().await?;
    info!("Connected to Kubernetes cluster");

    let config = load_controller_config(&client, &args).await;
    config.validate()?;

    let commit_ctx = CommitContext::with_timeout(config.status.deadline());
    let task_context = TaskContext {
        client,
        namespace: args.namespace.clone(),
        config: Arc::new(config),
    };

    // Ctrl+C cancels the in-flight commit
    let canceller = commit_ctx.clone();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            warn!("Received Ctrl+C, cancelling status commit");
            canceller.cancel();
        }
    });

    match sync_build_run_status(
        &task_context,
        &args.build_run,
        args.task_run.as_deref(),
        &commit_ctx,
        args.dry_run,
    )
    .await
    {
        Ok(outcome) => {
            for diagnostic in &outcome.diagnostics {
                warn!("Rejected result {}", diagnostic);
            }
            info!(
                "BuildRun {}/{} status committed after {} attempt(s)",
                args.namespace, args.build_run, outcome.attempts
            );
            Ok(())
        }
        Err(e) => {
            error!(
                "Failed to sync BuildRun {}/{}: {}",
                args.namespace, args.build_run, e
            );
            Err(e.into())
        }
    }
}
