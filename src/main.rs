// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod cli;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use cli::{Cli, Commands};
use shadow_config::{Config, ExecutionMode};
use shadow_core::{
    CleanupScheduler, EventBus, ExecutorFactory, FsCheckpointStore, LiveProviderFactory,
    LocalExecutorFactory, SandboxTeardown, TaskKernel,
};
use shadow_db::{Store, Task};
use shadow_github::TokenRefresher;
use shadow_model::ContextService;
use shadow_sandbox::{RemoteExecutor, SandboxController};
use shadow_server::{build_router, AppState};
use shadow_tools::WorkspaceExecutor;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    // reqwest's rustls backend wants one process-wide crypto provider.
    let _ = rustls::crypto::ring::default_provider().install_default();

    let config = shadow_config::load()?;
    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(config).await,
        Commands::ShowConfig => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

fn init_logging(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}

async fn serve(config: Config) -> anyhow::Result<()> {
    let store = Arc::new(Store::open(&config.database.path)?);
    let events = Arc::new(EventBus::new());
    let contexts = Arc::new(ContextService::default());

    // Execution surface: local directory workspaces, or per-task pods.
    let (executors, teardown): (Arc<dyn ExecutorFactory>, Arc<dyn SandboxTeardown>) =
        match config.sandbox.mode {
            ExecutionMode::Local => {
                let factory = Arc::new(LocalExecutorFactory::new(&config.sandbox.workspace_dir));
                let teardown = Arc::new(LocalTeardown);
                (factory, teardown)
            }
            ExecutionMode::Remote => {
                let controller = Arc::new(SandboxController::new(config.sandbox.clone())?);
                (
                    Arc::new(RemoteExecutorFactory {
                        controller: controller.clone(),
                    }),
                    Arc::new(PodTeardown { controller }),
                )
            }
        };

    let checkpoints = Arc::new(FsCheckpointStore::new(format!(
        "{}/.checkpoints",
        config.sandbox.workspace_dir
    )));

    let mut kernel = TaskKernel::new(
        store.clone(),
        config.kernel.clone(),
        contexts,
        events.clone(),
        Arc::new(LiveProviderFactory),
        executors,
        checkpoints,
    );
    if let (Some(id), Some(secret)) = (&config.github.client_id, &config.github.client_secret) {
        kernel = kernel.with_token_refresher(Arc::new(TokenRefresher::new(id, secret)));
    }
    let kernel = Arc::new(kernel);

    let shutdown = CancellationToken::new();

    let scheduler = CleanupScheduler::new(
        store.clone(),
        teardown,
        Duration::from_secs(config.kernel.cleanup_sweep_secs),
    );
    let scheduler_handle = tokio::spawn(scheduler.run(shutdown.clone()));

    let app = build_router(
        AppState {
            store,
            events,
            kernel: Some(kernel),
            webhook_secret: config.github.webhook_secret.clone(),
        },
        &config.server.client_url,
    );
    let addr = format!("0.0.0.0:{}", config.server.api_port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(addr = %addr, mode = ?config.sandbox.mode, "shadow server listening");

    let server_shutdown = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
            server_shutdown.cancel();
        })
        .await
        .context("server error")?;

    shutdown.cancel();
    let _ = scheduler_handle.await;
    Ok(())
}

/// Local-mode teardown: drop the task's workspace directory.
struct LocalTeardown;

#[async_trait]
impl SandboxTeardown for LocalTeardown {
    async fn teardown(&self, task: &Task) -> anyhow::Result<()> {
        if let Some(path) = &task.workspace_path {
            match tokio::fs::remove_dir_all(path).await {
                Ok(()) => {}
                // Already gone: teardown is idempotent.
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

/// Remote-mode teardown: delete the task's pod (idempotent on the API side).
struct PodTeardown {
    controller: Arc<SandboxController>,
}

#[async_trait]
impl SandboxTeardown for PodTeardown {
    async fn teardown(&self, task: &Task) -> anyhow::Result<()> {
        self.controller.delete(&task.id).await?;
        Ok(())
    }
}

/// Remote-mode executor factory: one sidecar client per task.
struct RemoteExecutorFactory {
    controller: Arc<SandboxController>,
}

impl ExecutorFactory for RemoteExecutorFactory {
    fn executor(&self, task: &Task) -> anyhow::Result<Arc<dyn WorkspaceExecutor>> {
        Ok(Arc::new(RemoteExecutor::new(
            self.controller.clone(),
            task.id.clone(),
        )))
    }
}

