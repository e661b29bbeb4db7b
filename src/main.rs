use std::sync::Arc;

use async_trait::async_trait;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use flowlite_worker::config::{RetryConfig, WorkerConfig};
use flowlite_worker::context::{TaskContextCache, TaskExecutionContext};
use flowlite_worker::error::Result;
use flowlite_worker::plugin::{ShellTaskChannel, TaskPluginRegistry};
use flowlite_worker::reporter::{AlertClient, MasterMessageSender, MessageKind, StatusReporter};
use flowlite_worker::storage::ApplicationManager;
use flowlite_worker::worker::{
    DelayQueue, ResourceStager, TaskRunner, WorkerPool, WorkerServices,
};

#[derive(Parser, Debug)]
#[command(name = "flowlite-worker")]
#[command(about = "Worker task execution runtime for a distributed workflow scheduler")]
struct Args {
    /// Number of parallel executor slots
    #[arg(long, default_value = "4")]
    exec_slots: usize,

    /// Master address lifecycle callbacks are reported to
    #[arg(long, default_value = "127.0.0.1:5678")]
    master_address: String,

    /// Keep task work directories after completion
    #[arg(long)]
    develop_mode: bool,

    /// Environment file sourced by tasks that spawn subprocesses
    #[arg(long, default_value = "")]
    system_env_path: String,
}

/// Stand-in master transport: logs each callback. The real RPC client is
/// wired in by the embedding deployment.
struct LoggingMasterSender;

#[async_trait]
impl MasterMessageSender for LoggingMasterSender {
    async fn send(
        &self,
        ctx: &TaskExecutionContext,
        master_address: &str,
        kind: MessageKind,
    ) -> Result<()> {
        tracing::info!(
            task_instance_id = ctx.task_instance_id,
            status = %ctx.current_execution_status,
            master_address,
            kind = %kind,
            "Lifecycle callback"
        );
        Ok(())
    }
}

struct LoggingAlertClient;

#[async_trait]
impl AlertClient for LoggingAlertClient {
    async fn send_alert(
        &self,
        alert_group_id: i32,
        title: &str,
        _content: &str,
        strategy: i32,
    ) -> Result<()> {
        tracing::info!(alert_group_id, title, strategy, "Task alert");
        Ok(())
    }
}

struct NoopApplicationManager;

#[async_trait]
impl ApplicationManager for NoopApplicationManager {
    async fn kill_application(&self, app_id: &str) -> Result<()> {
        tracing::info!(app_id, "External application kill requested");
        Ok(())
    }
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let config = WorkerConfig {
        exec_slots: args.exec_slots,
        master_address: args.master_address,
        develop_mode: args.develop_mode,
        resource_upload_enabled: false,
        system_env_path: args.system_env_path,
        retry: RetryConfig::default(),
    };

    tracing::info!(
        exec_slots = config.exec_slots,
        master_address = %config.master_address,
        develop_mode = config.develop_mode,
        "Starting flowlite worker"
    );

    let mut registry = TaskPluginRegistry::new();
    registry.register("SHELL", Arc::new(ShellTaskChannel));

    let cache = Arc::new(TaskContextCache::new());
    let reporter = StatusReporter::new(
        Arc::new(LoggingMasterSender),
        Arc::new(LoggingAlertClient),
        config.master_address.clone(),
        config.retry.clone(),
    );
    let services = Arc::new(WorkerServices {
        stager: ResourceStager::new(None, config.resource_upload_enabled),
        reporter,
        registry,
        app_manager: Arc::new(NoopApplicationManager),
        cache: cache.clone(),
        config,
    });

    let queue = Arc::new(DelayQueue::new());

    // On SIGTERM or interrupt, cancel the token: slots stop taking new
    // runners while tasks already in flight report their terminal status.
    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        let mut sigterm =
            signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM, draining executor slots");
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received interrupt, draining executor slots");
            }
        }
        signal_token.cancel();
    });

    let pool = WorkerPool::new(services.config.exec_slots, queue.clone());
    let slot_handles = pool.start(shutdown.clone());

    // Standalone ingress: one task execution context per line of JSON on
    // stdin. Deployments replace this with their dispatch transport.
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) if !line.trim().is_empty() => {
                        match serde_json::from_str::<TaskExecutionContext>(&line) {
                            Ok(ctx) => {
                                tracing::info!(
                                    task_instance_id = ctx.task_instance_id,
                                    task_type = %ctx.task_type,
                                    "Task accepted"
                                );
                                cache.cache(ctx.clone());
                                queue.offer(Arc::new(TaskRunner::new(ctx, services.clone())));
                            }
                            Err(e) => tracing::warn!(error = %e, "Rejected malformed task context"),
                        }
                    }
                    Ok(Some(_)) => {}
                    Ok(None) => {
                        // stdin closed, keep serving queued tasks until shutdown
                        shutdown.cancelled().await;
                        break;
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to read task ingress");
                        break;
                    }
                }
            }
        }
    }

    for handle in slot_handles {
        let _ = handle.await;
    }

    Ok(())
}
