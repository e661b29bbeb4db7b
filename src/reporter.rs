use std::sync::Arc;

use async_trait::async_trait;
use rand::Rng;

use crate::config::RetryConfig;
use crate::context::{ExecutionStatus, TaskExecutionContext};
use crate::error::Result;
use crate::plugin::TaskAlertInfo;

/// Lifecycle message kinds delivered to the master.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    TaskExecuteRunning,
    TaskExecuteResult,
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageKind::TaskExecuteRunning => write!(f, "TASK_EXECUTE_RUNNING"),
            MessageKind::TaskExecuteResult => write!(f, "TASK_EXECUTE_RESULT"),
        }
    }
}

/// Transport used to deliver lifecycle messages to the master. The RPC
/// implementation lives outside this crate.
#[async_trait]
pub trait MasterMessageSender: Send + Sync {
    async fn send(
        &self,
        ctx: &TaskExecutionContext,
        master_address: &str,
        kind: MessageKind,
    ) -> Result<()>;
}

/// Alert strategy codes, shared with the alert service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningType {
    Success,
    Failure,
}

impl WarningType {
    pub fn code(&self) -> i32 {
        match self {
            WarningType::Success => 1,
            WarningType::Failure => 2,
        }
    }
}

/// Contract of the alert service collaborator.
#[async_trait]
pub trait AlertClient: Send + Sync {
    async fn send_alert(
        &self,
        alert_group_id: i32,
        title: &str,
        content: &str,
        strategy: i32,
    ) -> Result<()>;
}

/// Sends lifecycle messages to the master with bounded retry and forwards
/// task alerts to the alert service.
///
/// Delivery is at-least-once: after retries are exhausted the failure is
/// logged and swallowed, and the master reconciles through its own timeout
/// loop. Report delivery never alters task-local state.
pub struct StatusReporter {
    sender: Arc<dyn MasterMessageSender>,
    alert_client: Arc<dyn AlertClient>,
    master_address: String,
    retry: RetryConfig,
}

impl StatusReporter {
    pub fn new(
        sender: Arc<dyn MasterMessageSender>,
        alert_client: Arc<dyn AlertClient>,
        master_address: String,
        retry: RetryConfig,
    ) -> Self {
        Self {
            sender,
            alert_client,
            master_address,
            retry,
        }
    }

    /// Deliver a lifecycle message, retrying with exponential backoff.
    pub async fn send_with_retry(&self, ctx: &TaskExecutionContext, kind: MessageKind) {
        let mut backoff = self.retry.base_backoff;
        for attempt in 1..=self.retry.max_attempts {
            match self.sender.send(ctx, &self.master_address, kind).await {
                Ok(()) => {
                    tracing::debug!(
                        task_instance_id = ctx.task_instance_id,
                        kind = %kind,
                        attempt,
                        "Message delivered to master"
                    );
                    return;
                }
                Err(e) => {
                    tracing::warn!(
                        task_instance_id = ctx.task_instance_id,
                        kind = %kind,
                        attempt,
                        error = %e,
                        "Failed to deliver message to master"
                    );
                    if attempt < self.retry.max_attempts {
                        tokio::time::sleep(jittered(backoff)).await;
                        backoff *= 2;
                    }
                }
            }
        }
        tracing::error!(
            task_instance_id = ctx.task_instance_id,
            kind = %kind,
            attempts = self.retry.max_attempts,
            "Gave up delivering message, master will reconcile via timeout"
        );
    }

    /// Forward a task alert to the alert service. Best-effort.
    pub async fn alert(&self, info: &TaskAlertInfo, status: ExecutionStatus) {
        let strategy = if status.is_success() {
            WarningType::Success
        } else {
            WarningType::Failure
        };
        if let Err(e) = self
            .alert_client
            .send_alert(info.alert_group_id, &info.title, &info.content, strategy.code())
            .await
        {
            tracing::error!(
                alert_group_id = info.alert_group_id,
                error = %e,
                "Failed to send task alert"
            );
        }
    }
}

fn jittered(base: std::time::Duration) -> std::time::Duration {
    let factor = rand::thread_rng().gen_range(0.8..1.2);
    base.mul_f64(factor)
}
