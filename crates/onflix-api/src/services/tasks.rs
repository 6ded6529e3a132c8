//! Best-effort background tasks.
//!
//! Requests hand work to a bounded channel drained by a single worker.
//! Delivery is at most once: a full queue drops the task, and a failed
//! task is logged and counted but never retried.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use onflix_billing::BillingProvider;
use onflix_store::Repositories;

use crate::metrics;
use crate::services::notifier::{Email, Notifier};

/// Work that may run after the response is sent.
#[derive(Debug, Clone, PartialEq)]
pub enum BackgroundTask {
    IncrementViewCount { content_id: String },
    SendEmail(Email),
    /// Cancel a provider subscription right away, e.g. after account deletion.
    CancelProviderSubscription { stripe_subscription_id: String },
}

impl BackgroundTask {
    pub fn kind(&self) -> &'static str {
        match self {
            BackgroundTask::IncrementViewCount { .. } => "increment_view_count",
            BackgroundTask::SendEmail(_) => "send_email",
            BackgroundTask::CancelProviderSubscription { .. } => "cancel_provider_subscription",
        }
    }
}

/// Producer handle. Cheap to clone.
#[derive(Clone)]
pub struct TaskQueue {
    tx: mpsc::Sender<BackgroundTask>,
}

impl TaskQueue {
    /// A queue and the receiving end for its worker.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<BackgroundTask>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Hand off a task without waiting. Returns false if it was dropped.
    pub fn enqueue(&self, task: BackgroundTask) -> bool {
        let kind = task.kind();
        match self.tx.try_send(task) {
            Ok(()) => {
                metrics::record_task_enqueued(kind);
                true
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(task = kind, "Background queue full, task dropped");
                metrics::record_task_dropped(kind);
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!(task = kind, "Background worker stopped, task dropped");
                metrics::record_task_dropped(kind);
                false
            }
        }
    }

    pub fn send_email(&self, email: Email) -> bool {
        self.enqueue(BackgroundTask::SendEmail(email))
    }
}

/// Consumer side of the queue.
pub struct TaskWorker {
    rx: mpsc::Receiver<BackgroundTask>,
    repos: Repositories,
    billing: Arc<dyn BillingProvider>,
    notifier: Arc<dyn Notifier>,
}

impl TaskWorker {
    pub fn new(
        rx: mpsc::Receiver<BackgroundTask>,
        repos: Repositories,
        billing: Arc<dyn BillingProvider>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            rx,
            repos,
            billing,
            notifier,
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Drain the queue until every producer is dropped.
    pub async fn run(mut self) {
        info!("Background task worker started");
        while let Some(task) = self.rx.recv().await {
            let kind = task.kind();
            if let Err(e) = self.execute(task).await {
                warn!(task = kind, error = %e, "Background task failed");
                metrics::record_task_failed(kind);
            }
        }
        info!("Background task worker stopped");
    }

    async fn execute(&self, task: BackgroundTask) -> anyhow::Result<()> {
        match task {
            BackgroundTask::IncrementViewCount { content_id } => {
                if !self.repos.content.increment_views(&content_id).await? {
                    debug!(content_id = %content_id, "View count target vanished");
                }
            }
            BackgroundTask::SendEmail(email) => {
                self.notifier.send(&email).await?;
            }
            BackgroundTask::CancelProviderSubscription {
                stripe_subscription_id,
            } => {
                self.billing
                    .cancel_subscription(&stripe_subscription_id, false)
                    .await?;
                info!(
                    stripe_subscription_id = %stripe_subscription_id,
                    "Provider subscription cancelled"
                );
            }
        }
        Ok(())
    }
}
