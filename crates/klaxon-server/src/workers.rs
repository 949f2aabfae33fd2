use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use klaxon_app::error::AppError;
use klaxon_app::escalation_service::{EscalationOutcome, EscalationService};
use klaxon_core::channel::Channel;
use klaxon_ports::error::{NotifyError, PortError};
use klaxon_ports::outbound::{JobQueue, Notifier};
use klaxon_ports::types::{JobPayload, JobState, QueueName, QueuedJob};

#[derive(Debug, Error)]
pub enum JobError {
    #[error("{0} job delivered to the {1} queue")]
    WrongQueue(&'static str, &'static str),
    #[error(transparent)]
    App(#[from] AppError),
    #[error("no notifier for channel {0}")]
    NoNotifier(&'static str),
    #[error("delivery failed: {0}")]
    Notify(#[from] NotifyError),
}

/// Work done for one claimed job. An error sends the job back through the
/// queue's retry path.
#[async_trait]
pub trait JobHandler: Send + Sync + 'static {
    fn queue(&self) -> QueueName;
    async fn handle(&self, job: &QueuedJob, now: DateTime<Utc>) -> Result<(), JobError>;
}

pub struct EscalationHandler {
    service: EscalationService,
}

impl EscalationHandler {
    pub fn new(service: EscalationService) -> Self {
        Self { service }
    }
}

#[async_trait]
impl JobHandler for EscalationHandler {
    fn queue(&self) -> QueueName {
        QueueName::Escalation
    }

    async fn handle(&self, job: &QueuedJob, now: DateTime<Utc>) -> Result<(), JobError> {
        let JobPayload::Escalation(escalation) = &job.payload else {
            return Err(JobError::WrongQueue("notification", "escalation"));
        };
        match self.service.process(escalation, now).await? {
            EscalationOutcome::Skipped => {
                debug!(key = %job.key, "escalation job was a no-op");
            }
            EscalationOutcome::Fired { notified, next } => {
                info!(
                    key = %job.key,
                    notified = notified.len(),
                    next_level = next.as_ref().map(|n| n.level),
                    "escalation level fired"
                );
            }
        }
        Ok(())
    }
}

/// Hands notification jobs to the notifier registered for their channel.
pub struct DeliveryHandler {
    notifiers: HashMap<Channel, Arc<dyn Notifier>>,
}

impl DeliveryHandler {
    pub fn new(notifiers: impl IntoIterator<Item = Arc<dyn Notifier>>) -> Self {
        let notifiers = notifiers.into_iter().map(|n| (n.channel(), n)).collect();
        Self { notifiers }
    }
}

#[async_trait]
impl JobHandler for DeliveryHandler {
    fn queue(&self) -> QueueName {
        QueueName::Notification
    }

    async fn handle(&self, job: &QueuedJob, _now: DateTime<Utc>) -> Result<(), JobError> {
        let JobPayload::Notification(notification) = &job.payload else {
            return Err(JobError::WrongQueue("escalation", "notification"));
        };
        let notifier = self
            .notifiers
            .get(&notification.channel)
            .ok_or(JobError::NoNotifier(notification.channel.as_str()))?;
        let result = notifier.notify(notification).await?;
        debug!(
            key = %job.key,
            attempt = job.attempts,
            external_id = result.external_id.as_deref().unwrap_or("-"),
            "notification delivered"
        );
        Ok(())
    }
}

/// Polls one queue and runs claimed jobs, at most `concurrency` at a time.
pub struct Worker {
    queue: Arc<dyn JobQueue>,
    handler: Arc<dyn JobHandler>,
    concurrency: usize,
    poll_interval: Duration,
    lease: chrono::Duration,
}

impl Worker {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        handler: Arc<dyn JobHandler>,
        concurrency: usize,
        poll_interval: Duration,
        lease: chrono::Duration,
    ) -> Self {
        Self {
            queue,
            handler,
            concurrency: concurrency.max(1),
            poll_interval,
            lease,
        }
    }

    /// Claims one batch of jobs due at `now` and runs it to completion.
    /// Returns how many jobs were claimed.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<usize, PortError> {
        let jobs = self
            .queue
            .claim_due(self.handler.queue(), now, self.concurrency as u32, self.lease)
            .await?;
        let claimed = jobs.len();
        let mut running = JoinSet::new();
        for job in jobs {
            let (queue, handler) = (self.queue.clone(), self.handler.clone());
            running.spawn(async move { execute(queue.as_ref(), handler.as_ref(), job, now).await });
        }
        while let Some(joined) = running.join_next().await {
            if let Err(err) = joined {
                error!(%err, "job task panicked");
            }
        }
        Ok(claimed)
    }

    /// Runs until `shutdown` resolves, then waits for in-flight jobs.
    pub async fn run(self, shutdown: impl Future<Output = ()>) {
        let queue_name = self.handler.queue().as_str();
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut running = JoinSet::new();
        tokio::pin!(shutdown);
        info!(queue = queue_name, concurrency = self.concurrency, "worker started");

        loop {
            while let Some(joined) = running.try_join_next() {
                if let Err(err) = joined {
                    error!(queue = queue_name, %err, "job task panicked");
                }
            }

            let free = semaphore.available_permits();
            if free > 0 {
                match self
                    .queue
                    .claim_due(self.handler.queue(), Utc::now(), free as u32, self.lease)
                    .await
                {
                    Ok(jobs) => {
                        for job in jobs {
                            let Ok(permit) = semaphore.clone().acquire_owned().await else {
                                break;
                            };
                            let (queue, handler) = (self.queue.clone(), self.handler.clone());
                            running.spawn(async move {
                                execute(queue.as_ref(), handler.as_ref(), job, Utc::now()).await;
                                drop(permit);
                            });
                        }
                    }
                    Err(err) => {
                        error!(queue = queue_name, %err, "failed to claim jobs (will retry)");
                    }
                }
            }

            tokio::select! {
                () = &mut shutdown => break,
                () = tokio::time::sleep(self.poll_interval) => {}
            }
        }

        info!(queue = queue_name, running = running.len(), "worker stopping, awaiting running jobs");
        while running.join_next().await.is_some() {}
    }
}

async fn execute(
    queue: &dyn JobQueue,
    handler: &dyn JobHandler,
    job: QueuedJob,
    now: DateTime<Utc>,
) {
    let outcome = handler.handle(&job, now).await;
    match outcome {
        Ok(()) => {
            if let Err(err) = queue.complete(&job.id).await {
                error!(job_id = %job.id, key = %job.key, %err, "failed to mark job completed");
            }
        }
        Err(job_err) => {
            let reason = job_err.to_string();
            match queue.fail(&job.id, &reason, now).await {
                Ok(JobState::Failed) => error!(
                    job_id = %job.id,
                    key = %job.key,
                    attempts = job.attempts,
                    err = %reason,
                    "job failed permanently"
                ),
                Ok(JobState::Scheduled) => warn!(
                    job_id = %job.id,
                    key = %job.key,
                    attempts = job.attempts,
                    err = %reason,
                    "job failed, retrying with backoff"
                ),
                Ok(state) => debug!(
                    job_id = %job.id,
                    key = %job.key,
                    state = state.as_str(),
                    "failed job was already settled"
                ),
                Err(err) => error!(job_id = %job.id, key = %job.key, %err, "failed to record job failure"),
            }
        }
    }
}
