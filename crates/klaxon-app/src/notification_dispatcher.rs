use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use klaxon_core::channel::{Channel, NotificationPriority};
use klaxon_core::ids::UserId;
use klaxon_core::incident::Incident;
use klaxon_ports::outbound::JobQueue;
use klaxon_ports::types::{Backoff, JobPayload, JobSpec, NotificationJob};

use crate::error::AppError;

/// Turns one escalation wave for one user into queued deliveries. Delivery
/// itself happens in the notification worker.
#[derive(Clone)]
pub struct NotificationDispatcher {
    queue: Arc<dyn JobQueue>,
    backoff: Backoff,
}

impl NotificationDispatcher {
    pub fn new(queue: Arc<dyn JobQueue>, backoff: Backoff) -> Self {
        Self { queue, backoff }
    }

    /// Enqueues one delivery per channel and returns how many were queued.
    pub async fn dispatch(
        &self,
        incident: &Incident,
        user_id: &UserId,
        channels: &[Channel],
        level: u32,
        repetition: u32,
        now: DateTime<Utc>,
    ) -> Result<usize, AppError> {
        let priority = NotificationPriority::from(incident.severity());
        for channel in channels {
            let job = NotificationJob {
                incident_id: incident.id().clone(),
                incident_number: incident.number(),
                title: incident.title().to_string(),
                severity: incident.severity(),
                user_id: user_id.clone(),
                channel: *channel,
                priority,
                level,
                repetition,
            };
            let spec = JobSpec {
                key: job.key(),
                payload: JobPayload::Notification(job),
                delay: Duration::zero(),
                max_attempts: channel.max_attempts(),
                backoff: self.backoff,
                priority: priority.queue_priority(),
            };
            self.queue.enqueue(spec, now).await?;
        }
        debug!(
            incident_id = %incident.id(),
            user_id = %user_id,
            channels = channels.len(),
            "notifications queued"
        );
        Ok(channels.len())
    }
}
