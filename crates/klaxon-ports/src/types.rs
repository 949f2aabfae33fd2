use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use klaxon_core::alert::Severity;
use klaxon_core::channel::{Channel, NotificationPriority};
use klaxon_core::escalation::EscalationJob;
use klaxon_core::ids::{AlertId, IncidentId, IntegrationId, PolicyId, ServiceId, TeamId, UserId};

/// A webhook endpoint. Its key is the path segment senders post to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Integration {
    pub id: IntegrationId,
    pub key: String,
    pub name: String,
    pub service_id: ServiceId,
    pub team_id: TeamId,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub id: ServiceId,
    pub team_id: TeamId,
    pub name: String,
    pub escalation_policy_id: Option<PolicyId>,
}

/// Result of one webhook delivery.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestReport {
    pub alerts_processed: usize,
    pub alert_ids: Vec<AlertId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueName {
    Escalation,
    Notification,
}

impl QueueName {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Escalation => "escalation",
            Self::Notification => "notification",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Scheduled,
    Active,
    Completed,
    Failed,
    Canceled,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "scheduled" => Some(Self::Scheduled),
            "active" => Some(Self::Active),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "canceled" => Some(Self::Canceled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Canceled)
    }
}

const MAX_BACKOFF_SECS: u64 = 7 * 24 * 60 * 60;

/// Exponential retry spacing: `base`, `2 * base`, `4 * base`, ...
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Backoff {
    pub base_secs: u64,
}

impl Backoff {
    pub fn exponential(base_secs: u64) -> Self {
        Self { base_secs }
    }

    /// Delay before the retry that follows failed attempt number `attempt`
    /// (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(16);
        let secs = self.base_secs.saturating_mul(factor).min(MAX_BACKOFF_SECS);
        Duration::seconds(secs as i64)
    }
}

/// One delivery of an escalation wave to one user on one channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationJob {
    pub incident_id: IncidentId,
    pub incident_number: u64,
    pub title: String,
    pub severity: Severity,
    pub user_id: UserId,
    pub channel: Channel,
    pub priority: NotificationPriority,
    pub level: u32,
    pub repetition: u32,
}

impl NotificationJob {
    /// Identity of the delivery within its wave; re-enqueueing the same wave
    /// replaces the pending delivery.
    pub fn key(&self) -> String {
        format!(
            "notify:{}:{}:{}:{}.{}",
            self.incident_id,
            self.user_id,
            self.channel.as_str(),
            self.level,
            self.repetition
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "job", rename_all = "lowercase")]
pub enum JobPayload {
    Escalation(EscalationJob),
    Notification(NotificationJob),
}

impl JobPayload {
    pub fn queue(&self) -> QueueName {
        match self {
            Self::Escalation(_) => QueueName::Escalation,
            Self::Notification(_) => QueueName::Notification,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSpec {
    pub key: String,
    pub payload: JobPayload,
    pub delay: Duration,
    pub max_attempts: u32,
    pub backoff: Backoff,
    /// Lower values are claimed first among due jobs.
    pub priority: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedJob {
    pub id: String,
    pub key: String,
    pub payload: JobPayload,
    pub state: JobState,
    pub priority: u8,
    pub run_at: DateTime<Utc>,
    pub attempts: u32,
    pub max_attempts: u32,
    pub backoff: Backoff,
    pub last_error: Option<String>,
    /// Set while active; once passed, the job can be claimed again.
    pub locked_until: Option<DateTime<Utc>>,
}

/// Delivery metadata returned by notifiers.
#[derive(Debug, Clone, Default)]
pub struct NotifyResult {
    pub external_id: Option<String>,
    pub metadata: HashMap<String, String>,
}
