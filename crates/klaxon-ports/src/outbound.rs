use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use klaxon_core::alert::{Alert, NormalizedAlert, Severity, Status};
use klaxon_core::channel::Channel;
use klaxon_core::escalation::EscalationPolicy;
use klaxon_core::events::DomainEvent;
use klaxon_core::ids::{IncidentId, ScheduleId, ServiceId, TeamId, UserId};
use klaxon_core::incident::{Incident, IncidentStatus};
use klaxon_core::routing::RoutingRule;
use klaxon_core::schedule::{Rotation, ScheduleOverride};

use crate::error::{NotifyError, ParseError, PortError};
use crate::types::{
    Integration, JobSpec, JobState, NotificationJob, NotifyResult, QueueName, QueuedJob, Service,
};

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &NotificationJob) -> Result<NotifyResult, NotifyError>;
    fn channel(&self) -> Channel;
}

#[async_trait]
pub trait AlertRepository: Send + Sync {
    /// Fails with `PortError::Conflict` when another alert with the same
    /// fingerprint is already firing.
    async fn insert(&self, alert: &Alert) -> Result<(), PortError>;
    /// Writes `alert` only if the stored copy still has status `expected` and
    /// the revision `alert` was read at. On success the revision advances;
    /// returns whether the write happened.
    async fn update(&self, alert: &mut Alert, expected: Status) -> Result<bool, PortError>;
    async fn find_by_id(&self, id: &str) -> Result<Option<Alert>, PortError>;
    async fn find_firing_by_fingerprint(&self, fp: &str) -> Result<Option<Alert>, PortError>;
    /// Firing or acknowledged alerts with this fingerprint, newest first.
    async fn find_open_by_fingerprint(&self, fp: &str) -> Result<Vec<Alert>, PortError>;
    async fn find_by_incident(&self, incident_id: &IncidentId) -> Result<Vec<Alert>, PortError>;
    async fn count_firing_for_incident(&self, incident_id: &IncidentId)
        -> Result<u64, PortError>;
}

#[async_trait]
pub trait IncidentRepository: Send + Sync {
    async fn next_number(&self) -> Result<u64, PortError>;
    /// Fails with `PortError::Conflict` when a triggered incident already
    /// exists for the same service and severity.
    async fn insert(&self, incident: &Incident) -> Result<(), PortError>;
    /// Same contract as [`AlertRepository::update`]: status and revision must
    /// both match.
    async fn update(
        &self,
        incident: &mut Incident,
        expected: IncidentStatus,
    ) -> Result<bool, PortError>;
    async fn find_by_id(&self, id: &str) -> Result<Option<Incident>, PortError>;
    async fn find_triggered(
        &self,
        service_id: &ServiceId,
        severity: Severity,
    ) -> Result<Option<Incident>, PortError>;
}

#[async_trait]
pub trait IntegrationRepository: Send + Sync {
    async fn save(&self, integration: &Integration) -> Result<(), PortError>;
    async fn find_by_key(&self, key: &str) -> Result<Option<Integration>, PortError>;
}

#[async_trait]
pub trait ServiceRepository: Send + Sync {
    async fn save(&self, service: &Service) -> Result<(), PortError>;
    async fn find_by_id(&self, id: &str) -> Result<Option<Service>, PortError>;
}

#[async_trait]
pub trait EscalationRepository: Send + Sync {
    async fn save(&self, policy: &EscalationPolicy) -> Result<(), PortError>;
    async fn find_by_id(&self, id: &str) -> Result<Option<EscalationPolicy>, PortError>;
}

#[async_trait]
pub trait RoutingRuleRepository: Send + Sync {
    async fn save(&self, rule: &RoutingRule) -> Result<(), PortError>;
    async fn enabled_for_team(&self, team_id: &TeamId) -> Result<Vec<RoutingRule>, PortError>;
}

#[async_trait]
pub trait ScheduleRepository: Send + Sync {
    async fn save_rotation(&self, rotation: &Rotation) -> Result<(), PortError>;
    async fn save_override(&self, ovr: &ScheduleOverride) -> Result<(), PortError>;
    async fn rotations_for(&self, schedule_id: &ScheduleId) -> Result<Vec<Rotation>, PortError>;
    async fn overrides_for(
        &self,
        schedule_id: &ScheduleId,
    ) -> Result<Vec<ScheduleOverride>, PortError>;
}

#[async_trait]
pub trait TeamDirectory: Send + Sync {
    async fn add_member(&self, team_id: &TeamId, user_id: &UserId, active: bool)
        -> Result<(), PortError>;
    async fn active_members(&self, team_id: &TeamId) -> Result<Vec<UserId>, PortError>;
    async fn set_channels(&self, user_id: &UserId, channels: &[Channel]) -> Result<(), PortError>;
    /// Channels the user accepts notifications on, in preference order.
    async fn channels_for(&self, user_id: &UserId) -> Result<Vec<Channel>, PortError>;
}

/// Durable, time-aware job queue with unique keys.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Schedules `spec` to become due after its delay. Any unfinished job with
    /// the same key is replaced. Returns the new job id.
    async fn enqueue(&self, spec: JobSpec, now: DateTime<Utc>) -> Result<String, PortError>;
    async fn cancel(&self, key: &str) -> Result<bool, PortError>;
    /// Cancels every unfinished job whose key starts with `prefix`.
    async fn cancel_prefix(&self, prefix: &str) -> Result<u64, PortError>;
    async fn state(&self, key: &str) -> Result<Option<JobState>, PortError>;
    /// Marks up to `limit` due jobs active for `lease` and returns them. An
    /// active job whose lease ran out is due again, so a worker that died
    /// mid-job doesn't strand it.
    async fn claim_due(
        &self,
        queue: QueueName,
        now: DateTime<Utc>,
        limit: u32,
        lease: Duration,
    ) -> Result<Vec<QueuedJob>, PortError>;
    /// No-op when the job was canceled or replaced meanwhile.
    async fn complete(&self, job_id: &str) -> Result<(), PortError>;
    /// Reschedules with backoff, or marks the job failed once its attempts
    /// are used up. Returns the resulting state.
    async fn fail(&self, job_id: &str, error: &str, now: DateTime<Utc>)
        -> Result<JobState, PortError>;
}

#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, events: Vec<DomainEvent>) -> Result<(), PortError>;
}

pub trait AlertSourceParser: Send + Sync {
    fn parse(
        &self,
        payload: &serde_json::Value,
        headers: &HashMap<String, String>,
    ) -> Result<Vec<NormalizedAlert>, ParseError>;
    fn source_name(&self) -> &str;
}

/// Turns a raw webhook body into normalized alerts, either for a named
/// vendor or by sniffing the payload shape.
pub trait PayloadNormalizer: Send + Sync {
    fn normalize(
        &self,
        vendor: Option<&str>,
        body: &[u8],
        headers: &HashMap<String, String>,
    ) -> Result<Vec<NormalizedAlert>, ParseError>;
}
