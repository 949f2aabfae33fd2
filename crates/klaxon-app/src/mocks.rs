//! In-memory port implementations shared by the service tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use klaxon_core::alert::{Alert, NormalizedAlert, Severity, Status};
use klaxon_core::channel::Channel;
use klaxon_core::escalation::{EscalationJob, EscalationPolicy};
use klaxon_core::events::DomainEvent;
use klaxon_core::ids::{
    AlertId, IncidentId, IntegrationId, ScheduleId, ServiceId, TeamId, UserId,
};
use klaxon_core::incident::{Incident, IncidentStatus};
use klaxon_core::routing::RoutingRule;
use klaxon_core::schedule::{Rotation, ScheduleOverride};
use klaxon_ports::error::{ParseError, PortError};
use klaxon_ports::outbound::*;
use klaxon_ports::types::*;

use crate::alert_service::AlertService;
use crate::escalation_service::EscalationService;
use crate::incident_service::IncidentService;
use crate::notification_dispatcher::NotificationDispatcher;
use crate::oncall_service::OnCallService;
use crate::router::RoutingEngine;

pub fn ts(s: &str) -> DateTime<Utc> {
    chrono::DateTime::parse_from_rfc3339(s)
        .unwrap()
        .with_timezone(&Utc)
}

pub fn now() -> DateTime<Utc> {
    ts("2025-01-15T10:00:00Z")
}

/// Runs once, at the point a test wants a concurrent writer to get in.
pub type Interleave = Box<dyn FnOnce() + Send>;

fn run_hook(hook: &Mutex<Option<Interleave>>) {
    let hook = hook.lock().unwrap().take();
    if let Some(hook) = hook {
        hook();
    }
}

#[derive(Default)]
pub struct MockAlertRepo {
    pub alerts: Mutex<Vec<Alert>>,
    /// Fired just before the next `update` compares revisions.
    pub before_update: Mutex<Option<Interleave>>,
}

impl MockAlertRepo {
    /// Applies `change` to the stored alert the way another writer would.
    pub fn change_stored(&self, id: &AlertId, change: impl FnOnce(&mut Alert)) {
        let mut alerts = self.alerts.lock().unwrap();
        let stored = alerts.iter_mut().find(|a| a.id() == id).unwrap();
        change(stored);
        stored.set_revision(stored.revision() + 1);
    }
}

#[async_trait]
impl AlertRepository for MockAlertRepo {
    async fn insert(&self, alert: &Alert) -> Result<(), PortError> {
        let mut alerts = self.alerts.lock().unwrap();
        let clash = alert.status() == Status::Firing
            && alerts
                .iter()
                .any(|a| a.status() == Status::Firing && a.fingerprint() == alert.fingerprint());
        if clash {
            return Err(PortError::Conflict("firing fingerprint".into()));
        }
        alerts.push(alert.clone());
        Ok(())
    }
    async fn update(&self, alert: &mut Alert, expected: Status) -> Result<bool, PortError> {
        run_hook(&self.before_update);
        let mut alerts = self.alerts.lock().unwrap();
        match alerts.iter_mut().find(|a| a.id() == alert.id()) {
            Some(stored) if stored.status() == expected && stored.revision() == alert.revision() => {
                alert.set_revision(alert.revision() + 1);
                *stored = alert.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }
    async fn find_by_id(&self, id: &str) -> Result<Option<Alert>, PortError> {
        let alerts = self.alerts.lock().unwrap();
        Ok(alerts.iter().find(|a| a.id().to_string() == id).cloned())
    }
    async fn find_firing_by_fingerprint(&self, fp: &str) -> Result<Option<Alert>, PortError> {
        let alerts = self.alerts.lock().unwrap();
        Ok(alerts
            .iter()
            .find(|a| a.status() == Status::Firing && a.fingerprint().as_str() == fp)
            .cloned())
    }
    async fn find_open_by_fingerprint(&self, fp: &str) -> Result<Vec<Alert>, PortError> {
        let alerts = self.alerts.lock().unwrap();
        Ok(alerts
            .iter()
            .rev()
            .filter(|a| {
                matches!(a.status(), Status::Firing | Status::Acknowledged)
                    && a.fingerprint().as_str() == fp
            })
            .cloned()
            .collect())
    }
    async fn find_by_incident(&self, incident_id: &IncidentId) -> Result<Vec<Alert>, PortError> {
        let alerts = self.alerts.lock().unwrap();
        Ok(alerts
            .iter()
            .filter(|a| a.incident_id() == Some(incident_id))
            .cloned()
            .collect())
    }
    async fn count_firing_for_incident(&self, incident_id: &IncidentId) -> Result<u64, PortError> {
        let alerts = self.alerts.lock().unwrap();
        Ok(alerts
            .iter()
            .filter(|a| a.incident_id() == Some(incident_id) && a.status() == Status::Firing)
            .count() as u64)
    }
}

#[derive(Default)]
pub struct MockIncidentRepo {
    pub incidents: Mutex<Vec<Incident>>,
    counter: Mutex<u64>,
}

impl MockIncidentRepo {
    pub fn change_stored(&self, id: &IncidentId, change: impl FnOnce(&mut Incident)) {
        let mut incidents = self.incidents.lock().unwrap();
        let stored = incidents.iter_mut().find(|i| i.id() == id).unwrap();
        change(stored);
        stored.set_revision(stored.revision() + 1);
    }
}

#[async_trait]
impl IncidentRepository for MockIncidentRepo {
    async fn next_number(&self) -> Result<u64, PortError> {
        let mut counter = self.counter.lock().unwrap();
        *counter += 1;
        Ok(*counter)
    }
    async fn insert(&self, incident: &Incident) -> Result<(), PortError> {
        let mut incidents = self.incidents.lock().unwrap();
        let clash = incidents.iter().any(|i| {
            i.status() == IncidentStatus::Triggered
                && i.service_id() == incident.service_id()
                && i.severity() == incident.severity()
        });
        if clash {
            return Err(PortError::Conflict("triggered incident exists".into()));
        }
        incidents.push(incident.clone());
        Ok(())
    }
    async fn update(
        &self,
        incident: &mut Incident,
        expected: IncidentStatus,
    ) -> Result<bool, PortError> {
        let mut incidents = self.incidents.lock().unwrap();
        match incidents.iter_mut().find(|i| i.id() == incident.id()) {
            Some(stored)
                if stored.status() == expected && stored.revision() == incident.revision() =>
            {
                incident.set_revision(incident.revision() + 1);
                *stored = incident.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }
    async fn find_by_id(&self, id: &str) -> Result<Option<Incident>, PortError> {
        let incidents = self.incidents.lock().unwrap();
        Ok(incidents.iter().find(|i| i.id().to_string() == id).cloned())
    }
    async fn find_triggered(
        &self,
        service_id: &ServiceId,
        severity: Severity,
    ) -> Result<Option<Incident>, PortError> {
        let incidents = self.incidents.lock().unwrap();
        Ok(incidents
            .iter()
            .find(|i| {
                i.status() == IncidentStatus::Triggered
                    && i.service_id() == service_id
                    && i.severity() == severity
            })
            .cloned())
    }
}

#[derive(Default)]
pub struct MockIntegrationRepo {
    pub integrations: Mutex<Vec<Integration>>,
}

#[async_trait]
impl IntegrationRepository for MockIntegrationRepo {
    async fn save(&self, integration: &Integration) -> Result<(), PortError> {
        self.integrations.lock().unwrap().push(integration.clone());
        Ok(())
    }
    async fn find_by_key(&self, key: &str) -> Result<Option<Integration>, PortError> {
        let integrations = self.integrations.lock().unwrap();
        Ok(integrations.iter().find(|i| i.key == key).cloned())
    }
}

#[derive(Default)]
pub struct MockServiceRepo {
    pub services: Mutex<Vec<Service>>,
}

#[async_trait]
impl ServiceRepository for MockServiceRepo {
    async fn save(&self, service: &Service) -> Result<(), PortError> {
        self.services.lock().unwrap().push(service.clone());
        Ok(())
    }
    async fn find_by_id(&self, id: &str) -> Result<Option<Service>, PortError> {
        let services = self.services.lock().unwrap();
        Ok(services.iter().find(|s| s.id.to_string() == id).cloned())
    }
}

#[derive(Default)]
pub struct MockEscalationRepo {
    pub policies: Mutex<Vec<EscalationPolicy>>,
}

#[async_trait]
impl EscalationRepository for MockEscalationRepo {
    async fn save(&self, policy: &EscalationPolicy) -> Result<(), PortError> {
        self.policies.lock().unwrap().push(policy.clone());
        Ok(())
    }
    async fn find_by_id(&self, id: &str) -> Result<Option<EscalationPolicy>, PortError> {
        let policies = self.policies.lock().unwrap();
        Ok(policies.iter().find(|p| p.id().to_string() == id).cloned())
    }
}

#[derive(Default)]
pub struct MockRuleRepo {
    pub rules: Mutex<Vec<RoutingRule>>,
    pub fail: bool,
}

#[async_trait]
impl RoutingRuleRepository for MockRuleRepo {
    async fn save(&self, rule: &RoutingRule) -> Result<(), PortError> {
        self.rules.lock().unwrap().push(rule.clone());
        Ok(())
    }
    async fn enabled_for_team(&self, team_id: &TeamId) -> Result<Vec<RoutingRule>, PortError> {
        if self.fail {
            return Err(PortError::Connection("rules store down".into()));
        }
        let rules = self.rules.lock().unwrap();
        Ok(rules
            .iter()
            .filter(|r| r.enabled && &r.team_id == team_id)
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct MockScheduleRepo {
    pub rotations: Mutex<Vec<Rotation>>,
    pub overrides: Mutex<Vec<ScheduleOverride>>,
    pub fail: bool,
}

#[async_trait]
impl ScheduleRepository for MockScheduleRepo {
    async fn save_rotation(&self, rotation: &Rotation) -> Result<(), PortError> {
        self.rotations.lock().unwrap().push(rotation.clone());
        Ok(())
    }
    async fn save_override(&self, ovr: &ScheduleOverride) -> Result<(), PortError> {
        self.overrides.lock().unwrap().push(ovr.clone());
        Ok(())
    }
    async fn rotations_for(&self, schedule_id: &ScheduleId) -> Result<Vec<Rotation>, PortError> {
        if self.fail {
            return Err(PortError::Persistence("schedule table missing".into()));
        }
        let rotations = self.rotations.lock().unwrap();
        Ok(rotations
            .iter()
            .filter(|r| r.schedule_id() == schedule_id)
            .cloned()
            .collect())
    }
    async fn overrides_for(
        &self,
        schedule_id: &ScheduleId,
    ) -> Result<Vec<ScheduleOverride>, PortError> {
        if self.fail {
            return Err(PortError::Persistence("schedule table missing".into()));
        }
        let overrides = self.overrides.lock().unwrap();
        Ok(overrides
            .iter()
            .filter(|o| o.schedule_id() == schedule_id)
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct MockTeamDirectory {
    pub members: Mutex<HashMap<TeamId, Vec<(UserId, bool)>>>,
    pub channels: Mutex<HashMap<UserId, Vec<Channel>>>,
}

#[async_trait]
impl TeamDirectory for MockTeamDirectory {
    async fn add_member(
        &self,
        team_id: &TeamId,
        user_id: &UserId,
        active: bool,
    ) -> Result<(), PortError> {
        self.members
            .lock()
            .unwrap()
            .entry(team_id.clone())
            .or_default()
            .push((user_id.clone(), active));
        Ok(())
    }
    async fn active_members(&self, team_id: &TeamId) -> Result<Vec<UserId>, PortError> {
        let members = self.members.lock().unwrap();
        Ok(members
            .get(team_id)
            .map(|m| {
                m.iter()
                    .filter(|(_, active)| *active)
                    .map(|(u, _)| u.clone())
                    .collect()
            })
            .unwrap_or_default())
    }
    async fn set_channels(&self, user_id: &UserId, channels: &[Channel]) -> Result<(), PortError> {
        self.channels
            .lock()
            .unwrap()
            .insert(user_id.clone(), channels.to_vec());
        Ok(())
    }
    async fn channels_for(&self, user_id: &UserId) -> Result<Vec<Channel>, PortError> {
        let channels = self.channels.lock().unwrap();
        Ok(channels.get(user_id).cloned().unwrap_or_default())
    }
}

/// Queue with the replace/cancel/claim semantics of the SQLite adapter.
#[derive(Default)]
pub struct MockJobQueue {
    pub jobs: Mutex<Vec<QueuedJob>>,
    next_id: Mutex<u64>,
    /// Fired before the first enqueue whose key starts with the prefix.
    pub before_enqueue: Mutex<Option<(String, Interleave)>>,
}

impl MockJobQueue {
    pub fn pending(&self) -> Vec<QueuedJob> {
        let jobs = self.jobs.lock().unwrap();
        jobs.iter()
            .filter(|j| !j.state.is_terminal())
            .cloned()
            .collect()
    }

    pub fn pending_escalations(&self) -> Vec<(EscalationJob, DateTime<Utc>)> {
        self.pending()
            .into_iter()
            .filter_map(|j| match j.payload {
                JobPayload::Escalation(e) => Some((e, j.run_at)),
                JobPayload::Notification(_) => None,
            })
            .collect()
    }

    pub fn pending_notifications(&self) -> Vec<QueuedJob> {
        self.pending()
            .into_iter()
            .filter(|j| matches!(j.payload, JobPayload::Notification(_)))
            .collect()
    }
}

#[async_trait]
impl JobQueue for MockJobQueue {
    async fn enqueue(&self, spec: JobSpec, now: DateTime<Utc>) -> Result<String, PortError> {
        let hook = {
            let mut pending = self.before_enqueue.lock().unwrap();
            match pending.take() {
                Some((prefix, hook)) if spec.key.starts_with(&prefix) => Some(hook),
                other => {
                    *pending = other;
                    None
                }
            }
        };
        if let Some(hook) = hook {
            hook();
        }
        let mut jobs = self.jobs.lock().unwrap();
        for job in jobs.iter_mut() {
            if job.key == spec.key && !job.state.is_terminal() {
                job.state = JobState::Canceled;
            }
        }
        let mut next_id = self.next_id.lock().unwrap();
        *next_id += 1;
        let id = format!("job-{}", *next_id);
        jobs.push(QueuedJob {
            id: id.clone(),
            key: spec.key,
            payload: spec.payload,
            state: JobState::Scheduled,
            priority: spec.priority,
            run_at: now + spec.delay,
            attempts: 0,
            max_attempts: spec.max_attempts,
            backoff: spec.backoff,
            last_error: None,
            locked_until: None,
        });
        Ok(id)
    }
    async fn cancel(&self, key: &str) -> Result<bool, PortError> {
        let mut jobs = self.jobs.lock().unwrap();
        let mut canceled = false;
        for job in jobs.iter_mut() {
            if job.key == key && !job.state.is_terminal() {
                job.state = JobState::Canceled;
                canceled = true;
            }
        }
        Ok(canceled)
    }
    async fn cancel_prefix(&self, prefix: &str) -> Result<u64, PortError> {
        let mut jobs = self.jobs.lock().unwrap();
        let mut canceled = 0;
        for job in jobs.iter_mut() {
            if job.key.starts_with(prefix) && !job.state.is_terminal() {
                job.state = JobState::Canceled;
                canceled += 1;
            }
        }
        Ok(canceled)
    }
    async fn state(&self, key: &str) -> Result<Option<JobState>, PortError> {
        let jobs = self.jobs.lock().unwrap();
        Ok(jobs.iter().rev().find(|j| j.key == key).map(|j| j.state))
    }
    async fn claim_due(
        &self,
        queue: QueueName,
        now: DateTime<Utc>,
        limit: u32,
        lease: Duration,
    ) -> Result<Vec<QueuedJob>, PortError> {
        let mut jobs = self.jobs.lock().unwrap();
        let lapsed = |j: &QueuedJob| {
            j.state == JobState::Active && j.locked_until.map_or(true, |until| until <= now)
        };
        for job in jobs.iter_mut() {
            if job.payload.queue() == queue && lapsed(job) && job.attempts >= job.max_attempts {
                job.state = JobState::Failed;
                job.locked_until = None;
            }
        }
        let mut due: Vec<&mut QueuedJob> = jobs
            .iter_mut()
            .filter(|j| {
                j.payload.queue() == queue
                    && ((j.state == JobState::Scheduled && j.run_at <= now) || lapsed(j))
            })
            .collect();
        due.sort_by_key(|j| (j.priority, j.run_at));
        Ok(due
            .into_iter()
            .take(limit as usize)
            .map(|j| {
                j.state = JobState::Active;
                j.attempts += 1;
                j.locked_until = Some(now + lease);
                j.clone()
            })
            .collect())
    }
    async fn complete(&self, job_id: &str) -> Result<(), PortError> {
        let mut jobs = self.jobs.lock().unwrap();
        if let Some(job) = jobs
            .iter_mut()
            .find(|j| j.id == job_id && j.state == JobState::Active)
        {
            job.state = JobState::Completed;
            job.locked_until = None;
        }
        Ok(())
    }
    async fn fail(
        &self,
        job_id: &str,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<JobState, PortError> {
        let mut jobs = self.jobs.lock().unwrap();
        let Some(job) = jobs
            .iter_mut()
            .find(|j| j.id == job_id && j.state == JobState::Active)
        else {
            return Ok(JobState::Canceled);
        };
        job.last_error = Some(error.to_string());
        job.locked_until = None;
        if job.attempts >= job.max_attempts {
            job.state = JobState::Failed;
        } else {
            job.state = JobState::Scheduled;
            job.run_at = now + job.backoff.delay_for(job.attempts);
        }
        Ok(job.state)
    }
}

#[derive(Default)]
pub struct MockEventPublisher {
    pub events: Mutex<Vec<DomainEvent>>,
}

impl MockEventPublisher {
    pub fn types(&self) -> Vec<&'static str> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(DomainEvent::event_type)
            .collect()
    }
}

#[async_trait]
impl EventPublisher for MockEventPublisher {
    async fn publish(&self, events: Vec<DomainEvent>) -> Result<(), PortError> {
        self.events.lock().unwrap().extend(events);
        Ok(())
    }
}

/// Accepts a JSON array of already-normalized alerts.
pub struct JsonNormalizer;

impl PayloadNormalizer for JsonNormalizer {
    fn normalize(
        &self,
        _vendor: Option<&str>,
        body: &[u8],
        _headers: &HashMap<String, String>,
    ) -> Result<Vec<NormalizedAlert>, ParseError> {
        serde_json::from_slice(body).map_err(|e| ParseError::InvalidJson(e.to_string()))
    }
}

/// Every port wired to an in-memory mock, plus the services built on them.
pub struct Harness {
    pub alerts: Arc<MockAlertRepo>,
    pub incidents: Arc<MockIncidentRepo>,
    pub integrations: Arc<MockIntegrationRepo>,
    pub services: Arc<MockServiceRepo>,
    pub policies: Arc<MockEscalationRepo>,
    pub rules: Arc<MockRuleRepo>,
    pub schedules: Arc<MockScheduleRepo>,
    pub teams: Arc<MockTeamDirectory>,
    pub queue: Arc<MockJobQueue>,
    pub events: Arc<MockEventPublisher>,
    pub integration: Integration,
    pub service: Service,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_rules(MockRuleRepo::default())
    }

    pub fn with_rules(rules: MockRuleRepo) -> Self {
        let team_id = TeamId::new();
        let service = Service {
            id: ServiceId::new(),
            team_id: team_id.clone(),
            name: "checkout".into(),
            escalation_policy_id: None,
        };
        let integration = Integration {
            id: IntegrationId::new(),
            key: "prom-key".into(),
            name: "prometheus".into(),
            service_id: service.id.clone(),
            team_id,
            active: true,
        };
        let integrations = MockIntegrationRepo::default();
        integrations
            .integrations
            .lock()
            .unwrap()
            .push(integration.clone());
        let services = MockServiceRepo::default();
        services.services.lock().unwrap().push(service.clone());
        Self {
            alerts: Arc::new(MockAlertRepo::default()),
            incidents: Arc::new(MockIncidentRepo::default()),
            integrations: Arc::new(integrations),
            services: Arc::new(services),
            policies: Arc::new(MockEscalationRepo::default()),
            rules: Arc::new(rules),
            schedules: Arc::new(MockScheduleRepo::default()),
            teams: Arc::new(MockTeamDirectory::default()),
            queue: Arc::new(MockJobQueue::default()),
            events: Arc::new(MockEventPublisher::default()),
            integration,
            service,
        }
    }

    /// Points the harness service at `policy`.
    pub fn use_policy(&mut self, policy: EscalationPolicy) {
        self.service.escalation_policy_id = Some(policy.id().clone());
        let mut services = self.services.services.lock().unwrap();
        services.clear();
        services.push(self.service.clone());
        self.policies.policies.lock().unwrap().push(policy);
    }

    pub fn oncall(&self) -> OnCallService {
        OnCallService::new(self.schedules.clone())
    }

    pub fn dispatcher(&self) -> NotificationDispatcher {
        NotificationDispatcher::new(self.queue.clone(), Backoff::exponential(30))
    }

    pub fn escalations(&self) -> EscalationService {
        EscalationService::new(
            self.queue.clone(),
            self.incidents.clone(),
            self.services.clone(),
            self.policies.clone(),
            self.teams.clone(),
            self.oncall(),
            self.dispatcher(),
            self.events.clone(),
            Backoff::exponential(10),
        )
    }

    pub fn incident_service(&self) -> IncidentService {
        IncidentService::new(
            self.incidents.clone(),
            self.alerts.clone(),
            self.events.clone(),
            self.escalations(),
        )
    }

    pub fn alert_service(&self) -> AlertService {
        AlertService::new(
            self.integrations.clone(),
            self.alerts.clone(),
            Arc::new(JsonNormalizer),
            RoutingEngine::new(self.rules.clone()),
            self.incident_service(),
            self.escalations(),
            self.events.clone(),
        )
    }
}
