use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use klaxon_core::channel::Channel;
use klaxon_core::escalation::{escalation_key_prefix, EscalationJob, EscalationTarget};
use klaxon_core::events::{DomainEvent, EscalationExhausted, EscalationFired};
use klaxon_core::ids::{IncidentId, UserId};
use klaxon_core::incident::{Incident, IncidentStatus};
use klaxon_ports::error::PortError;
use klaxon_ports::outbound::{
    EscalationRepository, EventPublisher, IncidentRepository, JobQueue, ServiceRepository,
    TeamDirectory,
};
use klaxon_ports::types::{Backoff, JobPayload, JobSpec};

use crate::error::AppError;
use crate::notification_dispatcher::NotificationDispatcher;
use crate::oncall_service::OnCallService;

pub const ESCALATION_MAX_ATTEMPTS: u32 = 3;

/// Timeline writes retried while grouping keeps touching the incident.
const RECORD_ATTEMPTS: usize = 3;

/// What processing one escalation job did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EscalationOutcome {
    /// The incident was no longer triggered; nothing was sent.
    Skipped,
    Fired {
        notified: Vec<UserId>,
        next: Option<EscalationJob>,
    },
}

#[derive(Clone)]
pub struct EscalationService {
    queue: Arc<dyn JobQueue>,
    incidents: Arc<dyn IncidentRepository>,
    services: Arc<dyn ServiceRepository>,
    policies: Arc<dyn EscalationRepository>,
    teams: Arc<dyn TeamDirectory>,
    oncall: OnCallService,
    dispatcher: NotificationDispatcher,
    events: Arc<dyn EventPublisher>,
    backoff: Backoff,
}

impl EscalationService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        queue: Arc<dyn JobQueue>,
        incidents: Arc<dyn IncidentRepository>,
        services: Arc<dyn ServiceRepository>,
        policies: Arc<dyn EscalationRepository>,
        teams: Arc<dyn TeamDirectory>,
        oncall: OnCallService,
        dispatcher: NotificationDispatcher,
        events: Arc<dyn EventPublisher>,
        backoff: Backoff,
    ) -> Self {
        Self {
            queue,
            incidents,
            services,
            policies,
            teams,
            oncall,
            dispatcher,
            events,
            backoff,
        }
    }

    /// Schedules the first level of the policy attached to the incident's
    /// service. Returns the job id, or `None` when no policy applies.
    pub async fn start(
        &self,
        incident: &Incident,
        now: DateTime<Utc>,
    ) -> Result<Option<String>, AppError> {
        let service_id = incident.service_id().to_string();
        let Some(service) = self.services.find_by_id(&service_id).await? else {
            warn!(service_id = %service_id, "incident service not found, not escalating");
            return Ok(None);
        };
        let Some(policy_id) = service.escalation_policy_id else {
            debug!(service_id = %service_id, "service has no escalation policy");
            return Ok(None);
        };
        let Some(policy) = self.policies.find_by_id(&policy_id.to_string()).await? else {
            warn!(policy_id = %policy_id, "escalation policy not found, not escalating");
            return Ok(None);
        };
        let first = policy.first_level();
        let job = EscalationJob {
            incident_id: incident.id().clone(),
            policy_id,
            level: first.level(),
            repetition: 0,
        };
        self.schedule_escalation(job, first.delay(), now)
            .await
            .map(Some)
    }

    /// Enqueues the wave for `(incident, level)`, replacing any pending job
    /// for the same pair.
    pub async fn schedule_escalation(
        &self,
        job: EscalationJob,
        delay: Duration,
        now: DateTime<Utc>,
    ) -> Result<String, AppError> {
        let incident_id = job.incident_id.clone();
        let (level, repetition) = (job.level, job.repetition);
        let spec = JobSpec {
            key: job.key(),
            payload: JobPayload::Escalation(job),
            delay,
            max_attempts: ESCALATION_MAX_ATTEMPTS,
            backoff: self.backoff,
            priority: 0,
        };
        let job_id = self.queue.enqueue(spec, now).await?;
        info!(
            incident_id = %incident_id,
            level,
            repetition,
            delay_minutes = delay.num_minutes(),
            "escalation scheduled"
        );
        Ok(job_id)
    }

    /// Drops every unfinished escalation job of the incident, all levels.
    pub async fn cancel_escalation(&self, incident_id: &IncidentId) -> Result<u64, AppError> {
        let canceled = self
            .queue
            .cancel_prefix(&escalation_key_prefix(incident_id))
            .await?;
        info!(incident_id = %incident_id, canceled, "escalation canceled");
        Ok(canceled)
    }

    /// Fires one wave. The incident status is re-read first: a job that
    /// outlived its incident's `triggered` state does nothing.
    pub async fn process(
        &self,
        job: &EscalationJob,
        now: DateTime<Utc>,
    ) -> Result<EscalationOutcome, AppError> {
        let incident_id = job.incident_id.to_string();
        let Some(incident) = self.incidents.find_by_id(&incident_id).await? else {
            debug!(incident_id = %incident_id, "escalation for unknown incident skipped");
            return Ok(EscalationOutcome::Skipped);
        };
        if incident.status() != IncidentStatus::Triggered {
            debug!(
                incident_id = %incident_id,
                status = incident.status().as_str(),
                level = job.level,
                "incident no longer triggered, escalation skipped"
            );
            return Ok(EscalationOutcome::Skipped);
        }

        let policy = self
            .policies
            .find_by_id(&job.policy_id.to_string())
            .await?
            .ok_or(AppError::NotFound("escalation policy"))?;
        let level = policy
            .level(job.level)
            .ok_or(AppError::NotFound("escalation level"))?;

        let notified = self.resolve_targets(level.targets(), now).await?;
        for user_id in &notified {
            let mut channels = self.teams.channels_for(user_id).await?;
            if channels.is_empty() {
                channels.push(Channel::Email);
            }
            self.dispatcher
                .dispatch(&incident, user_id, &channels, job.level, job.repetition, now)
                .await?;
        }
        if notified.is_empty() {
            warn!(incident_id = %incident_id, level = job.level, "escalation level resolved to nobody");
        }

        if !self.record_wave(incident, job, notified.len(), now).await? {
            // Acknowledged or resolved while the wave went out.
            debug!(incident_id = %incident_id, "incident changed during escalation, stopping");
            return Ok(EscalationOutcome::Fired {
                notified,
                next: None,
            });
        }

        let mut events = vec![DomainEvent::EscalationFired(EscalationFired {
            incident_id: job.incident_id.clone(),
            policy_id: job.policy_id.clone(),
            level: job.level,
            repetition: job.repetition,
            notified: notified.clone(),
            occurred_at: now,
        })];
        let next = match policy.next_after(job.level, job.repetition) {
            Some(wave) => {
                let next_job = EscalationJob {
                    incident_id: job.incident_id.clone(),
                    policy_id: job.policy_id.clone(),
                    level: wave.level.level(),
                    repetition: wave.repetition,
                };
                self.schedule_escalation(next_job.clone(), wave.delay, now)
                    .await?;
                if self.still_triggered(&job.incident_id).await? {
                    Some(next_job)
                } else {
                    // The transition's cancel may have run before the enqueue.
                    self.queue.cancel(&next_job.key()).await?;
                    debug!(incident_id = %incident_id, "incident left triggered, next wave withdrawn");
                    None
                }
            }
            None => {
                info!(incident_id = %incident_id, "escalation policy exhausted");
                events.push(DomainEvent::EscalationExhausted(EscalationExhausted {
                    incident_id: job.incident_id.clone(),
                    policy_id: job.policy_id.clone(),
                    occurred_at: now,
                }));
                None
            }
        };
        self.events.publish(events).await?;

        Ok(EscalationOutcome::Fired { notified, next })
    }

    /// Appends the wave to the timeline while the incident stays triggered.
    /// Returns `false` once it was acknowledged or resolved instead.
    async fn record_wave(
        &self,
        mut incident: Incident,
        job: &EscalationJob,
        notified: usize,
        now: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        for _ in 0..RECORD_ATTEMPTS {
            incident.record_escalation(job.level, notified, now);
            if self
                .incidents
                .update(&mut incident, IncidentStatus::Triggered)
                .await?
            {
                return Ok(true);
            }
            match self.incidents.find_by_id(&job.incident_id.to_string()).await? {
                Some(current) if current.status() == IncidentStatus::Triggered => {
                    incident = current;
                }
                _ => return Ok(false),
            }
        }
        Err(PortError::Conflict(format!(
            "incident {} kept changing during escalation",
            job.incident_id
        ))
        .into())
    }

    async fn still_triggered(&self, incident_id: &IncidentId) -> Result<bool, AppError> {
        Ok(self
            .incidents
            .find_by_id(&incident_id.to_string())
            .await?
            .is_some_and(|i| i.status() == IncidentStatus::Triggered))
    }

    /// Expands targets into distinct users, keeping first-seen order.
    async fn resolve_targets(
        &self,
        targets: &[EscalationTarget],
        at: DateTime<Utc>,
    ) -> Result<Vec<UserId>, AppError> {
        let mut users: Vec<UserId> = Vec::new();
        for target in targets {
            let resolved = match target {
                EscalationTarget::User(user_id) => vec![user_id.clone()],
                EscalationTarget::Team(team_id) => self.teams.active_members(team_id).await?,
                EscalationTarget::Schedule(schedule_id) => {
                    match self.oncall.resolve_on_call(schedule_id, at).await {
                        Some(on_call) => vec![on_call.user_id],
                        None => {
                            warn!(schedule_id = %schedule_id, "nobody on call for escalation target");
                            vec![]
                        }
                    }
                }
            };
            for user in resolved {
                if !users.contains(&user) {
                    users.push(user);
                }
            }
        }
        Ok(users)
    }
}
