use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use klaxon_core::alert::Alert;
use klaxon_core::events::DomainEvent;
use klaxon_core::ids::{IncidentId, ServiceId, UserId};
use klaxon_core::incident::{Incident, IncidentStatus};
use klaxon_ports::error::PortError;
use klaxon_ports::inbound::IncidentManager;
use klaxon_ports::outbound::{AlertRepository, EventPublisher, IncidentRepository};

use crate::error::AppError;
use crate::escalation_service::EscalationService;

/// Attempts at a conditional write before giving up on a contended row.
const MAX_CAS_ATTEMPTS: usize = 3;

#[derive(Clone)]
pub struct IncidentService {
    incidents: Arc<dyn IncidentRepository>,
    alerts: Arc<dyn AlertRepository>,
    events: Arc<dyn EventPublisher>,
    escalations: EscalationService,
}

impl IncidentService {
    pub fn new(
        incidents: Arc<dyn IncidentRepository>,
        alerts: Arc<dyn AlertRepository>,
        events: Arc<dyn EventPublisher>,
        escalations: EscalationService,
    ) -> Self {
        Self {
            incidents,
            alerts,
            events,
            escalations,
        }
    }

    /// Groups the alert into the triggered incident for the same service and
    /// severity, opening a new one if there is none. The flag tells whether
    /// the incident was created.
    pub async fn find_or_create_for_alert(
        &self,
        service_id: &ServiceId,
        alert: &Alert,
        now: DateTime<Utc>,
    ) -> Result<(Incident, bool), AppError> {
        for _ in 0..MAX_CAS_ATTEMPTS {
            if let Some(mut existing) = self
                .incidents
                .find_triggered(service_id, alert.severity())
                .await?
            {
                existing.record_alert(alert.title(), now);
                if self
                    .incidents
                    .update(&mut existing, IncidentStatus::Triggered)
                    .await?
                {
                    debug!(incident_id = %existing.id(), alert_id = %alert.id(), "alert grouped");
                    return Ok((existing, false));
                }
                continue;
            }

            let number = self.incidents.next_number().await?;
            let (mut incident, events) = Incident::open(
                number,
                service_id.clone(),
                alert.severity(),
                alert.title().to_string(),
                now,
            );
            incident.record_alert(alert.title(), now);
            match self.incidents.insert(&incident).await {
                Ok(()) => {
                    self.events.publish(events).await?;
                    info!(
                        incident_id = %incident.id(),
                        number,
                        service_id = %service_id,
                        severity = alert.severity().as_str(),
                        "incident opened"
                    );
                    return Ok((incident, true));
                }
                // Another ingestion opened the same incident first.
                Err(PortError::Conflict(_)) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(PortError::Conflict(format!(
            "incident grouping for service {service_id} kept changing"
        ))
        .into())
    }

    /// Only a triggered incident changes; any other state is returned as is.
    pub async fn acknowledge(
        &self,
        incident_id: &IncidentId,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<Incident, AppError> {
        let (incident, changed) = self
            .transition(incident_id, |i| i.acknowledge(user_id.clone(), now))
            .await?;
        if changed {
            info!(incident_id = %incident_id, user_id = %user_id, "incident acknowledged");
        }
        Ok(incident)
    }

    /// Resolving a resolved incident returns it unchanged.
    pub async fn resolve(
        &self,
        incident_id: &IncidentId,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<Incident, AppError> {
        let (incident, changed) = self
            .transition(incident_id, |i| i.resolve(user_id.clone(), now))
            .await?;
        if changed {
            info!(incident_id = %incident_id, user_id = %user_id, "incident resolved");
        }
        Ok(incident)
    }

    /// Resolves the incident without an actor once none of its attached
    /// alerts is firing. Returns the incident only when this call resolved it.
    pub async fn auto_resolve(
        &self,
        incident_id: &IncidentId,
        now: DateTime<Utc>,
    ) -> Result<Option<Incident>, AppError> {
        let firing = self.alerts.count_firing_for_incident(incident_id).await?;
        if firing > 0 {
            debug!(incident_id = %incident_id, firing, "incident still has firing alerts");
            return Ok(None);
        }
        let (incident, changed) = self
            .transition(incident_id, |i| i.auto_resolve(now))
            .await?;
        if !changed {
            return Ok(None);
        }
        info!(incident_id = %incident_id, "incident auto-resolved");
        Ok(Some(incident))
    }

    pub async fn get(&self, incident_id: &IncidentId) -> Result<(Incident, Vec<Alert>), AppError> {
        let incident = self.load(incident_id).await?;
        let alerts = self.alerts.find_by_incident(incident_id).await?;
        Ok((incident, alerts))
    }

    pub(crate) async fn load(&self, incident_id: &IncidentId) -> Result<Incident, AppError> {
        self.incidents
            .find_by_id(&incident_id.to_string())
            .await?
            .ok_or(AppError::NotFound("incident"))
    }

    /// Applies `apply` with a compare-and-swap on the status it was read in.
    /// On a successful change the events are published and pending escalation
    /// is canceled, since every transition leaves `triggered`.
    async fn transition<F>(
        &self,
        incident_id: &IncidentId,
        apply: F,
    ) -> Result<(Incident, bool), AppError>
    where
        F: Fn(&mut Incident) -> Vec<DomainEvent> + Send + Sync,
    {
        for _ in 0..MAX_CAS_ATTEMPTS {
            let mut incident = self.load(incident_id).await?;
            let expected = incident.status();
            let events = apply(&mut incident);
            if events.is_empty() {
                return Ok((incident, false));
            }
            if !self.incidents.update(&mut incident, expected).await? {
                debug!(incident_id = %incident_id, "incident changed concurrently, retrying");
                continue;
            }
            self.events.publish(events).await?;
            if let Err(e) = self.escalations.cancel_escalation(incident_id).await {
                // The worker's status re-check still stops stale jobs.
                warn!(incident_id = %incident_id, error = %e, "failed to cancel escalation");
            }
            return Ok((incident, true));
        }
        Ok((self.load(incident_id).await?, false))
    }
}

#[async_trait]
impl IncidentManager for IncidentService {
    async fn acknowledge(&self, incident_id: &str, user_id: &str) -> Result<Incident, PortError> {
        let incident_id = IncidentId::parse(incident_id).map_err(AppError::from)?;
        let user_id = UserId::parse(user_id).map_err(AppError::from)?;
        Ok(IncidentService::acknowledge(self, &incident_id, user_id, Utc::now()).await?)
    }

    async fn resolve(&self, incident_id: &str, user_id: &str) -> Result<Incident, PortError> {
        let incident_id = IncidentId::parse(incident_id).map_err(AppError::from)?;
        let user_id = UserId::parse(user_id).map_err(AppError::from)?;
        Ok(IncidentService::resolve(self, &incident_id, user_id, Utc::now()).await?)
    }

    async fn get_incident(&self, incident_id: &str) -> Result<(Incident, Vec<Alert>), PortError> {
        let incident_id = IncidentId::parse(incident_id).map_err(AppError::from)?;
        Ok(self.get(&incident_id).await?)
    }
}
