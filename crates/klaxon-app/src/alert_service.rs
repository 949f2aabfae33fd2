use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, info};

use klaxon_core::alert::{Alert, NormalizedAlert, Status};
use klaxon_core::ids::{AlertId, IncidentId, ServiceId, UserId};
use klaxon_core::incident::{Incident, IncidentStatus};
use klaxon_ports::error::PortError;
use klaxon_ports::inbound::{AlertManager, AlertReceiver};
use klaxon_ports::outbound::{
    AlertRepository, EventPublisher, IntegrationRepository, PayloadNormalizer,
};
use klaxon_ports::types::{IngestReport, Integration};

use crate::error::AppError;
use crate::escalation_service::EscalationService;
use crate::incident_service::IncidentService;
use crate::router::RoutingEngine;

/// Attempts at ingesting one alert while concurrent writers keep winning.
const MAX_INGEST_ATTEMPTS: usize = 3;

#[derive(Clone)]
pub struct AlertService {
    integrations: Arc<dyn IntegrationRepository>,
    alerts: Arc<dyn AlertRepository>,
    normalizer: Arc<dyn PayloadNormalizer>,
    router: RoutingEngine,
    incidents: IncidentService,
    escalations: EscalationService,
    events: Arc<dyn EventPublisher>,
}

impl AlertService {
    pub fn new(
        integrations: Arc<dyn IntegrationRepository>,
        alerts: Arc<dyn AlertRepository>,
        normalizer: Arc<dyn PayloadNormalizer>,
        router: RoutingEngine,
        incidents: IncidentService,
        escalations: EscalationService,
        events: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            integrations,
            alerts,
            normalizer,
            router,
            incidents,
            escalations,
            events,
        }
    }

    /// Handles one webhook delivery. Unknown or inactive keys and bodies
    /// that cannot be normalized are rejected before anything is written.
    pub async fn receive(
        &self,
        integration_key: &str,
        vendor: Option<&str>,
        body: &[u8],
        headers: &HashMap<String, String>,
        now: DateTime<Utc>,
    ) -> Result<IngestReport, AppError> {
        let integration = self
            .integrations
            .find_by_key(integration_key)
            .await?
            .filter(|i| i.active)
            .ok_or(AppError::NotFound("integration"))?;
        let observed = self.normalizer.normalize(vendor, body, headers)?;

        let mut report = IngestReport::default();
        for alert in observed {
            let id = self.ingest(&integration, alert, now).await?;
            report.alert_ids.push(id);
        }
        report.alerts_processed = report.alert_ids.len();
        info!(
            integration = %integration.name,
            alerts = report.alerts_processed,
            "webhook processed"
        );
        Ok(report)
    }

    /// Dedupes, routes and correlates one normalized alert.
    pub async fn ingest(
        &self,
        integration: &Integration,
        observed: NormalizedAlert,
        now: DateTime<Utc>,
    ) -> Result<AlertId, AppError> {
        if observed.is_resolved() {
            return self.close_reported(integration, observed, now).await;
        }
        let fingerprint = observed.fingerprint();
        for _ in 0..MAX_INGEST_ATTEMPTS {
            if let Some(existing) = self
                .alerts
                .find_firing_by_fingerprint(fingerprint.as_str())
                .await?
            {
                match self.refresh_duplicate(existing, now).await? {
                    Some(id) => return Ok(id),
                    None => continue,
                }
            }

            let mut alert = Alert::new(integration.id.clone(), observed.clone(), now);
            let outcome = self.router.route(&integration.team_id, &alert).await;
            alert.apply_routing(&outcome);

            if let (true, Some(rule_id)) = (outcome.suppress, outcome.rule_id.clone()) {
                let suppressed = alert.suppress(rule_id, now);
                self.alerts.insert(&alert).await?;
                let mut events = alert.announce(now);
                events.extend(suppressed);
                self.events.publish(events).await?;
                info!(alert_id = %alert.id(), "alert suppressed by routing rule");
                return Ok(alert.id().clone());
            }

            match self.alerts.insert(&alert).await {
                Ok(()) => {}
                // A concurrent delivery of the same alert got in first.
                Err(PortError::Conflict(_)) => continue,
                Err(e) => return Err(e.into()),
            }

            let service_id = outcome
                .service_id
                .unwrap_or_else(|| integration.service_id.clone());
            let (incident, created) = self.attach(&mut alert, &service_id, now).await?;
            self.events.publish(alert.announce(now)).await?;
            if created {
                self.escalations.start(&incident, now).await?;
            }
            if alert.status() == Status::Resolved {
                // Resolved before it was attached, so nobody checked the incident.
                self.after_resolution(&alert, now).await?;
            }
            return Ok(alert.id().clone());
        }
        Err(PortError::Conflict(format!(
            "alert {fingerprint} kept changing during ingestion"
        ))
        .into())
    }

    /// A resolved report closes every open alert with its fingerprint,
    /// acknowledged ones included. Returns the newest of them.
    async fn close_reported(
        &self,
        integration: &Integration,
        observed: NormalizedAlert,
        now: DateTime<Utc>,
    ) -> Result<AlertId, AppError> {
        let fingerprint = observed.fingerprint();
        let open = self
            .alerts
            .find_open_by_fingerprint(fingerprint.as_str())
            .await?;
        let Some(newest) = open.first().map(|a| a.id().clone()) else {
            // Nothing open to close; keep the report for the record.
            let alert = Alert::new(integration.id.clone(), observed, now);
            self.alerts.insert(&alert).await?;
            self.events.publish(alert.announce(now)).await?;
            return Ok(alert.id().clone());
        };
        for alert in open {
            let closed = self.close(alert, None, now).await?;
            info!(alert_id = %closed.id(), "alert resolved by source");
        }
        Ok(newest)
    }

    /// Applies a repeated report to the firing alert. `None` means the alert
    /// changed in the meantime.
    async fn refresh_duplicate(
        &self,
        mut existing: Alert,
        now: DateTime<Utc>,
    ) -> Result<Option<AlertId>, AppError> {
        let events = existing.record_duplicate(now);
        if !self.alerts.update(&mut existing, Status::Firing).await? {
            return Ok(None);
        }
        self.events.publish(events).await?;
        debug!(alert_id = %existing.id(), "duplicate alert");
        Ok(Some(existing.id().clone()))
    }

    /// Groups the stored alert into an incident. A firing alert is never left
    /// on an incident that resolved while it was being attached.
    async fn attach(
        &self,
        alert: &mut Alert,
        service_id: &ServiceId,
        now: DateTime<Utc>,
    ) -> Result<(Incident, bool), AppError> {
        for _ in 0..MAX_INGEST_ATTEMPTS {
            let (incident, created) = self
                .incidents
                .find_or_create_for_alert(service_id, alert, now)
                .await?;
            self.link(alert, incident.id()).await?;
            if alert.status() != Status::Firing {
                return Ok((incident, created));
            }
            let current = self.incidents.load(incident.id()).await?;
            if current.status() != IncidentStatus::Resolved {
                return Ok((current, created));
            }
            debug!(
                alert_id = %alert.id(),
                incident_id = %incident.id(),
                "incident resolved during attachment, regrouping"
            );
        }
        Err(PortError::Conflict(format!("alert {} could not be grouped", alert.id())).into())
    }

    async fn link(&self, alert: &mut Alert, incident_id: &IncidentId) -> Result<(), AppError> {
        for _ in 0..MAX_INGEST_ATTEMPTS {
            let expected = alert.status();
            alert.attach_to_incident(incident_id.clone());
            if self.alerts.update(alert, expected).await? {
                return Ok(());
            }
            let id = alert.id().clone();
            *alert = self.load(&id).await?;
        }
        Err(PortError::Conflict(format!("alert {} kept changing", alert.id())).into())
    }

    pub async fn acknowledge(
        &self,
        alert_id: &AlertId,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<Alert, AppError> {
        for _ in 0..MAX_INGEST_ATTEMPTS {
            let mut alert = self.load(alert_id).await?;
            let expected = alert.status();
            let events = alert.acknowledge(user_id.clone(), now)?;
            if events.is_empty() {
                return Ok(alert);
            }
            if self.alerts.update(&mut alert, expected).await? {
                self.events.publish(events).await?;
                return Ok(alert);
            }
        }
        self.load(alert_id).await
    }

    /// Manual resolution. Resolving the last firing alert of an incident
    /// auto-resolves the incident.
    pub async fn resolve(
        &self,
        alert_id: &AlertId,
        resolved_by: Option<UserId>,
        now: DateTime<Utc>,
    ) -> Result<Alert, AppError> {
        let alert = self.load(alert_id).await?;
        self.close(alert, resolved_by, now).await
    }

    async fn close(
        &self,
        mut alert: Alert,
        resolved_by: Option<UserId>,
        now: DateTime<Utc>,
    ) -> Result<Alert, AppError> {
        for _ in 0..MAX_INGEST_ATTEMPTS {
            let expected = alert.status();
            let events = alert.resolve(resolved_by.clone(), now)?;
            if events.is_empty() {
                return Ok(alert);
            }
            if self.alerts.update(&mut alert, expected).await? {
                self.events.publish(events).await?;
                self.after_resolution(&alert, now).await?;
                return Ok(alert);
            }
            let id = alert.id().clone();
            alert = self.load(&id).await?;
        }
        self.load(alert.id()).await
    }

    async fn after_resolution(&self, alert: &Alert, now: DateTime<Utc>) -> Result<(), AppError> {
        if let Some(incident_id) = alert.incident_id() {
            self.incidents.auto_resolve(incident_id, now).await?;
        }
        Ok(())
    }

    async fn load(&self, alert_id: &AlertId) -> Result<Alert, AppError> {
        self.alerts
            .find_by_id(&alert_id.to_string())
            .await?
            .ok_or(AppError::NotFound("alert"))
    }
}

#[async_trait]
impl AlertReceiver for AlertService {
    async fn receive(
        &self,
        integration_key: &str,
        vendor: Option<&str>,
        body: &[u8],
        headers: &HashMap<String, String>,
    ) -> Result<IngestReport, PortError> {
        Ok(
            AlertService::receive(self, integration_key, vendor, body, headers, Utc::now())
                .await?,
        )
    }
}

#[async_trait]
impl AlertManager for AlertService {
    async fn acknowledge(&self, alert_id: &str, user_id: &str) -> Result<Alert, PortError> {
        let alert_id = AlertId::parse(alert_id).map_err(AppError::from)?;
        let user_id = UserId::parse(user_id).map_err(AppError::from)?;
        Ok(AlertService::acknowledge(self, &alert_id, user_id, Utc::now()).await?)
    }

    async fn resolve(&self, alert_id: &str, resolved_by: Option<&str>) -> Result<Alert, PortError> {
        let alert_id = AlertId::parse(alert_id).map_err(AppError::from)?;
        let resolved_by = resolved_by
            .map(UserId::parse)
            .transpose()
            .map_err(AppError::from)?;
        Ok(AlertService::resolve(self, &alert_id, resolved_by, Utc::now()).await?)
    }

    async fn get_alert(&self, alert_id: &str) -> Result<Alert, PortError> {
        let alert_id = AlertId::parse(alert_id).map_err(AppError::from)?;
        Ok(self.load(&alert_id).await?)
    }
}
