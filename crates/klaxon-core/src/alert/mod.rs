pub mod fingerprint;
pub mod normalized;
pub mod severity;
pub mod source;
pub mod status;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::events::{
    AlertAcknowledged, AlertCreated, AlertDeduplicated, AlertResolved, AlertSuppressed,
    DomainEvent,
};
use crate::ids::{AlertId, IncidentId, IntegrationId, RuleId, UserId};
use crate::routing::RoutingOutcome;

pub use fingerprint::Fingerprint;
pub use normalized::NormalizedAlert;
pub use severity::Severity;
pub use source::Source;
pub use status::Status;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    id: AlertId,
    fingerprint: Fingerprint,
    integration_id: IntegrationId,
    incident_id: Option<IncidentId>,
    status: Status,
    severity: Severity,
    title: String,
    description: Option<String>,
    source: Source,
    labels: BTreeMap<String, String>,
    annotations: BTreeMap<String, String>,
    raw_payload: serde_json::Value,
    fired_at: DateTime<Utc>,
    acknowledged_at: Option<DateTime<Utc>>,
    acknowledged_by: Option<UserId>,
    resolved_at: Option<DateTime<Utc>>,
    last_seen_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
    /// Advanced by the repository on every successful update.
    #[serde(default)]
    revision: u64,
}

impl Alert {
    /// Builds the alert for a fresh (non-duplicate) ingestion. A report that
    /// already arrives resolved is recorded as resolved.
    pub fn new(integration_id: IntegrationId, observed: NormalizedAlert, now: DateTime<Utc>) -> Self {
        let fingerprint = observed.fingerprint();
        let resolved = observed.is_resolved();
        Self {
            id: AlertId::new(),
            fingerprint,
            integration_id,
            incident_id: None,
            status: if resolved {
                Status::Resolved
            } else {
                Status::Firing
            },
            severity: observed.severity,
            title: observed.title,
            description: observed.description,
            source: Source::new(observed.source),
            labels: observed.labels,
            annotations: observed.annotations,
            raw_payload: observed.raw_payload,
            fired_at: observed.fired_at.unwrap_or(now),
            acknowledged_at: None,
            acknowledged_by: None,
            resolved_at: resolved.then_some(now),
            last_seen_at: now,
            created_at: now,
            revision: 0,
        }
    }

    /// `alert.created` for the alert as it was persisted, after routing and
    /// incident attachment.
    pub fn announce(&self, now: DateTime<Utc>) -> Vec<DomainEvent> {
        vec![DomainEvent::AlertCreated(AlertCreated {
            alert: self.clone(),
            occurred_at: now,
        })]
    }

    /// Applies severity and tag changes from a routing outcome. Suppression is
    /// left to the caller since it needs the matching rule.
    pub fn apply_routing(&mut self, outcome: &RoutingOutcome) {
        if let Some(severity) = outcome.severity {
            self.severity = severity;
        }
        self.merge_labels(&outcome.tags);
    }

    /// Marks a repeated report of a still-firing alert.
    pub fn record_duplicate(&mut self, now: DateTime<Utc>) -> Vec<DomainEvent> {
        self.last_seen_at = now;
        vec![DomainEvent::AlertDeduplicated(AlertDeduplicated {
            alert_id: self.id.clone(),
            fingerprint: self.fingerprint.to_string(),
            occurred_at: now,
        })]
    }

    pub fn suppress(&mut self, rule_id: RuleId, now: DateTime<Utc>) -> Vec<DomainEvent> {
        if self.status == Status::Suppressed {
            return vec![];
        }
        self.status = Status::Suppressed;
        vec![DomainEvent::AlertSuppressed(AlertSuppressed {
            alert: self.clone(),
            rule_id,
            occurred_at: now,
        })]
    }

    pub fn acknowledge(
        &mut self,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<Vec<DomainEvent>, DomainError> {
        match self.status {
            Status::Resolved => Err(DomainError::AlertAlreadyResolved),
            Status::Suppressed => Err(DomainError::AlertSuppressed),
            Status::Acknowledged => Ok(vec![]),
            Status::Firing => {
                self.status = Status::Acknowledged;
                self.acknowledged_at = Some(now);
                self.acknowledged_by = Some(user_id.clone());
                Ok(vec![DomainEvent::AlertAcknowledged(AlertAcknowledged {
                    alert: self.clone(),
                    user_id,
                    occurred_at: now,
                })])
            }
        }
    }

    pub fn resolve(
        &mut self,
        resolved_by: Option<UserId>,
        now: DateTime<Utc>,
    ) -> Result<Vec<DomainEvent>, DomainError> {
        match self.status {
            Status::Resolved => Ok(vec![]),
            Status::Suppressed => Err(DomainError::AlertSuppressed),
            Status::Firing | Status::Acknowledged => {
                self.status = Status::Resolved;
                self.resolved_at = Some(now);
                self.last_seen_at = now;
                Ok(vec![DomainEvent::AlertResolved(AlertResolved {
                    alert: self.clone(),
                    resolved_by,
                    occurred_at: now,
                })])
            }
        }
    }

    pub fn attach_to_incident(&mut self, incident_id: IncidentId) {
        self.incident_id = Some(incident_id);
    }

    /// Adds labels without touching the fingerprint computed at ingestion.
    pub fn merge_labels(&mut self, extra: &BTreeMap<String, String>) {
        for (k, v) in extra {
            self.labels.insert(k.clone(), v.clone());
        }
    }

    pub fn id(&self) -> &AlertId {
        &self.id
    }

    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    pub fn integration_id(&self) -> &IntegrationId {
        &self.integration_id
    }

    pub fn incident_id(&self) -> Option<&IncidentId> {
        self.incident_id.as_ref()
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn severity(&self) -> Severity {
        self.severity
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn source(&self) -> &Source {
        &self.source
    }

    pub fn labels(&self) -> &BTreeMap<String, String> {
        &self.labels
    }

    pub fn annotations(&self) -> &BTreeMap<String, String> {
        &self.annotations
    }

    pub fn raw_payload(&self) -> &serde_json::Value {
        &self.raw_payload
    }

    pub fn fired_at(&self) -> DateTime<Utc> {
        self.fired_at
    }

    pub fn acknowledged_at(&self) -> Option<DateTime<Utc>> {
        self.acknowledged_at
    }

    pub fn acknowledged_by(&self) -> Option<&UserId> {
        self.acknowledged_by.as_ref()
    }

    pub fn resolved_at(&self) -> Option<DateTime<Utc>> {
        self.resolved_at
    }

    pub fn last_seen_at(&self) -> DateTime<Utc> {
        self.last_seen_at
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn set_revision(&mut self, revision: u64) {
        self.revision = revision;
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}
