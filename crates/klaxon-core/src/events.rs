use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::alert::Alert;
use crate::ids::{AlertId, IncidentId, PolicyId, RuleId, UserId};
use crate::incident::Incident;

/// Outbound facts for the broadcast collaborator. Entity-carrying events
/// hold the full updated entity.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "payload")]
pub enum DomainEvent {
    #[serde(rename = "alert.created")]
    AlertCreated(AlertCreated),
    #[serde(rename = "alert.deduplicated")]
    AlertDeduplicated(AlertDeduplicated),
    #[serde(rename = "alert.suppressed")]
    AlertSuppressed(AlertSuppressed),
    #[serde(rename = "alert.acknowledged")]
    AlertAcknowledged(AlertAcknowledged),
    #[serde(rename = "alert.resolved")]
    AlertResolved(AlertResolved),
    #[serde(rename = "incident.created")]
    IncidentCreated(IncidentCreated),
    #[serde(rename = "incident.acknowledged")]
    IncidentAcknowledged(IncidentAcknowledged),
    #[serde(rename = "incident.resolved")]
    IncidentResolved(IncidentResolved),
    #[serde(rename = "incident.auto_resolved")]
    IncidentAutoResolved(IncidentAutoResolved),
    #[serde(rename = "escalation.fired")]
    EscalationFired(EscalationFired),
    #[serde(rename = "escalation.exhausted")]
    EscalationExhausted(EscalationExhausted),
}

impl DomainEvent {
    pub fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            Self::AlertCreated(e) => e.occurred_at,
            Self::AlertDeduplicated(e) => e.occurred_at,
            Self::AlertSuppressed(e) => e.occurred_at,
            Self::AlertAcknowledged(e) => e.occurred_at,
            Self::AlertResolved(e) => e.occurred_at,
            Self::IncidentCreated(e) => e.occurred_at,
            Self::IncidentAcknowledged(e) => e.occurred_at,
            Self::IncidentResolved(e) => e.occurred_at,
            Self::IncidentAutoResolved(e) => e.occurred_at,
            Self::EscalationFired(e) => e.occurred_at,
            Self::EscalationExhausted(e) => e.occurred_at,
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            Self::AlertCreated(_) => "alert.created",
            Self::AlertDeduplicated(_) => "alert.deduplicated",
            Self::AlertSuppressed(_) => "alert.suppressed",
            Self::AlertAcknowledged(_) => "alert.acknowledged",
            Self::AlertResolved(_) => "alert.resolved",
            Self::IncidentCreated(_) => "incident.created",
            Self::IncidentAcknowledged(_) => "incident.acknowledged",
            Self::IncidentResolved(_) => "incident.resolved",
            Self::IncidentAutoResolved(_) => "incident.auto_resolved",
            Self::EscalationFired(_) => "escalation.fired",
            Self::EscalationExhausted(_) => "escalation.exhausted",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertCreated {
    pub alert: Alert,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertDeduplicated {
    pub alert_id: AlertId,
    pub fingerprint: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertSuppressed {
    pub alert: Alert,
    pub rule_id: RuleId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertAcknowledged {
    pub alert: Alert,
    pub user_id: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertResolved {
    pub alert: Alert,
    pub resolved_by: Option<UserId>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IncidentCreated {
    pub incident: Incident,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IncidentAcknowledged {
    pub incident: Incident,
    pub user_id: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IncidentResolved {
    pub incident: Incident,
    pub user_id: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IncidentAutoResolved {
    pub incident: Incident,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EscalationFired {
    pub incident_id: IncidentId,
    pub policy_id: PolicyId,
    pub level: u32,
    pub repetition: u32,
    pub notified: Vec<UserId>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EscalationExhausted {
    pub incident_id: IncidentId,
    pub policy_id: PolicyId,
    pub occurred_at: DateTime<Utc>,
}
