pub mod status;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::alert::Severity;
use crate::events::{
    DomainEvent, IncidentAcknowledged, IncidentAutoResolved, IncidentCreated, IncidentResolved,
};
use crate::ids::{IncidentId, ServiceId, UserId};

pub use status::IncidentStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimelineKind {
    Triggered,
    AlertAttached,
    Acknowledged,
    Resolved,
    AutoResolved,
    Escalated,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelineEntry {
    pub kind: TimelineKind,
    pub actor: Option<UserId>,
    pub message: String,
    pub at: DateTime<Utc>,
}

/// The unit of human response. Status only moves forward:
/// `triggered -> acknowledged -> resolved` or `triggered -> resolved`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Incident {
    id: IncidentId,
    number: u64,
    service_id: ServiceId,
    severity: Severity,
    title: String,
    status: IncidentStatus,
    triggered_at: DateTime<Utc>,
    acknowledged_at: Option<DateTime<Utc>>,
    acknowledged_by: Option<UserId>,
    resolved_at: Option<DateTime<Utc>>,
    resolved_by: Option<UserId>,
    timeline: Vec<TimelineEntry>,
    /// Every write bumps this, so two appends to the timeline can't both land
    /// on the same stored copy.
    #[serde(default)]
    revision: u64,
}

impl Incident {
    pub fn open(
        number: u64,
        service_id: ServiceId,
        severity: Severity,
        title: String,
        now: DateTime<Utc>,
    ) -> (Self, Vec<DomainEvent>) {
        let incident = Self {
            id: IncidentId::new(),
            number,
            service_id,
            severity,
            timeline: vec![TimelineEntry {
                kind: TimelineKind::Triggered,
                actor: None,
                message: format!("Incident #{number} triggered: {title}"),
                at: now,
            }],
            title,
            status: IncidentStatus::Triggered,
            triggered_at: now,
            acknowledged_at: None,
            acknowledged_by: None,
            resolved_at: None,
            resolved_by: None,
            revision: 0,
        };
        let events = vec![DomainEvent::IncidentCreated(IncidentCreated {
            incident: incident.clone(),
            occurred_at: now,
        })];
        (incident, events)
    }

    /// Only a `triggered` incident can be acknowledged; anything else is a
    /// no-op that leaves the incident untouched.
    pub fn acknowledge(&mut self, user_id: UserId, now: DateTime<Utc>) -> Vec<DomainEvent> {
        if self.status != IncidentStatus::Triggered {
            return vec![];
        }
        self.status = IncidentStatus::Acknowledged;
        self.acknowledged_at = Some(now);
        self.acknowledged_by = Some(user_id.clone());
        self.push_timeline(
            TimelineKind::Acknowledged,
            Some(user_id.clone()),
            format!("Acknowledged by {user_id}"),
            now,
        );
        vec![DomainEvent::IncidentAcknowledged(IncidentAcknowledged {
            incident: self.clone(),
            user_id,
            occurred_at: now,
        })]
    }

    pub fn resolve(&mut self, user_id: UserId, now: DateTime<Utc>) -> Vec<DomainEvent> {
        if self.status == IncidentStatus::Resolved {
            return vec![];
        }
        self.status = IncidentStatus::Resolved;
        self.resolved_at = Some(now);
        self.resolved_by = Some(user_id.clone());
        self.push_timeline(
            TimelineKind::Resolved,
            Some(user_id.clone()),
            format!("Resolved by {user_id}"),
            now,
        );
        vec![DomainEvent::IncidentResolved(IncidentResolved {
            incident: self.clone(),
            user_id,
            occurred_at: now,
        })]
    }

    /// Resolution without an actor, used once no attached alert is firing.
    pub fn auto_resolve(&mut self, now: DateTime<Utc>) -> Vec<DomainEvent> {
        if self.status == IncidentStatus::Resolved {
            return vec![];
        }
        self.status = IncidentStatus::Resolved;
        self.resolved_at = Some(now);
        self.resolved_by = None;
        self.push_timeline(
            TimelineKind::AutoResolved,
            None,
            "All alerts resolved".into(),
            now,
        );
        vec![DomainEvent::IncidentAutoResolved(IncidentAutoResolved {
            incident: self.clone(),
            occurred_at: now,
        })]
    }

    pub fn record_alert(&mut self, title: &str, now: DateTime<Utc>) {
        self.push_timeline(
            TimelineKind::AlertAttached,
            None,
            format!("Alert attached: {title}"),
            now,
        );
    }

    pub fn record_escalation(&mut self, level: u32, notified: usize, now: DateTime<Utc>) {
        self.push_timeline(
            TimelineKind::Escalated,
            None,
            format!("Escalated to level {level}, {notified} responder(s) notified"),
            now,
        );
    }

    fn push_timeline(
        &mut self,
        kind: TimelineKind,
        actor: Option<UserId>,
        message: String,
        at: DateTime<Utc>,
    ) {
        self.timeline.push(TimelineEntry {
            kind,
            actor,
            message,
            at,
        });
    }

    pub fn id(&self) -> &IncidentId {
        &self.id
    }

    pub fn number(&self) -> u64 {
        self.number
    }

    pub fn service_id(&self) -> &ServiceId {
        &self.service_id
    }

    pub fn severity(&self) -> Severity {
        self.severity
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn status(&self) -> IncidentStatus {
        self.status
    }

    pub fn triggered_at(&self) -> DateTime<Utc> {
        self.triggered_at
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

    pub fn resolved_by(&self) -> Option<&UserId> {
        self.resolved_by.as_ref()
    }

    pub fn timeline(&self) -> &[TimelineEntry] {
        &self.timeline
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn set_revision(&mut self, revision: u64) {
        self.revision = revision;
    }
}
