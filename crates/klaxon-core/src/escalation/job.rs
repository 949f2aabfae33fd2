use serde::{Deserialize, Serialize};

use crate::ids::{IncidentId, PolicyId};

/// One notification wave for an incident, as carried by the job queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationJob {
    pub incident_id: IncidentId,
    pub policy_id: PolicyId,
    pub level: u32,
    /// 0 for the first pass through the policy, incremented on each repeat.
    pub repetition: u32,
}

impl EscalationJob {
    pub fn key(&self) -> String {
        escalation_key(&self.incident_id, self.level)
    }
}

/// Queue identity of the job for `(incident, level)`. Enqueueing the same
/// key again replaces the pending job.
pub fn escalation_key(incident_id: &IncidentId, level: u32) -> String {
    format!("{}{level}", escalation_key_prefix(incident_id))
}

/// Prefix shared by every level of one incident.
pub fn escalation_key_prefix(incident_id: &IncidentId) -> String {
    format!("escalation:{incident_id}:")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_is_per_incident_and_level() {
        let incident = IncidentId::new();
        let a = escalation_key(&incident, 1);
        let b = escalation_key(&incident, 2);
        assert_ne!(a, b);
        assert!(a.starts_with(&escalation_key_prefix(&incident)));
        assert!(b.starts_with(&escalation_key_prefix(&incident)));
    }

    #[test]
    fn repetition_does_not_change_key() {
        let incident = IncidentId::new();
        let first = EscalationJob {
            incident_id: incident.clone(),
            policy_id: PolicyId::new(),
            level: 1,
            repetition: 0,
        };
        let repeat = EscalationJob {
            repetition: 2,
            ..first.clone()
        };
        assert_eq!(first.key(), repeat.key());
    }
}
