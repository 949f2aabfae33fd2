use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::alert::Severity;
use crate::ids::ServiceId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    RouteToService { service_id: ServiceId },
    SetSeverity { severity: Severity },
    /// Persist the alert as suppressed and stop: no incident, no escalation.
    Suppress,
    AddTags { tags: BTreeMap<String, String> },
}
