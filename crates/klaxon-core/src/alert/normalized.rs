use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Fingerprint, Severity, Status};

/// Vendor-agnostic alert as produced by a webhook source, before it is
/// bound to an integration and persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedAlert {
    /// Rule or alert name used for fingerprinting; falls back to the title.
    pub alert_name: Option<String>,
    pub title: String,
    pub description: Option<String>,
    pub severity: Severity,
    /// Either `Firing` or `Resolved` as reported by the sender.
    pub status: Status,
    pub source: String,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
    pub raw_payload: serde_json::Value,
    pub fired_at: Option<DateTime<Utc>>,
}

impl NormalizedAlert {
    pub fn fingerprint(&self) -> Fingerprint {
        let name = self.alert_name.as_deref().unwrap_or(&self.title);
        Fingerprint::compute(name, &self.source, &self.labels)
    }

    pub fn is_resolved(&self) -> bool {
        self.status == Status::Resolved
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make(name: Option<&str>, title: &str) -> NormalizedAlert {
        NormalizedAlert {
            alert_name: name.map(Into::into),
            title: title.into(),
            description: None,
            severity: Severity::Critical,
            status: Status::Firing,
            source: "prometheus".into(),
            labels: BTreeMap::from([("instance".into(), "web-01".into())]),
            annotations: BTreeMap::new(),
            raw_payload: serde_json::Value::Null,
            fired_at: None,
        }
    }

    #[test]
    fn fingerprint_prefers_alert_name_over_title() {
        let a = make(Some("HighCPU"), "CPU high on web-01");
        let b = make(Some("HighCPU"), "CPU very high on web-01");
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn fingerprint_falls_back_to_title() {
        let a = make(None, "HighCPU");
        let b = make(Some("HighCPU"), "something else");
        assert_eq!(a.fingerprint(), b.fingerprint());
    }
}
