use std::collections::{BTreeMap, HashMap};

use serde::Deserialize;
use serde_json::Value;

use klaxon_core::alert::{NormalizedAlert, Status};
use klaxon_ports::error::ParseError;
use klaxon_ports::outbound::AlertSourceParser;

use super::{is_resolved_word, label_map, normalize_severity, parse_time};

/// Alertmanager webhook receiver payload. Label values are read leniently
/// since some senders emit numbers.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct Payload {
    #[serde(default)]
    pub status: Option<String>,
    pub alerts: Vec<Value>,
    #[serde(default)]
    pub common_labels: Option<Value>,
    #[serde(default)]
    pub common_annotations: Option<Value>,
}

pub struct AlertmanagerSource;

impl AlertSourceParser for AlertmanagerSource {
    fn parse(
        &self,
        payload: &Value,
        _headers: &HashMap<String, String>,
    ) -> Result<Vec<NormalizedAlert>, ParseError> {
        let parsed: Payload = serde_json::from_value(payload.clone())
            .map_err(|e| ParseError::InvalidPayload(e.to_string()))?;
        Ok(parsed
            .alerts
            .iter()
            .map(|alert| map_alert(&parsed, alert, self.source_name()))
            .collect())
    }

    fn source_name(&self) -> &str {
        "prometheus"
    }
}

/// Shared with the Grafana unified payload, which reuses this alert shape.
pub(super) fn map_alert(payload: &Payload, alert: &Value, source: &str) -> NormalizedAlert {
    let mut labels = label_map(payload.common_labels.as_ref());
    labels.extend(label_map(alert.get("labels")));
    let mut annotations = label_map(payload.common_annotations.as_ref());
    annotations.extend(label_map(alert.get("annotations")));

    let alert_name = labels.get("alertname").cloned();
    let title = annotation(&annotations, &["summary", "title"])
        .or_else(|| alert_name.clone())
        .unwrap_or_else(|| "Untitled alert".to_string());
    let description = annotation(&annotations, &["description", "message"]);

    let status_word = alert
        .get("status")
        .and_then(Value::as_str)
        .or(payload.status.as_deref());
    let status = match status_word {
        Some(s) if is_resolved_word(s) => Status::Resolved,
        _ => Status::Firing,
    };

    NormalizedAlert {
        alert_name,
        title,
        description,
        severity: normalize_severity(labels.get("severity").map(String::as_str)),
        status,
        source: source.to_string(),
        labels,
        annotations,
        raw_payload: alert.clone(),
        fired_at: parse_time(alert.get("startsAt")),
    }
}

fn annotation(annotations: &BTreeMap<String, String>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|k| annotations.get(*k))
        .find(|v| !v.trim().is_empty())
        .cloned()
}
