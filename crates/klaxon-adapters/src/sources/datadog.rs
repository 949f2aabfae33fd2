use std::collections::{BTreeMap, HashMap};

use serde::Deserialize;
use serde_json::Value;

use klaxon_core::alert::{NormalizedAlert, Severity, Status};
use klaxon_ports::error::ParseError;
use klaxon_ports::outbound::AlertSourceParser;

use super::{label_map, normalize_severity, parse_time, scalar_text, severity_keyword};

/// Datadog webhook body built from the default template variables.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Event {
    title: Option<String>,
    body: Option<String>,
    alert_type: Option<String>,
    alert_transition: Option<String>,
    event_type: Option<String>,
    priority: Option<String>,
    alert_id: Option<Value>,
    id: Option<Value>,
    tags: Option<Value>,
    date: Option<Value>,
    hostname: Option<String>,
    alert_metric: Option<String>,
}

pub struct DatadogSource;

impl AlertSourceParser for DatadogSource {
    fn parse(
        &self,
        payload: &Value,
        _headers: &HashMap<String, String>,
    ) -> Result<Vec<NormalizedAlert>, ParseError> {
        let event: Event = serde_json::from_value(payload.clone())
            .map_err(|e| ParseError::InvalidPayload(e.to_string()))?;

        let mut labels = label_map(event.tags.as_ref());
        if let Some(host) = &event.hostname {
            labels.insert("host".to_string(), host.clone());
        }
        if let Some(metric) = &event.alert_metric {
            labels.insert("metric".to_string(), metric.clone());
        }
        if let Some(id) = event.alert_id.as_ref().and_then(scalar_text) {
            labels.insert("monitor_id".to_string(), id);
        }

        let mut annotations = BTreeMap::new();
        if let Some(kind) = &event.event_type {
            annotations.insert("event_type".to_string(), kind.clone());
        }
        if let Some(id) = event.id.as_ref().and_then(scalar_text) {
            annotations.insert("event_id".to_string(), id);
        }

        Ok(vec![NormalizedAlert {
            alert_name: monitor_name(&event),
            title: event
                .title
                .clone()
                .filter(|t| !t.trim().is_empty())
                .unwrap_or_else(|| "Datadog event".to_string()),
            description: event.body.clone().filter(|b| !b.trim().is_empty()),
            severity: severity(&event),
            status: status(&event),
            source: self.source_name().to_string(),
            labels,
            annotations,
            raw_payload: payload.clone(),
            fired_at: parse_time(event.date.as_ref()),
        }])
    }

    fn source_name(&self) -> &str {
        "datadog"
    }
}

/// Titles carry a `[Triggered]`/`[Recovered]` prefix, so the monitor id (or
/// the bare title) names the condition for fingerprinting.
fn monitor_name(event: &Event) -> Option<String> {
    if let Some(id) = event.alert_id.as_ref().and_then(scalar_text) {
        return Some(format!("monitor-{id}"));
    }
    let title = event.title.as_deref()?.trim();
    let bare = match title.strip_prefix('[').and_then(|rest| rest.split_once(']')) {
        Some((_, rest)) => rest.trim(),
        None => title,
    };
    (!bare.is_empty()).then(|| bare.to_string())
}

/// An explicit `P1`..`P5` priority is more specific than the alert type.
fn severity(event: &Event) -> Severity {
    event
        .priority
        .as_deref()
        .and_then(severity_keyword)
        .unwrap_or_else(|| normalize_severity(event.alert_type.as_deref()))
}

fn status(event: &Event) -> Status {
    let recovered = event
        .alert_transition
        .as_deref()
        .is_some_and(|t| t.eq_ignore_ascii_case("recovered"))
        || event
            .alert_type
            .as_deref()
            .is_some_and(|t| t.eq_ignore_ascii_case("success"));
    if recovered {
        Status::Resolved
    } else {
        Status::Firing
    }
}
