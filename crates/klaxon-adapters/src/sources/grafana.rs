use std::collections::{BTreeMap, HashMap};

use serde::Deserialize;
use serde_json::Value;

use klaxon_core::alert::{NormalizedAlert, Status};
use klaxon_ports::error::ParseError;
use klaxon_ports::outbound::AlertSourceParser;

use super::alertmanager::{self, Payload};
use super::{label_map, normalize_severity, parse_time};

/// Pre-unified-alerting notification: one rule, one state.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacyPayload {
    rule_name: String,
    state: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    tags: Option<Value>,
    #[serde(default)]
    rule_url: Option<String>,
    #[serde(default)]
    time: Option<Value>,
}

/// Grafana unified alerting (Alertmanager-shaped with an `orgId`) and the
/// legacy `ruleName`/`state` notification.
pub struct GrafanaSource;

impl AlertSourceParser for GrafanaSource {
    fn parse(
        &self,
        payload: &Value,
        _headers: &HashMap<String, String>,
    ) -> Result<Vec<NormalizedAlert>, ParseError> {
        if payload.get("alerts").is_some() {
            let parsed: Payload = serde_json::from_value(payload.clone())
                .map_err(|e| ParseError::InvalidPayload(e.to_string()))?;
            return Ok(parsed
                .alerts
                .iter()
                .map(|alert| unified(&parsed, alert, payload, self.source_name()))
                .collect());
        }

        let legacy: LegacyPayload = serde_json::from_value(payload.clone())
            .map_err(|e| ParseError::InvalidPayload(e.to_string()))?;
        Ok(vec![self.legacy(legacy, payload)])
    }

    fn source_name(&self) -> &str {
        "grafana"
    }
}

fn unified(parsed: &Payload, alert: &Value, payload: &Value, source: &str) -> NormalizedAlert {
    let mut normalized = alertmanager::map_alert(parsed, alert, source);
    if let Some(org) = payload.get("orgId").and_then(super::scalar_text) {
        normalized.labels.entry("grafana_org".into()).or_insert(org);
    }
    // Grafana rules rarely carry a severity label; fall back to an
    // annotation before the default.
    if !normalized.labels.contains_key("severity") {
        normalized.severity =
            normalize_severity(normalized.annotations.get("severity").map(String::as_str));
    }
    normalized
}

impl GrafanaSource {
    fn legacy(&self, legacy: LegacyPayload, payload: &Value) -> NormalizedAlert {
        let labels: BTreeMap<String, String> = label_map(legacy.tags.as_ref());
        let mut annotations = BTreeMap::new();
        if let Some(url) = &legacy.rule_url {
            annotations.insert("rule_url".to_string(), url.clone());
        }
        let status = match legacy.state.to_lowercase().as_str() {
            "ok" => Status::Resolved,
            _ => Status::Firing,
        };
        let title = legacy
            .title
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| legacy.rule_name.clone());

        NormalizedAlert {
            alert_name: Some(legacy.rule_name),
            title,
            description: legacy.message.filter(|m| !m.trim().is_empty()),
            severity: normalize_severity(labels.get("severity").map(String::as_str)),
            status,
            source: self.source_name().to_string(),
            labels,
            annotations,
            raw_payload: payload.clone(),
            fired_at: parse_time(legacy.time.as_ref()),
        }
    }
}
