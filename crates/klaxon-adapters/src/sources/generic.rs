use std::collections::HashMap;

use serde_json::Value;

use klaxon_core::alert::{NormalizedAlert, Status};
use klaxon_ports::error::ParseError;
use klaxon_ports::outbound::AlertSourceParser;

use super::{is_resolved_word, label_map, normalize_severity, parse_time, scalar_text, str_field};

const TITLE_KEYS: &[&str] = &["title", "subject", "name", "summary"];
const SEVERITY_KEYS: &[&str] = &["severity", "priority", "level"];
const STATUS_KEYS: &[&str] = &["status", "state"];
const DESCRIPTION_KEYS: &[&str] = &["description", "message", "body", "text", "details"];

/// Best-effort mapping for anything without a recognised vendor shape. A
/// JSON array is treated as a batch; every other value yields one alert.
pub struct GenericSource;

impl AlertSourceParser for GenericSource {
    fn parse(
        &self,
        payload: &Value,
        _headers: &HashMap<String, String>,
    ) -> Result<Vec<NormalizedAlert>, ParseError> {
        let alerts = match payload {
            Value::Array(items) => items.iter().map(|item| self.map_one(item)).collect(),
            other => vec![self.map_one(other)],
        };
        Ok(alerts)
    }

    fn source_name(&self) -> &str {
        "generic"
    }
}

impl GenericSource {
    fn map_one(&self, item: &Value) -> NormalizedAlert {
        let severity_word = SEVERITY_KEYS
            .iter()
            .filter_map(|k| item.get(*k).and_then(scalar_text))
            .next();
        let status = match str_field(item, STATUS_KEYS) {
            Some(s) if is_resolved_word(s) => Status::Resolved,
            _ => Status::Firing,
        };
        let labels = match item.get("labels") {
            Some(labels) => label_map(Some(labels)),
            None => label_map(item.get("tags")),
        };

        NormalizedAlert {
            alert_name: str_field(item, &["alertname", "alert_name"]).map(str::to_string),
            title: str_field(item, TITLE_KEYS)
                .unwrap_or("Untitled alert")
                .to_string(),
            description: str_field(item, DESCRIPTION_KEYS).map(str::to_string),
            severity: normalize_severity(severity_word.as_deref()),
            status,
            source: str_field(item, &["source"])
                .unwrap_or(self.source_name())
                .to_string(),
            labels,
            annotations: label_map(item.get("annotations")),
            raw_payload: item.clone(),
            fired_at: parse_time(item.get("timestamp").or_else(|| item.get("fired_at"))),
        }
    }
}
