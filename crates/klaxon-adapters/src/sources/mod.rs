//! Webhook payload sources. Each vendor mapper turns one delivery into
//! normalized alerts; [`SourceRegistry`] picks the mapper either from an
//! explicit vendor name or from the payload shape.

mod alertmanager;
mod azure;
mod datadog;
mod generic;
mod grafana;

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;
use tracing::debug;

use klaxon_core::alert::{NormalizedAlert, Severity};
use klaxon_ports::error::ParseError;
use klaxon_ports::outbound::{AlertSourceParser, PayloadNormalizer};

pub use alertmanager::AlertmanagerSource;
pub use azure::AzureMonitorSource;
pub use datadog::DatadogSource;
pub use generic::GenericSource;
pub use grafana::GrafanaSource;

/// Keyword table checked in order; the first substring hit wins.
const SEVERITY_KEYWORDS: &[(Severity, &[&str])] = &[
    (
        Severity::Critical,
        &["critical", "crit", "fatal", "emergency", "disaster", "sev0", "p0", "p1"],
    ),
    (
        Severity::High,
        &["high", "error", "major", "urgent", "sev1", "p2"],
    ),
    (
        Severity::Medium,
        &["medium", "warning", "warn", "moderate", "average", "sev2", "p3"],
    ),
    (Severity::Low, &["low", "minor", "sev3", "p4"]),
    (
        Severity::Info,
        &["info", "notice", "debug", "verbose", "success", "ok", "sev4", "p5"],
    ),
];

/// Maps a vendor severity word onto the five-level scale,
/// case-insensitively. Unknown or missing values become `Medium`.
pub fn normalize_severity(raw: Option<&str>) -> Severity {
    raw.and_then(severity_keyword).unwrap_or(Severity::Medium)
}

fn severity_keyword(raw: &str) -> Option<Severity> {
    let lowered = raw.trim().to_lowercase();
    if lowered.is_empty() {
        return None;
    }
    SEVERITY_KEYWORDS
        .iter()
        .find(|(_, words)| words.iter().any(|w| lowered.contains(w)))
        .map(|(severity, _)| *severity)
}

/// First non-empty string among `keys`.
fn str_field<'a>(value: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .filter_map(|k| value.get(*k).and_then(Value::as_str))
        .map(str::trim)
        .find(|s| !s.is_empty())
}

/// Scalar JSON as a label value; strings are kept verbatim.
fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Labels from either a `{key: value}` object or a list of `key:value` tags.
/// A bare tag becomes a key with an empty value.
fn label_map(value: Option<&Value>) -> BTreeMap<String, String> {
    match value {
        Some(Value::Object(map)) => map
            .iter()
            .filter_map(|(k, v)| scalar_text(v).map(|v| (k.clone(), v)))
            .collect(),
        Some(Value::Array(items)) => items.iter().filter_map(Value::as_str).map(split_tag).collect(),
        Some(Value::String(tags)) => tags
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(split_tag)
            .collect(),
        _ => BTreeMap::new(),
    }
}

fn split_tag(tag: &str) -> (String, String) {
    match tag.split_once(':') {
        Some((k, v)) => (k.trim().to_string(), v.trim().to_string()),
        None => (tag.trim().to_string(), String::new()),
    }
}

/// RFC 3339 strings or epoch numbers (seconds, or milliseconds when large).
fn parse_time(value: Option<&Value>) -> Option<DateTime<Utc>> {
    match value? {
        Value::String(s) => DateTime::parse_from_rfc3339(s.trim())
            .ok()
            .map(|t| t.with_timezone(&Utc))
            .filter(|t| t.timestamp() > 0),
        Value::Number(n) => {
            let raw = n.as_i64()?;
            let millis = if raw.abs() >= 100_000_000_000 {
                raw
            } else {
                raw.checked_mul(1000)?
            };
            Utc.timestamp_millis_opt(millis).single()
        }
        _ => None,
    }
}

fn is_resolved_word(raw: &str) -> bool {
    matches!(
        raw.trim().to_lowercase().as_str(),
        "resolved" | "ok" | "closed" | "recovered" | "inactive" | "normal" | "cleared"
    )
}

/// The mapper a payload looks like it came from.
pub fn detect(payload: &Value, headers: &HashMap<String, String>) -> &'static str {
    let user_agent = headers
        .get("user-agent")
        .map(|ua| ua.to_lowercase())
        .unwrap_or_default();

    if let Some(alerts) = payload.get("alerts").and_then(Value::as_array) {
        if payload.get("orgId").is_some() || user_agent.contains("grafana") {
            return "grafana";
        }
        let alertmanager_shaped = alerts.iter().all(|a| {
            a.get("labels").map_or(false, Value::is_object)
                || a.get("annotations").map_or(false, Value::is_object)
        });
        if alertmanager_shaped {
            return "prometheus";
        }
    }
    if payload.get("ruleName").is_some() && payload.get("state").is_some() {
        return "grafana";
    }
    if payload
        .get("data")
        .and_then(|d| d.get("essentials"))
        .map_or(false, Value::is_object)
    {
        return "azure";
    }
    if payload.get("alert_type").is_some() || payload.get("event_type").is_some() {
        return "datadog";
    }
    "generic"
}

/// Vendor mappers by name. `prometheus` and `alertmanager` share one mapper.
pub struct SourceRegistry {
    parsers: HashMap<&'static str, Box<dyn AlertSourceParser>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        let mut parsers: HashMap<&'static str, Box<dyn AlertSourceParser>> = HashMap::new();
        parsers.insert("prometheus", Box::new(AlertmanagerSource));
        parsers.insert("alertmanager", Box::new(AlertmanagerSource));
        parsers.insert("grafana", Box::new(GrafanaSource));
        parsers.insert("azure", Box::new(AzureMonitorSource));
        parsers.insert("datadog", Box::new(DatadogSource));
        parsers.insert("generic", Box::new(GenericSource));
        Self { parsers }
    }
}

impl Default for SourceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PayloadNormalizer for SourceRegistry {
    fn normalize(
        &self,
        vendor: Option<&str>,
        body: &[u8],
        headers: &HashMap<String, String>,
    ) -> Result<Vec<NormalizedAlert>, ParseError> {
        let payload: Value =
            serde_json::from_slice(body).map_err(|e| ParseError::InvalidJson(e.to_string()))?;

        let name = match vendor {
            Some(v) => v.to_lowercase(),
            None => detect(&payload, headers).to_string(),
        };
        let parser = self
            .parsers
            .get(name.as_str())
            .ok_or_else(|| ParseError::UnknownSource(name.clone()))?;

        let alerts = match parser.parse(&payload, headers) {
            Ok(alerts) => alerts,
            // A sniffed shape that turns out malformed still gets the
            // best-effort mapping; only an explicit vendor is held to its shape.
            Err(e) if vendor.is_none() => {
                debug!(detected = %name, error = %e, "falling back to generic mapping");
                GenericSource.parse(&payload, headers)?
            }
            Err(e) => return Err(e),
        };
        debug!(
            source = parser.source_name(),
            detected = vendor.is_none(),
            count = alerts.len(),
            "normalized webhook payload"
        );
        Ok(alerts)
    }
}
