use std::collections::{BTreeMap, HashMap};

use serde::Deserialize;
use serde_json::Value;

use klaxon_core::alert::{NormalizedAlert, Status};
use klaxon_ports::error::ParseError;
use klaxon_ports::outbound::AlertSourceParser;

use super::{normalize_severity, parse_time};

#[derive(Debug, Deserialize)]
struct Envelope {
    data: Data,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Data {
    essentials: Essentials,
}

/// The `essentials` block of the Azure Monitor common alert schema.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Essentials {
    alert_rule: Option<String>,
    severity: Option<String>,
    monitor_condition: Option<String>,
    description: Option<String>,
    signal_type: Option<String>,
    monitoring_service: Option<String>,
    fired_date_time: Option<Value>,
    subscription_id: Option<String>,
    resource_group: Option<String>,
    resource_name: Option<String>,
    alert_id: Option<String>,
}

pub struct AzureMonitorSource;

impl AlertSourceParser for AzureMonitorSource {
    fn parse(
        &self,
        payload: &Value,
        _headers: &HashMap<String, String>,
    ) -> Result<Vec<NormalizedAlert>, ParseError> {
        let envelope: Envelope = serde_json::from_value(payload.clone())
            .map_err(|e| ParseError::InvalidPayload(e.to_string()))?;
        let essentials = envelope.data.essentials;

        let labels: BTreeMap<String, String> = [
            ("subscriptionId", &essentials.subscription_id),
            ("resourceGroup", &essentials.resource_group),
            ("resourceName", &essentials.resource_name),
            ("signalType", &essentials.signal_type),
            ("monitoringService", &essentials.monitoring_service),
        ]
        .into_iter()
        .filter_map(|(k, v)| v.as_ref().map(|v| (k.to_string(), v.clone())))
        .collect();

        let mut annotations = BTreeMap::new();
        if let Some(id) = &essentials.alert_id {
            annotations.insert("alertId".to_string(), id.clone());
        }

        let status = match essentials.monitor_condition.as_deref() {
            Some(c) if c.eq_ignore_ascii_case("resolved") => Status::Resolved,
            _ => Status::Firing,
        };
        let title = essentials
            .alert_rule
            .clone()
            .unwrap_or_else(|| "Azure Monitor alert".to_string());

        Ok(vec![NormalizedAlert {
            alert_name: essentials.alert_rule,
            title,
            description: essentials.description,
            severity: normalize_severity(essentials.severity.as_deref()),
            status,
            source: self.source_name().to_string(),
            labels,
            annotations,
            raw_payload: payload.clone(),
            fired_at: parse_time(essentials.fired_date_time.as_ref()),
        }])
    }

    fn source_name(&self) -> &str {
        "azure"
    }
}
