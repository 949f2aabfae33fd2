use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use klaxon_core::alert::Alert;
use klaxon_core::incident::Incident;
use klaxon_core::schedule::OnCall;

use crate::error::PortError;
use crate::types::IngestReport;

#[async_trait]
pub trait AlertReceiver: Send + Sync {
    async fn receive(
        &self,
        integration_key: &str,
        vendor: Option<&str>,
        body: &[u8],
        headers: &HashMap<String, String>,
    ) -> Result<IngestReport, PortError>;
}

#[async_trait]
pub trait AlertManager: Send + Sync {
    async fn acknowledge(&self, alert_id: &str, user_id: &str) -> Result<Alert, PortError>;
    async fn resolve(&self, alert_id: &str, resolved_by: Option<&str>) -> Result<Alert, PortError>;
    async fn get_alert(&self, alert_id: &str) -> Result<Alert, PortError>;
}

#[async_trait]
pub trait IncidentManager: Send + Sync {
    async fn acknowledge(&self, incident_id: &str, user_id: &str) -> Result<Incident, PortError>;
    async fn resolve(&self, incident_id: &str, user_id: &str) -> Result<Incident, PortError>;
    async fn get_incident(&self, incident_id: &str) -> Result<(Incident, Vec<Alert>), PortError>;
}

#[async_trait]
pub trait OnCallLookup: Send + Sync {
    async fn who_is_on_call(
        &self,
        schedule_id: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<OnCall>, PortError>;

    /// One entry per requested schedule, in request order.
    async fn who_is_on_call_many(
        &self,
        schedule_ids: &[String],
        at: DateTime<Utc>,
    ) -> Result<Vec<(String, Option<OnCall>)>, PortError>;
}
