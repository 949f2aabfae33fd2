use std::sync::Arc;

use klaxon_ports::inbound::{AlertManager, AlertReceiver, IncidentManager, OnCallLookup};

/// Inbound ports shared by every request handler.
#[derive(Clone)]
pub struct AppState {
    pub receiver: Arc<dyn AlertReceiver>,
    pub alerts: Arc<dyn AlertManager>,
    pub incidents: Arc<dyn IncidentManager>,
    pub oncall: Arc<dyn OnCallLookup>,
}
