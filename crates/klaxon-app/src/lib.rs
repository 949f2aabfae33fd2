pub mod alert_service;
pub mod error;
pub mod escalation_service;
pub mod incident_service;
pub mod notification_dispatcher;
pub mod oncall_service;
pub mod router;

#[cfg(test)]
mod mocks;
