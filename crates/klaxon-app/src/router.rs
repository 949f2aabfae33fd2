use std::sync::Arc;

use tracing::warn;

use klaxon_core::alert::Alert;
use klaxon_core::ids::TeamId;
use klaxon_core::routing::{self, RoutingOutcome};
use klaxon_ports::outbound::RoutingRuleRepository;

/// Applies a team's routing rules to incoming alerts.
#[derive(Clone)]
pub struct RoutingEngine {
    rules: Arc<dyn RoutingRuleRepository>,
}

impl RoutingEngine {
    pub fn new(rules: Arc<dyn RoutingRuleRepository>) -> Self {
        Self { rules }
    }

    /// Never fails: a rule store error or a broken rule yields the default
    /// outcome, meaning no rule applied.
    pub async fn route(&self, team_id: &TeamId, alert: &Alert) -> RoutingOutcome {
        let rules = match self.rules.enabled_for_team(team_id).await {
            Ok(rules) => rules,
            Err(e) => {
                warn!(team_id = %team_id, error = %e, "failed to load routing rules");
                return RoutingOutcome::default();
            }
        };
        match routing::evaluate(&rules, alert) {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(
                    team_id = %team_id,
                    alert_id = %alert.id(),
                    error = %e,
                    "routing rule evaluation failed"
                );
                RoutingOutcome::default()
            }
        }
    }
}
