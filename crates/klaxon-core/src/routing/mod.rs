pub mod action;
pub mod condition;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::alert::{Alert, Severity};
use crate::error::DomainError;
use crate::ids::{RuleId, ServiceId, TeamId};

pub use action::Action;
pub use condition::Condition;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingRule {
    pub id: RuleId,
    pub team_id: TeamId,
    pub name: String,
    /// Lower values are evaluated first.
    pub priority: i32,
    pub enabled: bool,
    /// `true` requires every condition, `false` any one of them.
    pub match_all_conditions: bool,
    pub conditions: Vec<Condition>,
    pub actions: Vec<Action>,
}

impl RoutingRule {
    /// A rule without conditions matches every alert.
    pub fn matches(&self, alert: &Alert) -> Result<bool, DomainError> {
        if self.conditions.is_empty() {
            return Ok(true);
        }
        if self.match_all_conditions {
            for condition in &self.conditions {
                if !condition.matches(alert)? {
                    return Ok(false);
                }
            }
            Ok(true)
        } else {
            for condition in &self.conditions {
                if condition.matches(alert)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
    }
}

/// Effect of the first matching rule on an incoming alert.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoutingOutcome {
    pub rule_id: Option<RuleId>,
    pub service_id: Option<ServiceId>,
    pub severity: Option<Severity>,
    pub suppress: bool,
    pub tags: BTreeMap<String, String>,
}

impl RoutingOutcome {
    fn from_actions(rule_id: RuleId, actions: &[Action]) -> Self {
        let mut outcome = Self {
            rule_id: Some(rule_id),
            ..Self::default()
        };
        for action in actions {
            match action {
                Action::RouteToService { service_id } => {
                    outcome.service_id = Some(service_id.clone());
                }
                Action::SetSeverity { severity } => outcome.severity = Some(*severity),
                Action::AddTags { tags } => {
                    outcome
                        .tags
                        .extend(tags.iter().map(|(k, v)| (k.clone(), v.clone())));
                }
                Action::Suppress => {
                    outcome.suppress = true;
                    break;
                }
            }
        }
        outcome
    }
}

/// First-match-wins evaluation over enabled rules in ascending priority.
/// Returns the default outcome when nothing matches.
pub fn evaluate(rules: &[RoutingRule], alert: &Alert) -> Result<RoutingOutcome, DomainError> {
    let mut ordered: Vec<&RoutingRule> = rules.iter().filter(|r| r.enabled).collect();
    ordered.sort_by_key(|r| r.priority);
    for rule in ordered {
        if rule.matches(alert)? {
            return Ok(RoutingOutcome::from_actions(rule.id.clone(), &rule.actions));
        }
    }
    Ok(RoutingOutcome::default())
}
