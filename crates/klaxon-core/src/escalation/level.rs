use chrono::Duration;
use serde::{Deserialize, Serialize};

use super::target::EscalationTarget;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationLevel {
    level: u32,
    delay_minutes: u32,
    targets: Vec<EscalationTarget>,
}

impl EscalationLevel {
    pub fn new(level: u32, delay_minutes: u32, targets: Vec<EscalationTarget>) -> Self {
        Self {
            level,
            delay_minutes,
            targets,
        }
    }

    pub fn level(&self) -> u32 {
        self.level
    }

    pub fn delay_minutes(&self) -> u32 {
        self.delay_minutes
    }

    pub fn delay(&self) -> Duration {
        Duration::minutes(i64::from(self.delay_minutes))
    }

    pub fn targets(&self) -> &[EscalationTarget] {
        &self.targets
    }
}
