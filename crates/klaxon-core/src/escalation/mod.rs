pub mod job;
pub mod level;
pub mod target;

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::ids::PolicyId;

pub use job::{escalation_key, escalation_key_prefix, EscalationJob};
pub use level::EscalationLevel;
pub use target::EscalationTarget;

/// Stored policies go through the same checks as new ones, so `levels` is
/// never empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "PolicyRecord")]
pub struct EscalationPolicy {
    id: PolicyId,
    name: String,
    levels: Vec<EscalationLevel>,
    repeat_count: u32,
    repeat_delay_minutes: u32,
}

#[derive(Deserialize)]
struct PolicyRecord {
    id: PolicyId,
    name: String,
    levels: Vec<EscalationLevel>,
    repeat_count: u32,
    repeat_delay_minutes: u32,
}

impl TryFrom<PolicyRecord> for EscalationPolicy {
    type Error = DomainError;

    fn try_from(record: PolicyRecord) -> Result<Self, DomainError> {
        Self::validated(
            record.id,
            record.name,
            record.levels,
            record.repeat_count,
            record.repeat_delay_minutes,
        )
    }
}

/// What the scheduler should enqueue after a wave has gone out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NextWave<'a> {
    pub level: &'a EscalationLevel,
    pub repetition: u32,
    pub delay: Duration,
}

impl EscalationPolicy {
    /// Levels are sorted; their numbers must be unique and contiguous from
    /// whichever base the first level uses.
    pub fn new(
        name: String,
        levels: Vec<EscalationLevel>,
        repeat_count: u32,
        repeat_delay_minutes: u32,
    ) -> Result<Self, DomainError> {
        Self::validated(
            PolicyId::new(),
            name,
            levels,
            repeat_count,
            repeat_delay_minutes,
        )
    }

    fn validated(
        id: PolicyId,
        name: String,
        mut levels: Vec<EscalationLevel>,
        repeat_count: u32,
        repeat_delay_minutes: u32,
    ) -> Result<Self, DomainError> {
        if levels.is_empty() {
            return Err(DomainError::PolicyRequiresLevel);
        }
        levels.sort_by_key(EscalationLevel::level);
        let contiguous = levels
            .windows(2)
            .all(|pair| pair[1].level() == pair[0].level() + 1);
        if !contiguous {
            return Err(DomainError::NonContiguousLevels(
                levels.iter().map(EscalationLevel::level).collect(),
            ));
        }
        if let Some(empty) = levels.iter().find(|l| l.targets().is_empty()) {
            return Err(DomainError::LevelRequiresTarget(empty.level()));
        }
        Ok(Self {
            id,
            name,
            levels,
            repeat_count,
            repeat_delay_minutes,
        })
    }

    pub fn first_level(&self) -> &EscalationLevel {
        &self.levels[0]
    }

    pub fn level(&self, number: u32) -> Option<&EscalationLevel> {
        self.levels.iter().find(|l| l.level() == number)
    }

    /// The wave following `level` on pass `repetition`. After the last level
    /// the policy restarts from its first level, spaced by the repeat delay,
    /// until `repeat_count` extra passes have been made.
    pub fn next_after(&self, level: u32, repetition: u32) -> Option<NextWave<'_>> {
        if let Some(next) = self.level(level + 1) {
            return Some(NextWave {
                level: next,
                repetition,
                delay: next.delay(),
            });
        }
        if repetition < self.repeat_count {
            return Some(NextWave {
                level: self.first_level(),
                repetition: repetition + 1,
                delay: self.repeat_delay(),
            });
        }
        None
    }

    pub fn id(&self) -> &PolicyId {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn levels(&self) -> &[EscalationLevel] {
        &self.levels
    }

    pub fn repeat_count(&self) -> u32 {
        self.repeat_count
    }

    pub fn repeat_delay(&self) -> Duration {
        Duration::minutes(i64::from(self.repeat_delay_minutes))
    }
}
