use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::ids::{OverrideId, ScheduleId, UserId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleOverride {
    id: OverrideId,
    schedule_id: ScheduleId,
    user_id: UserId,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    reason: Option<String>,
    created_at: DateTime<Utc>,
}

impl ScheduleOverride {
    pub fn new(
        schedule_id: ScheduleId,
        user_id: UserId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Self, DomainError> {
        if end <= start {
            return Err(DomainError::InvalidOverridePeriod);
        }
        Ok(Self {
            id: OverrideId::new(),
            schedule_id,
            user_id,
            start,
            end,
            reason,
            created_at: now,
        })
    }

    pub fn id(&self) -> &OverrideId {
        &self.id
    }

    pub fn schedule_id(&self) -> &ScheduleId {
        &self.schedule_id
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    pub fn is_active_at(&self, at: DateTime<Utc>) -> bool {
        at >= self.start && at < self.end
    }

    pub fn window(&self) -> Duration {
        self.end - self.start
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}
