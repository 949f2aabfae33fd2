use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, Utc, Weekday};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::ids::{RotationId, ScheduleId, UserId};

use super::tz_serde;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberWindow {
    pub user_id: UserId,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl MemberWindow {
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.start && at < self.end
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RotationKind {
    Daily,
    Weekly { handoff_day: Weekday },
    /// Explicit per-member windows instead of a repeating cycle.
    Custom { windows: Vec<MemberWindow> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rotation {
    id: RotationId,
    schedule_id: ScheduleId,
    kind: RotationKind,
    effective_from: DateTime<Utc>,
    handoff_time: NaiveTime,
    #[serde(with = "tz_serde")]
    timezone: Tz,
    members: Vec<UserId>,
}

impl Rotation {
    pub fn new(
        schedule_id: ScheduleId,
        kind: RotationKind,
        effective_from: DateTime<Utc>,
        handoff_time: NaiveTime,
        timezone: Tz,
        members: Vec<UserId>,
    ) -> Result<Self, DomainError> {
        let has_member = match &kind {
            RotationKind::Custom { windows } => !windows.is_empty(),
            RotationKind::Daily | RotationKind::Weekly { .. } => !members.is_empty(),
        };
        if !has_member {
            return Err(DomainError::RotationRequiresMember);
        }
        Ok(Self {
            id: RotationId::new(),
            schedule_id,
            kind,
            effective_from,
            handoff_time,
            timezone,
            members,
        })
    }

    pub fn is_effective_at(&self, at: DateTime<Utc>) -> bool {
        self.effective_from <= at
    }

    /// Member responsible at `at`, or `None` before `effective_from` or when
    /// no custom window covers the instant.
    pub fn on_call_at(&self, at: DateTime<Utc>) -> Option<&UserId> {
        if !self.is_effective_at(at) {
            return None;
        }
        match &self.kind {
            RotationKind::Custom { windows } => windows
                .iter()
                .find(|w| w.contains(at))
                .map(|w| &w.user_id),
            RotationKind::Daily => {
                let days = (self.handoff_day(at) - self.handoff_day(self.effective_from)).num_days();
                self.member_at(days)
            }
            RotationKind::Weekly { handoff_day } => {
                let weeks = (self.handoff_week(at, *handoff_day)
                    - self.handoff_week(self.effective_from, *handoff_day))
                .num_days()
                    / 7;
                self.member_at(weeks)
            }
        }
    }

    fn member_at(&self, periods: i64) -> Option<&UserId> {
        if self.members.is_empty() {
            return None;
        }
        let index = periods.rem_euclid(self.members.len() as i64) as usize;
        self.members.get(index)
    }

    /// Local calendar day an instant belongs to; instants before the handoff
    /// time still count as the previous day.
    fn handoff_day(&self, at: DateTime<Utc>) -> NaiveDate {
        let local = at.with_timezone(&self.timezone);
        let date = local.date_naive();
        if local.time() < self.handoff_time {
            date - Duration::days(1)
        } else {
            date
        }
    }

    /// Local date of the most recent `handoff_day` + `handoff_time` boundary
    /// at or before `at`.
    fn handoff_week(&self, at: DateTime<Utc>, handoff_day: Weekday) -> NaiveDate {
        let local = at.with_timezone(&self.timezone);
        let since = (local.weekday().num_days_from_monday() + 7
            - handoff_day.num_days_from_monday())
            % 7;
        let mut start = local.date_naive() - Duration::days(i64::from(since));
        if since == 0 && local.time() < self.handoff_time {
            start = start - Duration::weeks(1);
        }
        start
    }

    pub fn id(&self) -> &RotationId {
        &self.id
    }

    pub fn schedule_id(&self) -> &ScheduleId {
        &self.schedule_id
    }

    pub fn kind(&self) -> &RotationKind {
        &self.kind
    }

    pub fn effective_from(&self) -> DateTime<Utc> {
        self.effective_from
    }

    pub fn handoff_time(&self) -> NaiveTime {
        self.handoff_time
    }

    pub fn timezone(&self) -> &Tz {
        &self.timezone
    }

    pub fn members(&self) -> &[UserId] {
        &self.members
    }
}
