use serde::{Deserialize, Serialize};

use crate::ids::{ScheduleId, TeamId, UserId};

/// Who a level notifies. Teams expand to their active members and
/// schedules to whoever is on call when the level fires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "target_id", rename_all = "lowercase")]
pub enum EscalationTarget {
    User(UserId),
    Team(TeamId),
    Schedule(ScheduleId),
}
