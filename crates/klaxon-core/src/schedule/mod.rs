pub mod rotation;
pub mod shift_override;

use std::cmp::Reverse;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{OverrideId, RotationId, UserId};

pub use rotation::{MemberWindow, Rotation, RotationKind};
pub use shift_override::ScheduleOverride;

mod tz_serde {
    use chrono_tz::Tz;
    use serde::{self, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(tz: &Tz, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(tz.name())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Tz, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse::<Tz>().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "lowercase")]
pub enum OnCallSource {
    Override { override_id: OverrideId },
    Rotation { rotation_id: RotationId },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnCall {
    pub user_id: UserId,
    #[serde(flatten)]
    pub source: OnCallSource,
}

/// Who is responsible at `at`. Overrides are consulted before rotations;
/// `None` means nobody is on call.
pub fn resolve_on_call(
    overrides: &[ScheduleOverride],
    rotations: &[Rotation],
    at: DateTime<Utc>,
) -> Option<OnCall> {
    if let Some(ovr) = authoritative_override(overrides, at) {
        return Some(OnCall {
            user_id: ovr.user_id().clone(),
            source: OnCallSource::Override {
                override_id: ovr.id().clone(),
            },
        });
    }

    let rotation = active_rotation(rotations, at)?;
    rotation.on_call_at(at).map(|user| OnCall {
        user_id: user.clone(),
        source: OnCallSource::Rotation {
            rotation_id: rotation.id().clone(),
        },
    })
}

/// Among overrides covering `at`, the narrowest window wins, then the most
/// recently created, then the highest id.
pub fn authoritative_override(
    overrides: &[ScheduleOverride],
    at: DateTime<Utc>,
) -> Option<&ScheduleOverride> {
    overrides
        .iter()
        .filter(|o| o.is_active_at(at))
        .max_by_key(|o| (Reverse(o.window()), o.created_at(), o.id().clone()))
}

/// The most recently effective rotation as of `at`.
pub fn active_rotation(rotations: &[Rotation], at: DateTime<Utc>) -> Option<&Rotation> {
    rotations
        .iter()
        .filter(|r| r.is_effective_at(at))
        .max_by_key(|r| r.effective_from())
}
