use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::warn;

use klaxon_core::ids::ScheduleId;
use klaxon_core::schedule::{self, OnCall};
use klaxon_ports::error::PortError;
use klaxon_ports::inbound::OnCallLookup;
use klaxon_ports::outbound::ScheduleRepository;

use crate::error::AppError;

#[derive(Clone)]
pub struct OnCallService {
    schedules: Arc<dyn ScheduleRepository>,
}

impl OnCallService {
    pub fn new(schedules: Arc<dyn ScheduleRepository>) -> Self {
        Self { schedules }
    }

    /// Who is on call for `schedule_id` at `at`. Lookup failures are logged
    /// and treated as nobody being on call.
    pub async fn resolve_on_call(
        &self,
        schedule_id: &ScheduleId,
        at: DateTime<Utc>,
    ) -> Option<OnCall> {
        match self.load_and_resolve(schedule_id, at).await {
            Ok(on_call) => on_call,
            Err(e) => {
                warn!(schedule_id = %schedule_id, error = %e, "on-call resolution failed");
                None
            }
        }
    }

    /// One result per schedule, in input order.
    pub async fn resolve_multiple(
        &self,
        schedule_ids: &[ScheduleId],
        at: DateTime<Utc>,
    ) -> Vec<(ScheduleId, Option<OnCall>)> {
        let mut results = Vec::with_capacity(schedule_ids.len());
        for id in schedule_ids {
            results.push((id.clone(), self.resolve_on_call(id, at).await));
        }
        results
    }

    async fn load_and_resolve(
        &self,
        schedule_id: &ScheduleId,
        at: DateTime<Utc>,
    ) -> Result<Option<OnCall>, AppError> {
        let overrides = self.schedules.overrides_for(schedule_id).await?;
        let rotations = self.schedules.rotations_for(schedule_id).await?;
        Ok(schedule::resolve_on_call(&overrides, &rotations, at))
    }
}

#[async_trait]
impl OnCallLookup for OnCallService {
    async fn who_is_on_call(
        &self,
        schedule_id: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<OnCall>, PortError> {
        let id = ScheduleId::parse(schedule_id).map_err(AppError::from)?;
        Ok(self.resolve_on_call(&id, at).await)
    }

    async fn who_is_on_call_many(
        &self,
        schedule_ids: &[String],
        at: DateTime<Utc>,
    ) -> Result<Vec<(String, Option<OnCall>)>, PortError> {
        let ids = schedule_ids
            .iter()
            .map(|id| ScheduleId::parse(id))
            .collect::<Result<Vec<_>, _>>()
            .map_err(AppError::from)?;
        Ok(self
            .resolve_multiple(&ids, at)
            .await
            .into_iter()
            .map(|(id, on_call)| (id.to_string(), on_call))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveTime;
    use chrono_tz::Tz;
    use klaxon_core::ids::UserId;
    use klaxon_core::schedule::{OnCallSource, Rotation, RotationKind, ScheduleOverride};

    use crate::mocks::{ts, MockScheduleRepo};

    fn rotation(schedule: &ScheduleId, members: Vec<UserId>) -> Rotation {
        Rotation::new(
            schedule.clone(),
            RotationKind::Daily,
            ts("2025-01-01T09:00:00Z"),
            NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            Tz::UTC,
            members,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn rotation_member_is_on_call() {
        let repo = MockScheduleRepo::default();
        let schedule = ScheduleId::new();
        let users = vec![UserId::new(), UserId::new()];
        repo.rotations
            .lock()
            .unwrap()
            .push(rotation(&schedule, users.clone()));
        let svc = OnCallService::new(Arc::new(repo));

        // Day 14 after effective_from, even index.
        let on_call = svc
            .resolve_on_call(&schedule, ts("2025-01-15T10:00:00Z"))
            .await
            .unwrap();
        assert_eq!(on_call.user_id, users[0]);
    }

    #[tokio::test]
    async fn override_wins_over_rotation() {
        let repo = MockScheduleRepo::default();
        let schedule = ScheduleId::new();
        let stand_in = UserId::new();
        repo.rotations
            .lock()
            .unwrap()
            .push(rotation(&schedule, vec![UserId::new()]));
        let ovr = ScheduleOverride::new(
            schedule.clone(),
            stand_in.clone(),
            ts("2025-01-15T00:00:00Z"),
            ts("2025-01-16T00:00:00Z"),
            Some("swap".into()),
            ts("2025-01-14T00:00:00Z"),
        )
        .unwrap();
        repo.overrides.lock().unwrap().push(ovr.clone());
        let svc = OnCallService::new(Arc::new(repo));

        let on_call = svc
            .resolve_on_call(&schedule, ts("2025-01-15T10:00:00Z"))
            .await
            .unwrap();
        assert_eq!(on_call.user_id, stand_in);
        assert_eq!(
            on_call.source,
            OnCallSource::Override {
                override_id: ovr.id().clone()
            }
        );
    }

    #[tokio::test]
    async fn lookup_failure_means_nobody() {
        let svc = OnCallService::new(Arc::new(MockScheduleRepo {
            fail: true,
            ..MockScheduleRepo::default()
        }));
        let on_call = svc
            .resolve_on_call(&ScheduleId::new(), ts("2025-01-15T10:00:00Z"))
            .await;
        assert!(on_call.is_none());
    }

    #[tokio::test]
    async fn multiple_schedules_keep_input_order() {
        let repo = MockScheduleRepo::default();
        let staffed = ScheduleId::new();
        let empty = ScheduleId::new();
        let user = UserId::new();
        repo.rotations
            .lock()
            .unwrap()
            .push(rotation(&staffed, vec![user.clone()]));
        let svc = OnCallService::new(Arc::new(repo));

        let results = svc
            .resolve_multiple(
                &[empty.clone(), staffed.clone()],
                ts("2025-01-15T10:00:00Z"),
            )
            .await;
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].0, empty);
        assert!(results[0].1.is_none());
        assert_eq!(results[1].0, staffed);
        assert_eq!(results[1].1.as_ref().map(|o| &o.user_id), Some(&user));
    }

    #[tokio::test]
    async fn malformed_schedule_id_is_invalid() {
        let svc = OnCallService::new(Arc::new(MockScheduleRepo::default()));
        let result = svc
            .who_is_on_call("not-a-uuid", ts("2025-01-15T10:00:00Z"))
            .await;
        assert!(matches!(result, Err(PortError::Invalid(_))));
    }
}
