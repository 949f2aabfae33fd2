use async_trait::async_trait;

use klaxon_core::ids::ScheduleId;
use klaxon_core::schedule::{Rotation, ScheduleOverride};
use klaxon_ports::error::PortError;
use klaxon_ports::outbound::ScheduleRepository;

use super::{decode, encode, SqliteDb};

#[async_trait]
impl ScheduleRepository for SqliteDb {
    async fn save_rotation(&self, rotation: &Rotation) -> Result<(), PortError> {
        let data = encode(rotation)?;

        sqlx::query(
            "INSERT INTO rotations (id, schedule_id, data) VALUES (?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET data = excluded.data",
        )
        .bind(rotation.id().to_string())
        .bind(rotation.schedule_id().to_string())
        .bind(&data)
        .execute(&self.pool)
        .await
        .map_err(|e| PortError::Persistence(e.to_string()))?;

        Ok(())
    }

    async fn save_override(&self, ovr: &ScheduleOverride) -> Result<(), PortError> {
        let data = encode(ovr)?;

        sqlx::query(
            "INSERT INTO schedule_overrides (id, schedule_id, data) VALUES (?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET data = excluded.data",
        )
        .bind(ovr.id().to_string())
        .bind(ovr.schedule_id().to_string())
        .bind(&data)
        .execute(&self.pool)
        .await
        .map_err(|e| PortError::Persistence(e.to_string()))?;

        Ok(())
    }

    async fn rotations_for(&self, schedule_id: &ScheduleId) -> Result<Vec<Rotation>, PortError> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT data FROM rotations WHERE schedule_id = ?")
                .bind(schedule_id.to_string())
                .fetch_all(&self.pool)
                .await
                .map_err(|e| PortError::Persistence(e.to_string()))?;

        rows.iter().map(|(data,)| decode(data)).collect()
    }

    async fn overrides_for(
        &self,
        schedule_id: &ScheduleId,
    ) -> Result<Vec<ScheduleOverride>, PortError> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT data FROM schedule_overrides WHERE schedule_id = ?")
                .bind(schedule_id.to_string())
                .fetch_all(&self.pool)
                .await
                .map_err(|e| PortError::Persistence(e.to_string()))?;

        rows.iter().map(|(data,)| decode(data)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveTime, Weekday};
    use chrono_tz::Tz;
    use klaxon_core::ids::UserId;
    use klaxon_core::schedule::{resolve_on_call, RotationKind};

    fn ts(s: &str) -> chrono::DateTime<chrono::Utc> {
        chrono::DateTime::parse_from_rfc3339(s)
            .unwrap()
            .with_timezone(&chrono::Utc)
    }

    async fn db() -> SqliteDb {
        SqliteDb::new("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn rotation_keeps_its_timezone() {
        let db = db().await;
        let schedule = ScheduleId::new();
        let rotation = Rotation::new(
            schedule.clone(),
            RotationKind::Weekly {
                handoff_day: Weekday::Mon,
            },
            ts("2025-01-06T08:00:00Z"),
            NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            Tz::Europe__Paris,
            vec![UserId::new(), UserId::new()],
        )
        .unwrap();
        db.save_rotation(&rotation).await.unwrap();

        let found = db.rotations_for(&schedule).await.unwrap();
        assert_eq!(found, vec![rotation]);
        assert_eq!(found[0].timezone(), &Tz::Europe__Paris);
        assert!(db.rotations_for(&ScheduleId::new()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn stored_override_wins_over_stored_rotation() {
        let db = db().await;
        let schedule = ScheduleId::new();
        let regular = UserId::new();
        let stand_in = UserId::new();
        let rotation = Rotation::new(
            schedule.clone(),
            RotationKind::Daily,
            ts("2025-01-01T09:00:00Z"),
            NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            Tz::UTC,
            vec![regular.clone()],
        )
        .unwrap();
        let ovr = ScheduleOverride::new(
            schedule.clone(),
            stand_in.clone(),
            ts("2025-01-15T00:00:00Z"),
            ts("2025-01-16T00:00:00Z"),
            Some("swap".into()),
            ts("2025-01-10T00:00:00Z"),
        )
        .unwrap();
        db.save_rotation(&rotation).await.unwrap();
        db.save_override(&ovr).await.unwrap();

        let rotations = db.rotations_for(&schedule).await.unwrap();
        let overrides = db.overrides_for(&schedule).await.unwrap();
        let during = resolve_on_call(&overrides, &rotations, ts("2025-01-15T12:00:00Z")).unwrap();
        assert_eq!(during.user_id, stand_in);
        let after = resolve_on_call(&overrides, &rotations, ts("2025-01-16T12:00:00Z")).unwrap();
        assert_eq!(after.user_id, regular);
    }
}
