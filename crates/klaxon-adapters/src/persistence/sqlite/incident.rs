use async_trait::async_trait;

use klaxon_core::alert::Severity;
use klaxon_core::ids::ServiceId;
use klaxon_core::incident::{Incident, IncidentStatus};
use klaxon_ports::error::PortError;
use klaxon_ports::outbound::IncidentRepository;

use super::{decode, encode, write_error, SqliteDb};

#[async_trait]
impl IncidentRepository for SqliteDb {
    async fn next_number(&self) -> Result<u64, PortError> {
        let (value,): (i64,) = sqlx::query_as(
            "INSERT INTO counters (name, value) VALUES ('incident_number', 1)
             ON CONFLICT(name) DO UPDATE SET value = value + 1
             RETURNING value",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(|e| PortError::Persistence(e.to_string()))?;

        Ok(value as u64)
    }

    async fn insert(&self, incident: &Incident) -> Result<(), PortError> {
        let data = encode(incident)?;

        sqlx::query(
            "INSERT INTO incidents
                (id, number, service_id, severity, status, data, triggered_at, revision)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(incident.id().to_string())
        .bind(incident.number() as i64)
        .bind(incident.service_id().to_string())
        .bind(incident.severity().as_str())
        .bind(incident.status().as_str())
        .bind(&data)
        .bind(incident.triggered_at().to_rfc3339())
        .bind(incident.revision() as i64)
        .execute(&self.pool)
        .await
        .map_err(|e| write_error(e, "triggered incident for service and severity"))?;

        Ok(())
    }

    async fn update(
        &self,
        incident: &mut Incident,
        expected: IncidentStatus,
    ) -> Result<bool, PortError> {
        let revision = incident.revision();
        incident.set_revision(revision + 1);
        let written = self.write_incident(incident, expected, revision).await;
        if !matches!(written, Ok(true)) {
            incident.set_revision(revision);
        }
        written
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Incident>, PortError> {
        let row: Option<(String,)> = sqlx::query_as("SELECT data FROM incidents WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| PortError::Persistence(e.to_string()))?;

        row.map(|(data,)| decode(&data)).transpose()
    }

    async fn find_triggered(
        &self,
        service_id: &ServiceId,
        severity: Severity,
    ) -> Result<Option<Incident>, PortError> {
        let row: Option<(String,)> = sqlx::query_as(
            "SELECT data FROM incidents
             WHERE service_id = ? AND severity = ? AND status = 'triggered'",
        )
        .bind(service_id.to_string())
        .bind(severity.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| PortError::Persistence(e.to_string()))?;

        row.map(|(data,)| decode(&data)).transpose()
    }
}

impl SqliteDb {
    async fn write_incident(
        &self,
        incident: &Incident,
        expected: IncidentStatus,
        read_at: u64,
    ) -> Result<bool, PortError> {
        let data = encode(incident)?;

        let result = sqlx::query(
            "UPDATE incidents SET status = ?, data = ?, revision = ?
             WHERE id = ? AND status = ? AND revision = ?",
        )
        .bind(incident.status().as_str())
        .bind(&data)
        .bind(incident.revision() as i64)
        .bind(incident.id().to_string())
        .bind(expected.as_str())
        .bind(read_at as i64)
        .execute(&self.pool)
        .await
        .map_err(|e| write_error(e, "triggered incident for service and severity"))?;

        Ok(result.rows_affected() == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use klaxon_core::ids::UserId;

    fn ts(s: &str) -> chrono::DateTime<chrono::Utc> {
        chrono::DateTime::parse_from_rfc3339(s)
            .unwrap()
            .with_timezone(&chrono::Utc)
    }

    async fn db() -> SqliteDb {
        SqliteDb::new("sqlite::memory:").await.unwrap()
    }

    async fn open(db: &SqliteDb, service: &ServiceId, severity: Severity) -> Incident {
        let number = db.next_number().await.unwrap();
        let (incident, _) = Incident::open(
            number,
            service.clone(),
            severity,
            "CPU high".into(),
            ts("2025-01-15T10:00:00Z"),
        );
        incident
    }

    #[tokio::test]
    async fn numbers_increase_monotonically() {
        let db = db().await;
        let first = db.next_number().await.unwrap();
        let second = db.next_number().await.unwrap();
        let third = db.next_number().await.unwrap();
        assert_eq!((first, second, third), (1, 2, 3));
    }

    #[tokio::test]
    async fn insert_and_find_triggered() {
        let db = db().await;
        let service = ServiceId::new();
        let incident = open(&db, &service, Severity::Critical).await;
        db.insert(&incident).await.unwrap();

        let found = db
            .find_triggered(&service, Severity::Critical)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found, incident);
        assert!(db
            .find_triggered(&service, Severity::High)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn second_triggered_incident_for_group_conflicts() {
        let db = db().await;
        let service = ServiceId::new();
        db.insert(&open(&db, &service, Severity::Critical).await)
            .await
            .unwrap();

        let err = db
            .insert(&open(&db, &service, Severity::Critical).await)
            .await
            .unwrap_err();
        assert!(matches!(err, PortError::Conflict(_)));

        db.insert(&open(&db, &service, Severity::Low).await)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn acknowledged_incident_frees_the_group() {
        let db = db().await;
        let service = ServiceId::new();
        let mut incident = open(&db, &service, Severity::Critical).await;
        db.insert(&incident).await.unwrap();

        incident.acknowledge(UserId::new(), ts("2025-01-15T10:05:00Z"));
        assert!(db
            .update(&mut incident, IncidentStatus::Triggered)
            .await
            .unwrap());
        assert!(db
            .find_triggered(&service, Severity::Critical)
            .await
            .unwrap()
            .is_none());

        db.insert(&open(&db, &service, Severity::Critical).await)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn stale_update_is_rejected() {
        let db = db().await;
        let service = ServiceId::new();
        let mut incident = open(&db, &service, Severity::Critical).await;
        db.insert(&incident).await.unwrap();

        incident.resolve(UserId::new(), ts("2025-01-15T10:05:00Z"));
        assert!(!db
            .update(&mut incident, IncidentStatus::Acknowledged)
            .await
            .unwrap());

        let stored = db
            .find_by_id(&incident.id().to_string())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status(), IncidentStatus::Triggered);
    }

    #[tokio::test]
    async fn concurrent_timeline_appends_do_not_both_land() {
        let db = db().await;
        let service = ServiceId::new();
        let incident = open(&db, &service, Severity::Critical).await;
        db.insert(&incident).await.unwrap();
        let at = ts("2025-01-15T10:01:00Z");

        let mut grouping = incident.clone();
        let mut escalation = incident.clone();
        grouping.record_alert("Disk full", at);
        escalation.record_escalation(1, 2, at);

        assert!(db
            .update(&mut grouping, IncidentStatus::Triggered)
            .await
            .unwrap());
        // Still triggered, but read before the grouping write.
        assert!(!db
            .update(&mut escalation, IncidentStatus::Triggered)
            .await
            .unwrap());

        let stored = db
            .find_by_id(&incident.id().to_string())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.timeline().len(), 2);
        assert_eq!(stored.revision(), 1);
    }
}
