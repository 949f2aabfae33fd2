use async_trait::async_trait;

use klaxon_core::alert::{Alert, Status};
use klaxon_core::ids::IncidentId;
use klaxon_ports::error::PortError;
use klaxon_ports::outbound::AlertRepository;

use super::{decode, encode, write_error, SqliteDb};

#[async_trait]
impl AlertRepository for SqliteDb {
    async fn insert(&self, alert: &Alert) -> Result<(), PortError> {
        let data = encode(alert)?;

        sqlx::query(
            "INSERT INTO alerts (id, fingerprint, status, incident_id, data, created_at, revision)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(alert.id().to_string())
        .bind(alert.fingerprint().as_str())
        .bind(alert.status().as_str())
        .bind(alert.incident_id().map(ToString::to_string))
        .bind(&data)
        .bind(alert.created_at().to_rfc3339())
        .bind(alert.revision() as i64)
        .execute(&self.pool)
        .await
        .map_err(|e| write_error(e, "firing alert for fingerprint"))?;

        Ok(())
    }

    async fn update(&self, alert: &mut Alert, expected: Status) -> Result<bool, PortError> {
        let revision = alert.revision();
        alert.set_revision(revision + 1);
        let written = self.write_alert(alert, expected, revision).await;
        if !matches!(written, Ok(true)) {
            alert.set_revision(revision);
        }
        written
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Alert>, PortError> {
        let row: Option<(String,)> = sqlx::query_as("SELECT data FROM alerts WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| PortError::Persistence(e.to_string()))?;

        row.map(|(data,)| decode(&data)).transpose()
    }

    async fn find_firing_by_fingerprint(&self, fp: &str) -> Result<Option<Alert>, PortError> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT data FROM alerts WHERE fingerprint = ? AND status = 'firing'")
                .bind(fp)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| PortError::Persistence(e.to_string()))?;

        row.map(|(data,)| decode(&data)).transpose()
    }

    async fn find_open_by_fingerprint(&self, fp: &str) -> Result<Vec<Alert>, PortError> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT data FROM alerts
             WHERE fingerprint = ? AND status IN ('firing', 'acknowledged')
             ORDER BY created_at DESC, rowid DESC",
        )
        .bind(fp)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| PortError::Persistence(e.to_string()))?;

        rows.iter().map(|(data,)| decode(data)).collect()
    }

    async fn find_by_incident(&self, incident_id: &IncidentId) -> Result<Vec<Alert>, PortError> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT data FROM alerts WHERE incident_id = ? ORDER BY created_at, rowid",
        )
        .bind(incident_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| PortError::Persistence(e.to_string()))?;

        rows.iter().map(|(data,)| decode(data)).collect()
    }

    async fn count_firing_for_incident(&self, incident_id: &IncidentId) -> Result<u64, PortError> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM alerts WHERE incident_id = ? AND status = 'firing'",
        )
        .bind(incident_id.to_string())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| PortError::Persistence(e.to_string()))?;

        Ok(count as u64)
    }
}

impl SqliteDb {
    /// `alert` already carries its next revision; `read_at` is the one the
    /// stored row must still have.
    async fn write_alert(
        &self,
        alert: &Alert,
        expected: Status,
        read_at: u64,
    ) -> Result<bool, PortError> {
        let data = encode(alert)?;

        let result = sqlx::query(
            "UPDATE alerts SET status = ?, incident_id = ?, data = ?, revision = ?
             WHERE id = ? AND status = ? AND revision = ?",
        )
        .bind(alert.status().as_str())
        .bind(alert.incident_id().map(ToString::to_string))
        .bind(&data)
        .bind(alert.revision() as i64)
        .bind(alert.id().to_string())
        .bind(expected.as_str())
        .bind(read_at as i64)
        .execute(&self.pool)
        .await
        .map_err(|e| write_error(e, "firing alert for fingerprint"))?;

        Ok(result.rows_affected() == 1)
    }
}
