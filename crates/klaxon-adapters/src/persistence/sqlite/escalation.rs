use async_trait::async_trait;

use klaxon_core::escalation::EscalationPolicy;
use klaxon_ports::error::PortError;
use klaxon_ports::outbound::EscalationRepository;

use super::{decode, encode, SqliteDb};

#[async_trait]
impl EscalationRepository for SqliteDb {
    async fn save(&self, policy: &EscalationPolicy) -> Result<(), PortError> {
        let id = policy.id().to_string();
        let data = encode(policy)?;

        sqlx::query(
            "INSERT INTO escalation_policies (id, data) VALUES (?, ?)
             ON CONFLICT(id) DO UPDATE SET data = excluded.data",
        )
        .bind(&id)
        .bind(&data)
        .execute(&self.pool)
        .await
        .map_err(|e| PortError::Persistence(e.to_string()))?;

        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<EscalationPolicy>, PortError> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT data FROM escalation_policies WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| PortError::Persistence(e.to_string()))?;

        row.map(|(data,)| decode(&data)).transpose()
    }
}
