use async_trait::async_trait;

use klaxon_core::ids::TeamId;
use klaxon_core::routing::RoutingRule;
use klaxon_ports::error::PortError;
use klaxon_ports::outbound::RoutingRuleRepository;

use super::{decode, encode, SqliteDb};

#[async_trait]
impl RoutingRuleRepository for SqliteDb {
    async fn save(&self, rule: &RoutingRule) -> Result<(), PortError> {
        let data = encode(rule)?;

        sqlx::query(
            "INSERT INTO routing_rules (id, team_id, priority, enabled, data)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                team_id = excluded.team_id,
                priority = excluded.priority,
                enabled = excluded.enabled,
                data = excluded.data",
        )
        .bind(rule.id.to_string())
        .bind(rule.team_id.to_string())
        .bind(rule.priority)
        .bind(rule.enabled)
        .bind(&data)
        .execute(&self.pool)
        .await
        .map_err(|e| PortError::Persistence(e.to_string()))?;

        Ok(())
    }

    /// Ordered by priority ascending; ties keep insertion order.
    async fn enabled_for_team(&self, team_id: &TeamId) -> Result<Vec<RoutingRule>, PortError> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT data FROM routing_rules
             WHERE team_id = ? AND enabled = 1
             ORDER BY priority, rowid",
        )
        .bind(team_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| PortError::Persistence(e.to_string()))?;

        rows.iter().map(|(data,)| decode(data)).collect()
    }
}
