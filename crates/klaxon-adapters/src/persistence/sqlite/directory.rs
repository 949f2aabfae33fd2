use async_trait::async_trait;

use klaxon_core::channel::Channel;
use klaxon_core::ids::{TeamId, UserId};
use klaxon_ports::error::PortError;
use klaxon_ports::outbound::TeamDirectory;

use super::{decode, encode, SqliteDb};

#[async_trait]
impl TeamDirectory for SqliteDb {
    async fn add_member(
        &self,
        team_id: &TeamId,
        user_id: &UserId,
        active: bool,
    ) -> Result<(), PortError> {
        sqlx::query(
            "INSERT INTO team_members (team_id, user_id, active) VALUES (?, ?, ?)
             ON CONFLICT(team_id, user_id) DO UPDATE SET active = excluded.active",
        )
        .bind(team_id.to_string())
        .bind(user_id.to_string())
        .bind(active)
        .execute(&self.pool)
        .await
        .map_err(|e| PortError::Persistence(e.to_string()))?;

        Ok(())
    }

    /// Members in the order they joined.
    async fn active_members(&self, team_id: &TeamId) -> Result<Vec<UserId>, PortError> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT user_id FROM team_members
             WHERE team_id = ? AND active = 1
             ORDER BY rowid",
        )
        .bind(team_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| PortError::Persistence(e.to_string()))?;

        rows.iter()
            .map(|(id,)| UserId::parse(id).map_err(|e| PortError::Persistence(e.to_string())))
            .collect()
    }

    async fn set_channels(&self, user_id: &UserId, channels: &[Channel]) -> Result<(), PortError> {
        let data = encode(&channels)?;

        sqlx::query(
            "INSERT INTO user_channels (user_id, channels) VALUES (?, ?)
             ON CONFLICT(user_id) DO UPDATE SET channels = excluded.channels",
        )
        .bind(user_id.to_string())
        .bind(&data)
        .execute(&self.pool)
        .await
        .map_err(|e| PortError::Persistence(e.to_string()))?;

        Ok(())
    }

    async fn channels_for(&self, user_id: &UserId) -> Result<Vec<Channel>, PortError> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT channels FROM user_channels WHERE user_id = ?")
                .bind(user_id.to_string())
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| PortError::Persistence(e.to_string()))?;

        match row {
            Some((data,)) => decode(&data),
            None => Ok(Vec::new()),
        }
    }
}
