use async_trait::async_trait;

use klaxon_core::events::DomainEvent;
use klaxon_ports::error::PortError;
use klaxon_ports::outbound::EventPublisher;

use super::{encode, SqliteDb};

/// Append-only event log. A batch is written all-or-nothing.
#[async_trait]
impl EventPublisher for SqliteDb {
    async fn publish(&self, events: Vec<DomainEvent>) -> Result<(), PortError> {
        if events.is_empty() {
            return Ok(());
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| PortError::Persistence(e.to_string()))?;

        for event in &events {
            let data = encode(event)?;

            sqlx::query("INSERT INTO events (event_type, data, occurred_at) VALUES (?, ?, ?)")
                .bind(event.event_type())
                .bind(&data)
                .bind(event.occurred_at().to_rfc3339())
                .execute(&mut *tx)
                .await
                .map_err(|e| PortError::Persistence(e.to_string()))?;
        }

        tx.commit()
            .await
            .map_err(|e| PortError::Persistence(e.to_string()))?;
        Ok(())
    }
}
