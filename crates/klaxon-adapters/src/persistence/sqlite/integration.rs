use async_trait::async_trait;

use klaxon_ports::error::PortError;
use klaxon_ports::outbound::{IntegrationRepository, ServiceRepository};
use klaxon_ports::types::{Integration, Service};

use super::{decode, encode, write_error, SqliteDb};

#[async_trait]
impl IntegrationRepository for SqliteDb {
    async fn save(&self, integration: &Integration) -> Result<(), PortError> {
        let data = encode(integration)?;

        sqlx::query(
            "INSERT INTO integrations (id, key, data) VALUES (?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET key = excluded.key, data = excluded.data",
        )
        .bind(integration.id.to_string())
        .bind(&integration.key)
        .bind(&data)
        .execute(&self.pool)
        .await
        .map_err(|e| write_error(e, "integration key"))?;

        Ok(())
    }

    async fn find_by_key(&self, key: &str) -> Result<Option<Integration>, PortError> {
        let row: Option<(String,)> = sqlx::query_as("SELECT data FROM integrations WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| PortError::Persistence(e.to_string()))?;

        row.map(|(data,)| decode(&data)).transpose()
    }
}

#[async_trait]
impl ServiceRepository for SqliteDb {
    async fn save(&self, service: &Service) -> Result<(), PortError> {
        let data = encode(service)?;

        sqlx::query(
            "INSERT INTO services (id, data) VALUES (?, ?)
             ON CONFLICT(id) DO UPDATE SET data = excluded.data",
        )
        .bind(service.id.to_string())
        .bind(&data)
        .execute(&self.pool)
        .await
        .map_err(|e| PortError::Persistence(e.to_string()))?;

        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Service>, PortError> {
        let row: Option<(String,)> = sqlx::query_as("SELECT data FROM services WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| PortError::Persistence(e.to_string()))?;

        row.map(|(data,)| decode(&data)).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use klaxon_core::ids::{IntegrationId, PolicyId, ServiceId, TeamId};

    async fn db() -> SqliteDb {
        SqliteDb::new("sqlite::memory:").await.unwrap()
    }

    fn integration(key: &str) -> Integration {
        Integration {
            id: IntegrationId::new(),
            key: key.into(),
            name: "prometheus".into(),
            service_id: ServiceId::new(),
            team_id: TeamId::new(),
            active: true,
        }
    }

    #[tokio::test]
    async fn integration_found_by_key() {
        let db = db().await;
        let integration = integration("prom-key");
        IntegrationRepository::save(&db, &integration).await.unwrap();

        let found = db.find_by_key("prom-key").await.unwrap().unwrap();
        assert_eq!(found, integration);
        assert!(db.find_by_key("other").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn deactivating_integration_updates_in_place() {
        let db = db().await;
        let mut integration = integration("prom-key");
        IntegrationRepository::save(&db, &integration).await.unwrap();

        integration.active = false;
        IntegrationRepository::save(&db, &integration).await.unwrap();

        let found = db.find_by_key("prom-key").await.unwrap().unwrap();
        assert!(!found.active);
    }

    #[tokio::test]
    async fn key_is_unique_across_integrations() {
        let db = db().await;
        IntegrationRepository::save(&db, &integration("prom-key"))
            .await
            .unwrap();
        let err = IntegrationRepository::save(&db, &integration("prom-key"))
            .await
            .unwrap_err();
        assert!(matches!(err, PortError::Conflict(_)));
    }

    #[tokio::test]
    async fn service_round_trip() {
        let db = db().await;
        let service = Service {
            id: ServiceId::new(),
            team_id: TeamId::new(),
            name: "checkout".into(),
            escalation_policy_id: Some(PolicyId::new()),
        };
        ServiceRepository::save(&db, &service).await.unwrap();

        let found = ServiceRepository::find_by_id(&db, &service.id.to_string())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found, service);
    }
}
