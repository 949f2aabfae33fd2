use std::sync::Arc;

use axum::Router;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use klaxon_adapters::events::{BroadcastPublisher, FanoutPublisher};
use klaxon_adapters::notify::{LogNotifier, ALL_CHANNELS};
use klaxon_adapters::persistence::sqlite::SqliteDb;
use klaxon_adapters::sources::SourceRegistry;
use klaxon_app::alert_service::AlertService;
use klaxon_app::escalation_service::EscalationService;
use klaxon_app::incident_service::IncidentService;
use klaxon_app::notification_dispatcher::NotificationDispatcher;
use klaxon_app::oncall_service::OnCallService;
use klaxon_app::router::RoutingEngine;
use klaxon_ports::error::PortError;
use klaxon_ports::outbound::{EventPublisher, Notifier};

use crate::config::Config;
use crate::routes::create_router;
use crate::state::AppState;
use crate::workers::{DeliveryHandler, EscalationHandler, Worker};

/// Everything the binary runs, wired against one SQLite database.
pub struct Klaxon {
    config: Config,
    db: SqliteDb,
    state: AppState,
    escalations: EscalationService,
    broadcast: BroadcastPublisher,
}

impl Klaxon {
    pub async fn build(config: Config) -> Result<Self, PortError> {
        let db = SqliteDb::new(&config.database_url).await?;
        let store = Arc::new(db.clone());

        let broadcast = BroadcastPublisher::new(config.event_buffer);
        let sinks: Vec<Arc<dyn EventPublisher>> = vec![
            store.clone() as Arc<dyn EventPublisher>,
            Arc::new(broadcast.clone()),
        ];
        let events: Arc<dyn EventPublisher> = Arc::new(FanoutPublisher::new(sinks));

        let oncall = OnCallService::new(store.clone());
        let dispatcher = NotificationDispatcher::new(store.clone(), config.notification_backoff());
        let escalations = EscalationService::new(
            store.clone(),
            store.clone(),
            store.clone(),
            store.clone(),
            store.clone(),
            oncall.clone(),
            dispatcher,
            events.clone(),
            config.escalation_backoff(),
        );
        let incidents = IncidentService::new(
            store.clone(),
            store.clone(),
            events.clone(),
            escalations.clone(),
        );
        let alerts = AlertService::new(
            store.clone(),
            store.clone(),
            Arc::new(SourceRegistry::new()),
            RoutingEngine::new(store.clone()),
            incidents.clone(),
            escalations.clone(),
            events,
        );

        let alerts = Arc::new(alerts);
        let state = AppState {
            receiver: alerts.clone(),
            alerts,
            incidents: Arc::new(incidents),
            oncall: Arc::new(oncall),
        };
        info!(database_url = %config.database_url, "klaxon assembled");

        Ok(Self {
            config,
            db,
            state,
            escalations,
            broadcast,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn db(&self) -> &SqliteDb {
        &self.db
    }

    pub fn router(&self) -> Router {
        create_router(self.state.clone())
    }

    pub fn escalation_worker(&self) -> Worker {
        Worker::new(
            Arc::new(self.db.clone()),
            Arc::new(EscalationHandler::new(self.escalations.clone())),
            self.config.escalation_concurrency,
            self.config.poll_interval(),
            self.config.job_lease(),
        )
    }

    pub fn delivery_worker(&self) -> Worker {
        let notifiers = ALL_CHANNELS
            .into_iter()
            .map(|channel| Arc::new(LogNotifier::new(channel)) as Arc<dyn Notifier>);
        Worker::new(
            Arc::new(self.db.clone()),
            Arc::new(DeliveryHandler::new(notifiers)),
            self.config.notification_concurrency,
            self.config.poll_interval(),
            self.config.job_lease(),
        )
    }

    /// Logs every published domain event until the channel closes.
    pub fn spawn_event_log(&self) -> tokio::task::JoinHandle<()> {
        let mut rx = self.broadcast.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => debug!(
                        event_type = event.event_type(),
                        occurred_at = %event.occurred_at(),
                        "domain event"
                    ),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "event log fell behind");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use chrono::Utc;
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use klaxon_core::channel::Channel;
    use klaxon_core::escalation::{escalation_key, EscalationLevel, EscalationPolicy, EscalationTarget};
    use klaxon_core::ids::{IncidentId, IntegrationId, ServiceId, TeamId, UserId};
    use klaxon_core::incident::IncidentStatus;
    use klaxon_ports::outbound::{
        EscalationRepository, IncidentRepository, IntegrationRepository, JobQueue,
        ServiceRepository, TeamDirectory,
    };
    use klaxon_ports::types::{Integration, JobState, Service};

    struct Fixture {
        klaxon: Klaxon,
        responder: UserId,
    }

    async fn fixture() -> Fixture {
        let config = Config {
            database_url: "sqlite::memory:".to_string(),
            ..Config::default()
        };
        let klaxon = Klaxon::build(config).await.unwrap();
        let db = klaxon.db();

        let team_id = TeamId::new();
        let responder = UserId::new();
        let backup = UserId::new();
        TeamDirectory::add_member(db, &team_id, &backup, true).await.unwrap();
        TeamDirectory::set_channels(db, &responder, &[Channel::Slack, Channel::Sms])
            .await
            .unwrap();

        let policy = EscalationPolicy::new(
            "primary".into(),
            vec![
                EscalationLevel::new(1, 0, vec![EscalationTarget::User(responder.clone())]),
                EscalationLevel::new(2, 10, vec![EscalationTarget::Team(team_id.clone())]),
            ],
            0,
            30,
        )
        .unwrap();
        EscalationRepository::save(db, &policy).await.unwrap();

        let service = Service {
            id: ServiceId::new(),
            team_id: team_id.clone(),
            name: "checkout".into(),
            escalation_policy_id: Some(policy.id().clone()),
        };
        ServiceRepository::save(db, &service).await.unwrap();
        IntegrationRepository::save(
            db,
            &Integration {
                id: IntegrationId::new(),
                key: "prom-key".into(),
                name: "Prometheus".into(),
                service_id: service.id.clone(),
                team_id,
                active: true,
            },
        )
        .await
        .unwrap();

        Fixture { klaxon, responder }
    }

    fn high_cpu() -> Value {
        json!({
            "version": "4",
            "status": "firing",
            "receiver": "klaxon",
            "alerts": [{
                "status": "firing",
                "labels": {"alertname": "HighCPU", "severity": "critical", "instance": "web-01"},
                "annotations": {"summary": "CPU high"},
                "startsAt": "2025-01-15T09:58:00Z"
            }]
        })
    }

    async fn call(router: Router, method: &str, uri: &str, body: Value) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(if body.is_null() {
                Body::empty()
            } else {
                Body::from(body.to_string())
            })
            .unwrap();
        let response = router.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    /// Posts the payload and returns the incident its first alert joined.
    async fn ingest(klaxon: &Klaxon, payload: Value) -> (Value, IncidentId) {
        let (status, report) =
            call(klaxon.router(), "POST", "/webhooks/prom-key", payload).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        let alert_id = report["alertIds"][0].as_str().unwrap().to_string();
        let (_, alert) = call(klaxon.router(), "GET", &format!("/alerts/{alert_id}"), Value::Null).await;
        let incident_id = IncidentId::parse(alert["incident_id"].as_str().unwrap()).unwrap();
        (report, incident_id)
    }

    async fn events_of(klaxon: &Klaxon, event_type: &str) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM events WHERE event_type = ?")
            .bind(event_type)
            .fetch_one(klaxon.db().pool())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn prometheus_alert_opens_incident_and_escalates() {
        let Fixture { klaxon, responder } = fixture().await;
        let (report, incident_id) = ingest(&klaxon, high_cpu()).await;
        assert_eq!(report["status"], "accepted");
        assert_eq!(report["alertsProcessed"], 1);

        let db = klaxon.db();
        let incident = IncidentRepository::find_by_id(db, &incident_id.to_string())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(incident.status(), IncidentStatus::Triggered);
        assert_eq!(incident.title(), "CPU high");
        assert_eq!(events_of(&klaxon, "incident.created").await, 1);
        assert_eq!(
            db.state(&escalation_key(&incident_id, 1)).await.unwrap(),
            Some(JobState::Scheduled)
        );

        // Level 1 is due immediately and queues one delivery per channel.
        assert_eq!(klaxon.escalation_worker().tick(Utc::now()).await.unwrap(), 1);
        assert_eq!(
            db.state(&escalation_key(&incident_id, 1)).await.unwrap(),
            Some(JobState::Completed)
        );
        assert_eq!(
            db.state(&escalation_key(&incident_id, 2)).await.unwrap(),
            Some(JobState::Scheduled)
        );
        assert_eq!(events_of(&klaxon, "escalation.fired").await, 1);

        assert_eq!(klaxon.delivery_worker().tick(Utc::now()).await.unwrap(), 2);
        let slack_key = format!("notify:{incident_id}:{responder}:slack:1.0");
        assert_eq!(db.state(&slack_key).await.unwrap(), Some(JobState::Completed));
    }

    #[tokio::test]
    async fn duplicate_post_refreshes_the_same_alert() {
        let Fixture { klaxon, .. } = fixture().await;
        let (first, incident_id) = ingest(&klaxon, high_cpu()).await;
        let (second, again) = ingest(&klaxon, high_cpu()).await;

        assert_eq!(second["alertsProcessed"], 1);
        assert_eq!(first["alertIds"], second["alertIds"]);
        assert_eq!(incident_id, again);
        assert_eq!(events_of(&klaxon, "incident.created").await, 1);
        assert_eq!(events_of(&klaxon, "alert.deduplicated").await, 1);
    }

    #[tokio::test]
    async fn acknowledging_stops_escalation_and_is_idempotent() {
        let Fixture { klaxon, responder } = fixture().await;
        let (_, incident_id) = ingest(&klaxon, high_cpu()).await;
        let uri = format!("/incidents/{incident_id}/acknowledge");
        let body = json!({ "userId": responder.to_string() });

        let (status, first) = call(klaxon.router(), "POST", &uri, body.clone()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(first["status"], "acknowledged");
        assert_eq!(
            klaxon
                .db()
                .state(&escalation_key(&incident_id, 1))
                .await
                .unwrap(),
            Some(JobState::Canceled)
        );
        assert_eq!(klaxon.escalation_worker().tick(Utc::now()).await.unwrap(), 0);

        let (status, second) = call(klaxon.router(), "POST", &uri, body).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(first, second);
        assert_eq!(events_of(&klaxon, "incident.acknowledged").await, 1);
    }

    #[tokio::test]
    async fn resolving_the_last_alert_auto_resolves_the_incident() {
        let Fixture { klaxon, .. } = fixture().await;
        let (_, incident_id) = ingest(&klaxon, high_cpu()).await;

        let mut resolved = high_cpu();
        resolved["alerts"][0]["status"] = json!("resolved");
        let (status, _) = call(klaxon.router(), "POST", "/webhooks/prom-key", resolved).await;
        assert_eq!(status, StatusCode::ACCEPTED);

        let (status, view) = call(
            klaxon.router(),
            "GET",
            &format!("/incidents/{incident_id}"),
            Value::Null,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(view["incident"]["status"], "resolved");
        assert_eq!(view["alerts"][0]["status"], "resolved");
        assert_eq!(events_of(&klaxon, "incident.auto_resolved").await, 1);
    }

    #[tokio::test]
    async fn unknown_key_and_bad_body_are_rejected() {
        let Fixture { klaxon, .. } = fixture().await;
        let (status, _) = call(klaxon.router(), "POST", "/webhooks/nope", high_cpu()).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let request = Request::builder()
            .method("POST")
            .uri("/webhooks/prom-key")
            .body(Body::from("<xml/>"))
            .unwrap();
        let response = klaxon.router().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(events_of(&klaxon, "alert.created").await, 0);
    }
}
