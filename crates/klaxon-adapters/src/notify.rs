use std::collections::HashMap;

use async_trait::async_trait;
use tracing::info;
use uuid::Uuid;

use klaxon_core::channel::Channel;
use klaxon_ports::error::NotifyError;
use klaxon_ports::outbound::Notifier;
use klaxon_ports::types::{NotificationJob, NotifyResult};

pub const ALL_CHANNELS: [Channel; 6] = [
    Channel::Email,
    Channel::Sms,
    Channel::Phone,
    Channel::Push,
    Channel::Slack,
    Channel::Webhook,
];

/// Writes each delivery to the tracing log instead of a real provider.
pub struct LogNotifier {
    channel: Channel,
}

impl LogNotifier {
    pub fn new(channel: Channel) -> Self {
        Self { channel }
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notification: &NotificationJob) -> Result<NotifyResult, NotifyError> {
        if notification.channel != self.channel {
            return Err(NotifyError::ChannelUnavailable);
        }
        let external_id = Uuid::new_v4().to_string();
        info!(
            channel = self.channel.as_str(),
            incident_id = %notification.incident_id,
            incident_number = notification.incident_number,
            user_id = %notification.user_id,
            severity = %notification.severity,
            level = notification.level,
            repetition = notification.repetition,
            external_id = %external_id,
            "[#{}] {}",
            notification.incident_number,
            notification.title,
        );
        Ok(NotifyResult {
            external_id: Some(external_id),
            metadata: HashMap::from([("transport".to_string(), "log".to_string())]),
        })
    }

    fn channel(&self) -> Channel {
        self.channel
    }
}
