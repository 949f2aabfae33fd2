use serde::{Deserialize, Serialize};

use crate::alert::Severity;
use crate::error::DomainError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Email,
    Sms,
    Phone,
    Push,
    Slack,
    Webhook,
}

impl Channel {
    /// Delivery attempts before a notification job is marked failed.
    /// Store-and-forward channels tolerate more retries than live calls.
    pub fn max_attempts(&self) -> u32 {
        match self {
            Self::Email | Self::Webhook => 5,
            Self::Slack => 4,
            Self::Push | Self::Sms => 3,
            Self::Phone => 2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Sms => "sms",
            Self::Phone => "phone",
            Self::Push => "push",
            Self::Slack => "slack",
            Self::Webhook => "webhook",
        }
    }

    pub fn parse(s: &str) -> Result<Self, DomainError> {
        match s {
            "email" => Ok(Self::Email),
            "sms" => Ok(Self::Sms),
            "phone" => Ok(Self::Phone),
            "push" => Ok(Self::Push),
            "slack" => Ok(Self::Slack),
            "webhook" => Ok(Self::Webhook),
            other => Err(DomainError::UnknownVariant {
                kind: "channel",
                value: other.to_string(),
            }),
        }
    }
}

/// Urgency of a notification; lower queue numbers are served first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationPriority {
    Critical,
    High,
    Medium,
    Low,
}

impl NotificationPriority {
    pub fn queue_priority(&self) -> u8 {
        match self {
            Self::Critical => 1,
            Self::High => 2,
            Self::Medium => 3,
            Self::Low => 4,
        }
    }
}

impl From<Severity> for NotificationPriority {
    fn from(severity: Severity) -> Self {
        match severity {
            Severity::Critical => Self::Critical,
            Severity::High => Self::High,
            Severity::Medium => Self::Medium,
            Severity::Low | Severity::Info => Self::Low,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durable_channels_retry_more() {
        assert!(Channel::Email.max_attempts() > Channel::Sms.max_attempts());
        assert!(Channel::Sms.max_attempts() > Channel::Phone.max_attempts());
    }

    #[test]
    fn critical_is_served_first() {
        assert!(
            NotificationPriority::Critical.queue_priority()
                < NotificationPriority::Low.queue_priority()
        );
    }

    #[test]
    fn info_severity_maps_to_low_priority() {
        assert_eq!(
            NotificationPriority::from(Severity::Info),
            NotificationPriority::Low
        );
    }

    #[test]
    fn channel_round_trips_through_str() {
        for ch in [
            Channel::Email,
            Channel::Sms,
            Channel::Phone,
            Channel::Push,
            Channel::Slack,
            Channel::Webhook,
        ] {
            assert_eq!(Channel::parse(ch.as_str()), Ok(ch));
        }
    }
}
