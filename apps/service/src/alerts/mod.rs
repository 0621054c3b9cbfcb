//! # Alert Dispatcher
//!
//! Fans one alert out to every channel an account enabled and records one
//! notification log row per attempt. Channels are looked up by
//! [`ChannelKind`]; a failing channel never stops the others.
//!
//! When an account enabled no channels the legacy Telegram chat id on its
//! settings is used. With neither, a single failed row with channel `none`
//! records that nothing was configured.

pub mod channels;
pub mod error;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use serde::Serialize;
use serde_json::json;

pub use channels::AlertChannel;
pub use error::ChannelError;

use crate::config::AlertsConfig;
use crate::database::models::{
    ChannelCredentials, ChannelKind, DeliveryStatus, NewNotificationLog, NotificationSettings,
};
use crate::database::{Database, NotificationLogRepository};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertKind {
    Down,
    Up,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Alert {
    pub account_id: i64,
    pub domain_id: Option<i64>,
    pub domain: String,
    pub kind: AlertKind,
    pub message: String,
}

impl Alert {
    pub fn title(&self) -> String {
        match self.kind {
            AlertKind::Down => format!("{} is down", self.domain),
            AlertKind::Up => format!("{} recovered", self.domain),
        }
    }
}

/// Outcome of one channel attempt
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub channel: String,
    pub status: DeliveryStatus,
    pub error: Option<String>,
}

pub struct AlertDispatcher {
    db: Arc<dyn Database>,
    channels: HashMap<ChannelKind, Arc<dyn AlertChannel>>,
}

impl AlertDispatcher {
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self { db, channels: HashMap::new() }
    }

    /// Dispatcher with the five built-in HTTP channels.
    pub fn with_default_channels(db: Arc<dyn Database>, client: reqwest::Client, config: &AlertsConfig) -> Self {
        Self::new(db)
            .with_channel(Arc::new(channels::TelegramChannel::new(client.clone(), config.telegram.clone())))
            .with_channel(Arc::new(channels::EmailChannel::new(client.clone(), config.email.clone())))
            .with_channel(Arc::new(channels::SlackChannel::new(client.clone())))
            .with_channel(Arc::new(channels::DiscordChannel::new(client.clone())))
            .with_channel(Arc::new(channels::TeamsChannel::new(client)))
    }

    pub fn with_channel(mut self, channel: Arc<dyn AlertChannel>) -> Self {
        self.channels.insert(channel.kind(), channel);
        self
    }

    /// Send to every target and log each attempt. A log row that cannot be
    /// written is reported through tracing and does not stop the others.
    pub async fn dispatch(&self, alert: &Alert, settings: &NotificationSettings) -> Vec<Delivery> {
        let (targets, credentials) = match delivery_targets(settings) {
            Some(targets) => targets,
            None => {
                tracing::warn!(account_id = alert.account_id, "no alert channel configured");
                let delivery = Delivery {
                    channel: "none".to_string(),
                    status: DeliveryStatus::Failed,
                    error: Some(ChannelError::NotConfigured.to_string()),
                };
                self.record(alert, &delivery).await;
                return vec![delivery];
            }
        };

        let attempts = targets.iter().map(|kind| {
            let credentials = &credentials;
            async move {
                let outcome = match self.channels.get(kind) {
                    Some(channel) => channel.send(alert, credentials).await,
                    None => Err(ChannelError::NotConfigured),
                };
                (*kind, outcome)
            }
        });

        let mut deliveries = Vec::with_capacity(targets.len());
        for (kind, outcome) in join_all(attempts).await {
            let delivery = match outcome {
                Ok(()) => {
                    tracing::info!(channel = %kind, domain = %alert.domain, "alert sent");
                    Delivery { channel: kind.to_string(), status: DeliveryStatus::Sent, error: None }
                }
                Err(e) => {
                    tracing::warn!(channel = %kind, domain = %alert.domain, error = %e, "alert delivery failed");
                    Delivery {
                        channel: kind.to_string(),
                        status: DeliveryStatus::Failed,
                        error: Some(e.to_string()),
                    }
                }
            };
            self.record(alert, &delivery).await;
            deliveries.push(delivery);
        }

        deliveries
    }

    async fn record(&self, alert: &Alert, delivery: &Delivery) {
        let entry = NewNotificationLog {
            account_id: alert.account_id,
            domain_id: alert.domain_id,
            channel: delivery.channel.clone(),
            status: delivery.status,
            message: alert.message.clone(),
            metadata: json!({
                "domain": alert.domain,
                "kind": alert.kind,
                "error": delivery.error,
            }),
            created_at: Utc::now(),
        };
        if let Err(e) = self.db.append_notification_log(&entry).await {
            tracing::error!(
                account_id = alert.account_id,
                channel = %delivery.channel,
                status = ?delivery.status,
                error = %e,
                "failed to record notification log"
            );
        }
    }
}

fn delivery_targets(settings: &NotificationSettings) -> Option<(Vec<ChannelKind>, ChannelCredentials)> {
    if !settings.channels.is_empty() {
        let mut kinds = Vec::with_capacity(settings.channels.len());
        for kind in &settings.channels {
            if !kinds.contains(kind) {
                kinds.push(*kind);
            }
        }
        return Some((kinds, settings.credentials.clone()));
    }

    settings.legacy_telegram_chat_id.as_ref().filter(|id| !id.is_empty()).map(|chat_id| {
        let credentials =
            ChannelCredentials { telegram_chat_id: Some(chat_id.clone()), ..Default::default() };
        (vec![ChannelKind::Telegram], credentials)
    })
}
