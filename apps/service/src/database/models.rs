use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Number of samples kept in a domain's rolling history.
pub const HISTORY_LIMIT: usize = 24;

/// Convert a timestamp to unix seconds for storage.
pub fn timestamp_to_i64(time: DateTime<Utc>) -> i64 {
    time.timestamp()
}

/// Convert stored unix seconds back into a timestamp.
pub fn i64_to_timestamp(timestamp: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(timestamp, 0).unwrap_or_default()
}

pub(crate) fn optional_timestamp(value: Option<i64>) -> Option<DateTime<Utc>> {
    value.map(i64_to_timestamp)
}

/// Stored availability state of a domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DomainStatus {
    Pending,
    Ok,
    Down,
    Error,
}

impl DomainStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DomainStatus::Pending => "pending",
            DomainStatus::Ok => "ok",
            DomainStatus::Down => "down",
            DomainStatus::Error => "error",
        }
    }
}

impl fmt::Display for DomainStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DomainStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(DomainStatus::Pending),
            "ok" => Ok(DomainStatus::Ok),
            "down" => Ok(DomainStatus::Down),
            "error" => Ok(DomainStatus::Error),
            other => Err(format!("unknown domain status '{other}'")),
        }
    }
}

/// Tri-state certificate verdict. Serialized as `true`, `false` or `null`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "Option<bool>", into = "Option<bool>")]
pub enum SslState {
    Valid,
    Invalid,
    #[default]
    Unknown,
}

impl From<Option<bool>> for SslState {
    fn from(value: Option<bool>) -> Self {
        match value {
            Some(true) => SslState::Valid,
            Some(false) => SslState::Invalid,
            None => SslState::Unknown,
        }
    }
}

impl From<SslState> for Option<bool> {
    fn from(value: SslState) -> Self {
        match value {
            SslState::Valid => Some(true),
            SslState::Invalid => Some(false),
            SslState::Unknown => None,
        }
    }
}

impl SslState {
    pub(crate) fn to_column(self) -> Option<i64> {
        Option::<bool>::from(self).map(i64::from)
    }

    pub(crate) fn from_column(value: Option<i64>) -> Self {
        value.map(|v| v != 0).into()
    }
}

/// A monitored domain and its current check state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Domain {
    pub id: i64,
    pub account_id: i64,
    pub name: String,
    pub campaign: Option<String>,
    pub status: DomainStatus,
    pub status_since: DateTime<Utc>,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub last_up_at: Option<DateTime<Utc>>,
    pub last_down_at: Option<DateTime<Utc>>,
    pub down_notified_at: Option<DateTime<Utc>>,
    pub up_notified_at: Option<DateTime<Utc>>,
    pub ssl_valid: SslState,
    pub last_check_error: Option<String>,
    /// Oldest first; `1` is an up sample, `0` a down or error sample.
    pub history: Vec<u8>,
    /// Set when a sweep queued the domain, cleared by the next applied verdict.
    pub queued_at: Option<DateTime<Utc>>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
}

impl Domain {
    /// A freshly registered domain, not yet persisted.
    pub fn pending(account_id: i64, name: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: 0,
            account_id,
            name: name.into(),
            campaign: None,
            status: DomainStatus::Pending,
            status_since: now,
            last_checked_at: None,
            last_up_at: None,
            last_down_at: None,
            down_notified_at: None,
            up_notified_at: None,
            ssl_valid: SslState::Unknown,
            last_check_error: None,
            history: Vec::new(),
            queued_at: None,
            version: 0,
            created_at: now,
        }
    }

    /// Share of up samples in the rolling history, `None` before the first check.
    pub fn uptime_percentage(&self) -> Option<f64> {
        if self.history.is_empty() {
            return None;
        }
        let up = self.history.iter().filter(|sample| **sample == 1).count();
        Some(up as f64 * 100.0 / self.history.len() as f64)
    }
}

/// Row returned by the due-for-check listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DueDomain {
    pub id: i64,
    pub name: String,
    pub campaign: Option<String>,
    pub account_id: i64,
}

/// One continuous down period of a domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Incident {
    pub id: i64,
    pub domain_id: i64,
    pub status_before: DomainStatus,
    pub status_after: DomainStatus,
    pub message: Option<String>,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    Pending,
    Processing,
    Completed,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Pending => "pending",
            BatchStatus::Processing => "processing",
            BatchStatus::Completed => "completed",
        }
    }
}

impl FromStr for BatchStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(BatchStatus::Pending),
            "processing" => Ok(BatchStatus::Processing),
            "completed" => Ok(BatchStatus::Completed),
            other => Err(format!("unknown batch status '{other}'")),
        }
    }
}

/// One orchestration sweep over an account's domains.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckBatch {
    pub id: i64,
    pub account_id: i64,
    pub status: BatchStatus,
    pub total: i64,
    pub processed: i64,
    pub scheduled_for: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Tenant record, owned by the account system and read here for plan lookup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: i64,
    pub name: String,
    pub plan: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Telegram,
    Email,
    Slack,
    Discord,
    Teams,
}

impl ChannelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelKind::Telegram => "telegram",
            ChannelKind::Email => "email",
            ChannelKind::Slack => "slack",
            ChannelKind::Discord => "discord",
            ChannelKind::Teams => "teams",
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-account delivery targets for each channel.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelCredentials {
    #[serde(default)]
    pub telegram_chat_id: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub slack_webhook_url: Option<String>,
    #[serde(default)]
    pub discord_webhook_url: Option<String>,
    #[serde(default)]
    pub teams_webhook_url: Option<String>,
}

/// Alerting preferences of an account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationSettings {
    pub account_id: i64,
    pub notify_on_fail: bool,
    pub channels: Vec<ChannelKind>,
    pub credentials: ChannelCredentials,
    /// Chat id from before per-channel settings existed.
    pub legacy_telegram_chat_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Sent,
    Failed,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Sent => "sent",
            DeliveryStatus::Failed => "failed",
        }
    }
}

impl FromStr for DeliveryStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sent" => Ok(DeliveryStatus::Sent),
            "failed" => Ok(DeliveryStatus::Failed),
            other => Err(format!("unknown delivery status '{other}'")),
        }
    }
}

/// Notification log row to append.
#[derive(Debug, Clone, PartialEq)]
pub struct NewNotificationLog {
    pub account_id: i64,
    pub domain_id: Option<i64>,
    /// Channel name, or `none` when nothing was configured.
    pub channel: String,
    pub status: DeliveryStatus,
    pub message: String,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// One delivery attempt as stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationLog {
    pub id: i64,
    pub account_id: i64,
    pub domain_id: Option<i64>,
    pub channel: String,
    pub status: DeliveryStatus,
    pub message: String,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ssl_state_round_trips_through_option() {
        assert_eq!(SslState::from(Some(true)), SslState::Valid);
        assert_eq!(SslState::from(None), SslState::Unknown);
        assert_eq!(SslState::from_column(Some(0)), SslState::Invalid);
        assert_eq!(SslState::Unknown.to_column(), None);
        assert_eq!(serde_json::to_string(&SslState::Invalid).unwrap(), "false");
        assert_eq!(serde_json::from_str::<SslState>("null").unwrap(), SslState::Unknown);
    }

    #[test]
    fn uptime_percentage_uses_history() {
        let mut domain = Domain::pending(1, "example.com", Utc::now());
        assert_eq!(domain.uptime_percentage(), None);

        domain.history = vec![1, 1, 0, 1];
        assert_eq!(domain.uptime_percentage(), Some(75.0));
    }

    #[test]
    fn status_parsing_rejects_unknown_values() {
        assert_eq!("down".parse::<DomainStatus>(), Ok(DomainStatus::Down));
        assert!("degraded".parse::<DomainStatus>().is_err());
    }
}
