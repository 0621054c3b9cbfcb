//! Delivery channels.
//!
//! Each channel turns an [`Alert`] into one HTTP request. Chat tools get the
//! webhook payload shape they expect; Telegram goes through the Bot API and
//! email through a transactional mail API.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};

use super::Alert;
use super::error::ChannelError;
use crate::config::{EmailApiConfig, TelegramConfig};
use crate::database::models::{ChannelCredentials, ChannelKind};

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(5);
const EMAIL_TIMEOUT: Duration = Duration::from_secs(7);
const ERROR_BODY_LIMIT: usize = 200;

#[async_trait]
pub trait AlertChannel: Send + Sync {
    fn kind(&self) -> ChannelKind;

    async fn send(&self, alert: &Alert, credentials: &ChannelCredentials) -> Result<(), ChannelError>;
}

async fn post_json(
    client: &reqwest::Client,
    url: &str,
    payload: &Value,
    timeout: Duration,
    bearer: Option<&str>,
) -> Result<(), ChannelError> {
    let mut request = client.post(url).timeout(timeout).json(payload);
    if let Some(token) = bearer {
        request = request.bearer_auth(token);
    }

    let response = request.send().await?;
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }

    let mut body = response.text().await.unwrap_or_default();
    if body.len() > ERROR_BODY_LIMIT {
        let cut = (0..=ERROR_BODY_LIMIT).rev().find(|i| body.is_char_boundary(*i)).unwrap_or(0);
        body.truncate(cut);
    }
    Err(ChannelError::Status { status: status.as_u16(), body })
}

fn required(value: &Option<String>) -> Result<&str, ChannelError> {
    value.as_deref().filter(|v| !v.is_empty()).ok_or(ChannelError::MissingCredentials)
}

pub struct TelegramChannel {
    client: reqwest::Client,
    config: TelegramConfig,
}

impl TelegramChannel {
    pub fn new(client: reqwest::Client, config: TelegramConfig) -> Self {
        Self { client, config }
    }
}

#[async_trait]
impl AlertChannel for TelegramChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Telegram
    }

    async fn send(&self, alert: &Alert, credentials: &ChannelCredentials) -> Result<(), ChannelError> {
        let token = required(&self.config.bot_token)?;
        let chat_id = required(&credentials.telegram_chat_id)?;

        let url = format!("{}/bot{}/sendMessage", self.config.api_base.trim_end_matches('/'), token);
        let payload = json!({
            "chat_id": chat_id,
            "text": format!("{}\n\n{}", alert.title(), alert.message),
            "disable_web_page_preview": true
        });
        post_json(&self.client, &url, &payload, WEBHOOK_TIMEOUT, None).await
    }
}

pub struct EmailChannel {
    client: reqwest::Client,
    config: EmailApiConfig,
}

impl EmailChannel {
    pub fn new(client: reqwest::Client, config: EmailApiConfig) -> Self {
        Self { client, config }
    }
}

#[async_trait]
impl AlertChannel for EmailChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Email
    }

    async fn send(&self, alert: &Alert, credentials: &ChannelCredentials) -> Result<(), ChannelError> {
        let api_url = required(&self.config.api_url)?;
        let from = required(&self.config.from)?;
        let to = required(&credentials.email)?;

        let payload = json!({
            "from": from,
            "to": [to],
            "subject": alert.title(),
            "text": alert.message
        });
        post_json(&self.client, api_url, &payload, EMAIL_TIMEOUT, self.config.api_key.as_deref()).await
    }
}

pub struct SlackChannel {
    client: reqwest::Client,
}

impl SlackChannel {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl AlertChannel for SlackChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Slack
    }

    async fn send(&self, alert: &Alert, credentials: &ChannelCredentials) -> Result<(), ChannelError> {
        let url = required(&credentials.slack_webhook_url)?;
        let payload = json!({
            "blocks": [
                {
                    "type": "section",
                    "text": {
                        "type": "mrkdwn",
                        "text": format!("*{}*\n\n{}", alert.title(), alert.message)
                    }
                }
            ]
        });
        post_json(&self.client, url, &payload, WEBHOOK_TIMEOUT, None).await
    }
}

pub struct DiscordChannel {
    client: reqwest::Client,
}

impl DiscordChannel {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl AlertChannel for DiscordChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Discord
    }

    async fn send(&self, alert: &Alert, credentials: &ChannelCredentials) -> Result<(), ChannelError> {
        let url = required(&credentials.discord_webhook_url)?;
        let payload = json!({ "content": format!("**{}**\n\n{}", alert.title(), alert.message) });
        post_json(&self.client, url, &payload, WEBHOOK_TIMEOUT, None).await
    }
}

pub struct TeamsChannel {
    client: reqwest::Client,
}

impl TeamsChannel {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl AlertChannel for TeamsChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Teams
    }

    async fn send(&self, alert: &Alert, credentials: &ChannelCredentials) -> Result<(), ChannelError> {
        let url = required(&credentials.teams_webhook_url)?;
        let payload = json!({
            "@type": "MessageCard",
            "@context": "https://schema.org/extensions",
            "summary": alert.title(),
            "title": alert.title(),
            "text": alert.message
        });
        post_json(&self.client, url, &payload, WEBHOOK_TIMEOUT, None).await
    }
}
