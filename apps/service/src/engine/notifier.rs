use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::instrument;

use super::applier::down_debounce;
use crate::alerts::{Alert, AlertDispatcher, AlertKind};
use crate::database::models::{Domain, NotificationSettings};
use crate::database::{AccountRepository, Database, DomainRepository, StoreError};

/// Why an evaluation did not send anything
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Skip {
    UnknownDomain,
    AlertsDisabled,
    /// Status moved on, the window has not elapsed, or another caller won the claim
    NotDue,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Evaluation {
    Alerted { message: String },
    Skipped(Skip),
}

/// Debounced down/up alerting.
///
/// The notified flags are claimed with a conditional update before anything
/// is sent, so concurrent evaluations of the same domain alert at most once.
pub struct Notifier {
    db: Arc<dyn Database>,
    dispatcher: Arc<AlertDispatcher>,
}

impl Notifier {
    pub fn new(db: Arc<dyn Database>, dispatcher: Arc<AlertDispatcher>) -> Self {
        Self { db, dispatcher }
    }

    #[instrument(skip(self))]
    pub async fn evaluate_down(&self, domain_id: i64, now: DateTime<Utc>) -> Result<Evaluation, StoreError> {
        let settings = match self.alert_settings(domain_id).await? {
            Ok(settings) => settings,
            Err(skip) => return Ok(Evaluation::Skipped(skip)),
        };

        let Some(domain) =
            self.db.claim_down_notification(domain_id, now, now - down_debounce()).await?
        else {
            return Ok(Evaluation::Skipped(Skip::NotDue));
        };

        let message = down_message(&domain, now);
        self.send(&domain, AlertKind::Down, &message, &settings).await;
        Ok(Evaluation::Alerted { message })
    }

    #[instrument(skip(self))]
    pub async fn evaluate_up(&self, domain_id: i64, now: DateTime<Utc>) -> Result<Evaluation, StoreError> {
        let settings = match self.alert_settings(domain_id).await? {
            Ok(settings) => settings,
            Err(skip) => return Ok(Evaluation::Skipped(skip)),
        };

        let Some(domain) = self.db.claim_up_notification(domain_id, now).await? else {
            return Ok(Evaluation::Skipped(Skip::NotDue));
        };

        let message = up_message(&domain);
        self.send(&domain, AlertKind::Up, &message, &settings).await;
        Ok(Evaluation::Alerted { message })
    }

    async fn alert_settings(
        &self,
        domain_id: i64,
    ) -> Result<Result<NotificationSettings, Skip>, StoreError> {
        let Some(domain) = self.db.get_domain(domain_id).await? else {
            return Ok(Err(Skip::UnknownDomain));
        };

        match self.db.notification_settings(domain.account_id).await? {
            Some(settings) if settings.notify_on_fail => Ok(Ok(settings)),
            _ => {
                tracing::debug!(domain_id, account_id = domain.account_id, "alerts disabled");
                Ok(Err(Skip::AlertsDisabled))
            }
        }
    }

    async fn send(
        &self,
        domain: &Domain,
        kind: AlertKind,
        message: &str,
        settings: &NotificationSettings,
    ) {
        let alert = Alert {
            account_id: domain.account_id,
            domain_id: Some(domain.id),
            domain: domain.name.clone(),
            kind,
            message: message.to_string(),
        };
        self.dispatcher.dispatch(&alert, settings).await;
    }
}

pub fn down_message(domain: &Domain, now: DateTime<Utc>) -> String {
    let minutes = (now - domain.status_since).num_minutes().max(0);
    let mut message = format!("{} is DOWN for {} minute(s)", domain.name, minutes);
    if let Some(error) = &domain.last_check_error {
        message.push_str(&format!("\nLast error: {error}"));
    }
    message
}

pub fn up_message(domain: &Domain) -> String {
    let mut message = match (domain.last_up_at, domain.last_down_at) {
        (Some(up), Some(down)) if up >= down => format!(
            "{} is back UP after {} minute(s) of downtime",
            domain.name,
            (up - down).num_minutes()
        ),
        _ => format!("{} is back UP", domain.name),
    };
    if let Some(uptime) = domain.uptime_percentage() {
        message.push_str(&format!(
            "\nUptime over the last {} checks: {:.1}%",
            domain.history.len(),
            uptime
        ));
    }
    message
}
