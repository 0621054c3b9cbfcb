use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::database::models::{DomainStatus, SslState};

/// Status reported by one check. Probes only produce `ok` and `down`; the
/// external fleet may also report `error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerdictStatus {
    Ok,
    Down,
    Error,
}

impl From<VerdictStatus> for DomainStatus {
    fn from(status: VerdictStatus) -> Self {
        match status {
            VerdictStatus::Ok => DomainStatus::Ok,
            VerdictStatus::Down => DomainStatus::Down,
            VerdictStatus::Error => DomainStatus::Error,
        }
    }
}

impl std::fmt::Display for VerdictStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        DomainStatus::from(*self).fmt(f)
    }
}

/// Outcome of one reachability + certificate check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub status: VerdictStatus,

    pub ssl_valid: SslState,

    /// Reachability error, or the certificate problem when the host answered
    pub error: Option<String>,

    /// When the check ran, if the reporter knows better than the receiver
    pub checked_at: Option<DateTime<Utc>>,
}

impl Verdict {
    pub fn ok() -> Self {
        Self { status: VerdictStatus::Ok, ssl_valid: SslState::Unknown, error: None, checked_at: None }
    }

    pub fn down(error: impl Into<String>) -> Self {
        Self {
            status: VerdictStatus::Down,
            ssl_valid: SslState::Unknown,
            error: Some(error.into()),
            checked_at: None,
        }
    }

    pub fn with_ssl(mut self, ssl_valid: SslState) -> Self {
        self.ssl_valid = ssl_valid;
        self
    }

    pub fn checked_at(mut self, at: DateTime<Utc>) -> Self {
        self.checked_at = Some(at);
        self
    }

    pub fn is_up(&self) -> bool {
        self.status == VerdictStatus::Ok
    }
}

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("Invalid domain name: {0}")]
    InvalidDomain(String),

    #[error("Private or local address not allowed: {0}")]
    PrivateAddress(String),

    #[error("HTTP client setup failed: {0}")]
    Client(#[from] reqwest::Error),
}
