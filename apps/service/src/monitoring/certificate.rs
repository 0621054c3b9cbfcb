use std::time::Duration;

use chrono::{DateTime, Utc};
use native_tls::TlsConnector;
use tokio::net::TcpStream;
use x509_parser::prelude::{GeneralName, parse_x509_certificate};

pub const CERT_EXPIRED: &str = "Certificate expired";
pub const CERT_NOT_YET_VALID: &str = "Certificate not yet valid";
pub const CERT_HOSTNAME_MISMATCH: &str = "Certificate does not match hostname";

/// The parts of a leaf certificate that decide validity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateFacts {
    pub common_names: Vec<String>,
    pub dns_names: Vec<String>,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
}

impl CertificateFacts {
    /// `Ok(())` when the certificate is in its validity window and covers `host`,
    /// otherwise the reason it is not.
    pub fn evaluate(&self, host: &str, now: DateTime<Utc>) -> Result<(), String> {
        if now > self.not_after {
            return Err(CERT_EXPIRED.to_string());
        }
        if now < self.not_before {
            return Err(CERT_NOT_YET_VALID.to_string());
        }

        let covered = self
            .dns_names
            .iter()
            .chain(self.common_names.iter())
            .any(|pattern| hostname_matches(pattern, host));

        if covered { Ok(()) } else { Err(CERT_HOSTNAME_MISMATCH.to_string()) }
    }
}

/// Exact match, or a single leftmost-label wildcard (`*.example.com`).
pub fn hostname_matches(pattern: &str, host: &str) -> bool {
    let pattern = pattern.trim_end_matches('.').to_ascii_lowercase();
    let host = host.trim_end_matches('.').to_ascii_lowercase();

    if let Some(suffix) = pattern.strip_prefix("*.") {
        return match host.split_once('.') {
            Some((label, rest)) => !label.is_empty() && rest == suffix,
            None => false,
        };
    }

    pattern == host
}

pub fn parse_certificate(der: &[u8]) -> Result<CertificateFacts, String> {
    let (_, cert) =
        parse_x509_certificate(der).map_err(|e| format!("Certificate parse error: {e}"))?;

    let common_names = cert
        .subject()
        .iter_common_name()
        .filter_map(|cn| cn.as_str().ok())
        .map(str::to_string)
        .collect();

    let dns_names = match cert.subject_alternative_name() {
        Ok(Some(san)) => san
            .value
            .general_names
            .iter()
            .filter_map(|name| match name {
                GeneralName::DNSName(dns) => Some(dns.to_string()),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    };

    let validity = cert.validity();
    let not_before = DateTime::from_timestamp(validity.not_before.timestamp(), 0)
        .ok_or_else(|| "Certificate parse error: notBefore out of range".to_string())?;
    let not_after = DateTime::from_timestamp(validity.not_after.timestamp(), 0)
        .ok_or_else(|| "Certificate parse error: notAfter out of range".to_string())?;

    Ok(CertificateFacts { common_names, dns_names, not_before, not_after })
}

/// Fetches the peer certificate on port 443 and judges it.
///
/// The handshake itself accepts anything so a broken chain still yields a
/// certificate to inspect.
pub struct CertificateChecker {
    timeout: Duration,
    port: u16,
}

impl CertificateChecker {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout, port: 443 }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub async fn check(&self, host: &str) -> Result<(), String> {
        let der = self.fetch_der(host).await?;
        parse_certificate(&der)?.evaluate(host, Utc::now())
    }

    async fn fetch_der(&self, host: &str) -> Result<Vec<u8>, String> {
        let connector = TlsConnector::builder()
            .danger_accept_invalid_certs(true)
            .danger_accept_invalid_hostnames(true)
            .build()
            .map_err(|e| format!("TLS setup failed: {e}"))?;
        let connector = tokio_native_tls::TlsConnector::from(connector);

        let stream = tokio::time::timeout(self.timeout, TcpStream::connect((host, self.port)))
            .await
            .map_err(|_| format!("Connection to {host} timed out"))?
            .map_err(|e| format!("Connection to {host} failed: {e}"))?;

        let tls = tokio::time::timeout(self.timeout, connector.connect(host, stream))
            .await
            .map_err(|_| format!("TLS handshake with {host} timed out"))?
            .map_err(|e| format!("TLS handshake with {host} failed: {e}"))?;

        let cert = tls
            .get_ref()
            .peer_certificate()
            .map_err(|e| format!("Reading certificate failed: {e}"))?
            .ok_or_else(|| "No certificate presented".to_string())?;

        cert.to_der().map_err(|e| format!("Certificate encoding failed: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn facts(names: &[&str]) -> CertificateFacts {
        let now = Utc::now();
        CertificateFacts {
            common_names: vec![],
            dns_names: names.iter().map(|n| n.to_string()).collect(),
            not_before: now - ChronoDuration::days(30),
            not_after: now + ChronoDuration::days(60),
        }
    }

    #[test]
    fn test_wildcard_matches_single_label() {
        assert!(hostname_matches("*.example.com", "www.example.com"));
        assert!(hostname_matches("*.Example.com", "API.example.com"));
        assert!(!hostname_matches("*.example.com", "example.com"));
        assert!(!hostname_matches("*.example.com", "a.b.example.com"));
        assert!(hostname_matches("example.com", "example.com."));
        assert!(!hostname_matches("example.org", "example.com"));
    }

    #[test]
    fn test_valid_certificate() {
        assert_eq!(facts(&["example.com", "*.example.com"]).evaluate("www.example.com", Utc::now()), Ok(()));
    }

    #[test]
    fn test_common_name_is_considered() {
        let mut cert = facts(&[]);
        cert.common_names = vec!["example.com".to_string()];
        assert_eq!(cert.evaluate("example.com", Utc::now()), Ok(()));
    }

    #[test]
    fn test_expired_wins_over_hostname() {
        let mut cert = facts(&["other.org"]);
        cert.not_after = Utc::now() - ChronoDuration::days(1);
        assert_eq!(cert.evaluate("example.com", Utc::now()), Err(CERT_EXPIRED.to_string()));
    }

    #[test]
    fn test_not_yet_valid_and_mismatch() {
        let mut cert = facts(&["example.com"]);
        cert.not_before = Utc::now() + ChronoDuration::days(1);
        assert_eq!(cert.evaluate("example.com", Utc::now()), Err(CERT_NOT_YET_VALID.to_string()));

        let cert = facts(&["example.org"]);
        assert_eq!(cert.evaluate("example.com", Utc::now()), Err(CERT_HOSTNAME_MISMATCH.to_string()));
    }

    #[test]
    fn test_garbage_der_is_a_parse_error() {
        let err = parse_certificate(&[0x30, 0x03, 0x01, 0x02]).unwrap_err();
        assert!(err.starts_with("Certificate parse error"));
    }
}
