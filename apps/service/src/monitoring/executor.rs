use std::panic::AssertUnwindSafe;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use tracing::instrument;

use super::certificate::CertificateChecker;
use super::checker::{HttpChecker, Reachability};
use super::types::{ProbeError, Verdict, VerdictStatus};
use super::validation::normalize_domain_name;
use crate::database::models::SslState;

/// Runs the reachability and certificate checks for one domain and folds
/// them into a single verdict.
pub struct Prober {
    http: HttpChecker,
    certificates: CertificateChecker,
}

impl Prober {
    pub fn new(timeout: Duration) -> Result<Self, ProbeError> {
        Ok(Self { http: HttpChecker::new(timeout)?, certificates: CertificateChecker::new(timeout) })
    }

    /// Probe a domain. Never fails: anything unexpected becomes a `down` verdict.
    #[instrument(skip(self), fields(domain = %name))]
    pub async fn probe(&self, name: &str, check_certificate: bool) -> Verdict {
        match AssertUnwindSafe(self.probe_inner(name, check_certificate)).catch_unwind().await {
            Ok(verdict) => verdict,
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown failure".to_string());
                tracing::error!(error = %message, "probe aborted");
                Verdict::down(format!("Probe failed: {message}"))
            }
        }
    }

    async fn probe_inner(&self, name: &str, check_certificate: bool) -> Verdict {
        let host = match normalize_domain_name(name) {
            Ok(host) => host,
            Err(e) => return Verdict::down(e.to_string()),
        };

        let certificate = async {
            if check_certificate { Some(self.certificates.check(&host).await) } else { None }
        };
        let (reachability, certificate) = tokio::join!(self.http.check(&host), certificate);

        let verdict = merge(reachability, certificate);
        tracing::debug!(status = %verdict.status, ssl = ?verdict.ssl_valid, "probe finished");
        verdict
    }
}

/// Anything that can turn a domain name into a verdict
#[async_trait]
pub trait Probe: Send + Sync {
    async fn probe(&self, name: &str, check_certificate: bool) -> Verdict;
}

#[async_trait]
impl Probe for Prober {
    async fn probe(&self, name: &str, check_certificate: bool) -> Verdict {
        Prober::probe(self, name, check_certificate).await
    }
}

/// Combine reachability with the certificate check.
///
/// A specific certificate reason (e.g. expired) replaces the generic chain
/// note left by the insecure retry.
pub fn merge(reachability: Reachability, certificate: Option<Result<(), String>>) -> Verdict {
    let ssl_valid = match &certificate {
        None => SslState::Unknown,
        Some(Ok(())) => SslState::Valid,
        Some(Err(_)) => SslState::Invalid,
    };
    let certificate_error = certificate.and_then(Result::err);

    match reachability {
        Reachability::Reachable { error: None, .. } => Verdict {
            status: VerdictStatus::Ok,
            ssl_valid,
            error: certificate_error,
            checked_at: None,
        },
        Reachability::Reachable { error: Some(chain_note), .. } => Verdict {
            status: VerdictStatus::Ok,
            ssl_valid,
            error: Some(certificate_error.unwrap_or(chain_note)),
            checked_at: None,
        },
        Reachability::Unreachable { error } => Verdict {
            status: VerdictStatus::Down,
            ssl_valid,
            error: Some(error),
            checked_at: None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitoring::certificate::CERT_EXPIRED;
    use crate::monitoring::checker::CHAIN_ISSUE_PREFIX;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve a self-signed `localhost` certificate that answers every request
    /// with `200 OK`. Returns the bound port.
    async fn serve_tls(expired: bool) -> u16 {
        let mut params = rcgen::CertificateParams::new(vec!["localhost".to_string()]).unwrap();
        if expired {
            params.not_before = rcgen::date_time_ymd(2020, 1, 1);
            params.not_after = rcgen::date_time_ymd(2021, 1, 1);
        }
        let key = rcgen::KeyPair::generate().unwrap();
        let cert = params.self_signed(&key).unwrap();
        let identity =
            native_tls::Identity::from_pkcs8(cert.pem().as_bytes(), key.serialize_pem().as_bytes()).unwrap();
        let acceptor = tokio_native_tls::TlsAcceptor::from(native_tls::TlsAcceptor::new(identity).unwrap());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let acceptor = acceptor.clone();
                tokio::spawn(async move {
                    // Verifying clients abort the handshake; that is expected.
                    let Ok(mut tls) = acceptor.accept(stream).await else { return };
                    let mut buf = [0u8; 4096];
                    let _ = tls.read(&mut buf).await;
                    let _ = tls
                        .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 0\r\nconnection: close\r\n\r\n")
                        .await;
                    let _ = tls.shutdown().await;
                });
            }
        });
        port
    }

    async fn check_local(port: u16) -> (Reachability, Result<(), String>) {
        let http = HttpChecker::new(Duration::from_secs(5)).unwrap();
        let certificates = CertificateChecker::new(Duration::from_secs(5)).with_port(port);
        let url = format!("https://localhost:{port}/");
        tokio::join!(http.check_url(&url), certificates.check("localhost"))
    }

    #[tokio::test]
    async fn test_expired_certificate_on_live_host() {
        let port = serve_tls(true).await;

        let (reachability, certificate) = check_local(port).await;

        match &reachability {
            Reachability::Reachable { status_code: 200, error: Some(note) } => {
                assert!(note.starts_with(CHAIN_ISSUE_PREFIX), "unexpected note: {note}")
            }
            other => panic!("expected reachable through the insecure retry, got {other:?}"),
        }
        assert_eq!(certificate, Err(CERT_EXPIRED.to_string()));

        let verdict = merge(reachability, Some(certificate));
        assert_eq!(verdict.status, VerdictStatus::Ok);
        assert_eq!(verdict.ssl_valid, SslState::Invalid);
        assert_eq!(verdict.error.as_deref(), Some(CERT_EXPIRED));
    }

    #[tokio::test]
    async fn test_self_signed_certificate_keeps_chain_note() {
        let port = serve_tls(false).await;

        let (reachability, certificate) = check_local(port).await;

        assert_eq!(certificate, Ok(()));
        let verdict = merge(reachability, Some(certificate));
        assert_eq!(verdict.status, VerdictStatus::Ok);
        assert_eq!(verdict.ssl_valid, SslState::Valid);
        assert!(verdict.error.unwrap().starts_with(CHAIN_ISSUE_PREFIX));
    }

    #[tokio::test]
    async fn test_plain_tcp_listener_fails_handshake() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                let _ = stream.write_all(b"SSH-2.0-OpenSSH_9.6\r\n").await;
            }
        });

        let result = CertificateChecker::new(Duration::from_secs(2)).with_port(port).check("localhost").await;

        assert!(result.unwrap_err().starts_with("TLS handshake with localhost"));
    }

    #[test]
    fn test_healthy_site() {
        let verdict = merge(Reachability::Reachable { status_code: 200, error: None }, Some(Ok(())));
        assert_eq!(verdict.status, VerdictStatus::Ok);
        assert_eq!(verdict.ssl_valid, SslState::Valid);
        assert_eq!(verdict.error, None);
    }

    #[test]
    fn test_expired_but_reachable_reports_certificate_reason() {
        let reach = Reachability::Reachable {
            status_code: 200,
            error: Some(format!("{CHAIN_ISSUE_PREFIX}invalid peer certificate: Expired")),
        };

        let verdict = merge(reach, Some(Err(CERT_EXPIRED.to_string())));

        assert_eq!(verdict.status, VerdictStatus::Ok);
        assert_eq!(verdict.ssl_valid, SslState::Invalid);
        assert_eq!(verdict.error.as_deref(), Some(CERT_EXPIRED));
    }

    #[test]
    fn test_chain_note_kept_without_certificate_check() {
        let note = format!("{CHAIN_ISSUE_PREFIX}unknown issuer");
        let verdict =
            merge(Reachability::Reachable { status_code: 200, error: Some(note.clone()) }, None);

        assert_eq!(verdict.ssl_valid, SslState::Unknown);
        assert_eq!(verdict.error, Some(note));
    }

    #[test]
    fn test_unreachable_keeps_reachability_error() {
        let verdict = merge(
            Reachability::Unreachable { error: "HTTP status 502".to_string() },
            Some(Err("Connection to example.com timed out".to_string())),
        );

        assert_eq!(verdict.status, VerdictStatus::Down);
        assert_eq!(verdict.ssl_valid, SslState::Invalid);
        assert_eq!(verdict.error.as_deref(), Some("HTTP status 502"));
    }

    #[tokio::test]
    async fn test_invalid_name_is_down_without_network() {
        let prober = Prober::new(Duration::from_secs(1)).unwrap();

        let verdict = prober.probe("not a domain", true).await;

        assert_eq!(verdict.status, VerdictStatus::Down);
        assert!(verdict.error.unwrap().starts_with("Invalid domain name"));
    }
}
