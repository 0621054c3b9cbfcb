use std::error::Error as StdError;
use std::time::Duration;

use reqwest::redirect::Policy;

use super::types::ProbeError;

const USER_AGENT: &str = concat!("uptrack/", env!("CARGO_PKG_VERSION"));

/// Prefix used when the host only answered with verification disabled.
pub const CHAIN_ISSUE_PREFIX: &str = "reachable but certificate chain issue: ";

const CERTIFICATE_MARKERS: &[&str] = &[
    "certificate",
    "x509",
    "ssl",
    "tls",
    "self signed",
    "self-signed",
    "issuer",
    "handshake",
];

/// Result of the HTTPS reachability step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reachability {
    /// 2xx or 3xx. `error` carries the chain note when verification had to be disabled.
    Reachable { status_code: u16, error: Option<String> },
    Unreachable { error: String },
}

impl Reachability {
    pub fn is_reachable(&self) -> bool {
        matches!(self, Reachability::Reachable { .. })
    }
}

enum RequestFailure {
    Status(u16),
    Transport(String),
}

/// HTTPS reachability checker.
///
/// Holds two clients: a verifying one for the real check and a
/// non-verifying one used only to tell "host down" from "host up with a bad
/// certificate chain".
pub struct HttpChecker {
    client: reqwest::Client,
    insecure_client: reqwest::Client,
}

impl HttpChecker {
    pub fn new(timeout: Duration) -> Result<Self, ProbeError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(Policy::none())
            .user_agent(USER_AGENT)
            .build()?;

        let insecure_client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(Policy::none())
            .user_agent(USER_AGENT)
            .danger_accept_invalid_certs(true)
            .danger_accept_invalid_hostnames(true)
            .build()?;

        Ok(Self { client, insecure_client })
    }

    /// Request the domain root over HTTPS.
    pub async fn check(&self, host: &str) -> Reachability {
        self.check_url(&format!("https://{host}/")).await
    }

    pub async fn check_url(&self, url: &str) -> Reachability {
        let original = match request(&self.client, url).await {
            Ok(status_code) => return Reachability::Reachable { status_code, error: None },
            Err(RequestFailure::Status(code)) => {
                return Reachability::Unreachable { error: format!("HTTP status {code}") };
            }
            Err(RequestFailure::Transport(message)) => message,
        };

        if !looks_like_certificate_error(&original) {
            return Reachability::Unreachable { error: original };
        }

        tracing::debug!(url, error = %original, "retrying without certificate verification");
        match request(&self.insecure_client, url).await {
            Ok(status_code) => Reachability::Reachable {
                status_code,
                error: Some(format!("{CHAIN_ISSUE_PREFIX}{original}")),
            },
            Err(_) => Reachability::Unreachable { error: original },
        }
    }
}

async fn request(client: &reqwest::Client, url: &str) -> Result<u16, RequestFailure> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| RequestFailure::Transport(error_chain(&e)))?;

    let status = response.status();
    // Consider 2xx and 3xx as success
    if status.is_success() || status.is_redirection() {
        Ok(status.as_u16())
    } else {
        Err(RequestFailure::Status(status.as_u16()))
    }
}

/// Flatten an error and its sources into one line.
pub fn error_chain(error: &(dyn StdError + 'static)) -> String {
    let mut parts: Vec<String> = vec![error.to_string()];
    let mut source = error.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if parts.last().is_none_or(|last| !last.contains(&text)) {
            parts.push(text);
        }
        source = cause.source();
    }
    parts.join(": ")
}

/// Heuristic used to decide whether an insecure retry is worth it.
pub fn looks_like_certificate_error(message: &str) -> bool {
    let lowered = message.to_ascii_lowercase();
    CERTIFICATE_MARKERS.iter().any(|marker| lowered.contains(marker))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checker() -> HttpChecker {
        HttpChecker::new(Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_success_status_is_reachable() {
        let mut server = mockito::Server::new_async().await;
        let mock = server.mock("GET", "/").with_status(200).create_async().await;

        let result = checker().check_url(&format!("{}/", server.url())).await;

        assert_eq!(result, Reachability::Reachable { status_code: 200, error: None });
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_redirect_counts_as_reachable() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/")
            .with_status(301)
            .with_header("location", "https://www.example.com/")
            .create_async()
            .await;

        let result = checker().check_url(&format!("{}/", server.url())).await;

        assert_eq!(result, Reachability::Reachable { status_code: 301, error: None });
    }

    #[tokio::test]
    async fn test_server_error_is_unreachable() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server.mock("GET", "/").with_status(503).create_async().await;

        let result = checker().check_url(&format!("{}/", server.url())).await;

        assert_eq!(result, Reachability::Unreachable { error: "HTTP status 503".to_string() });
    }

    #[tokio::test]
    async fn test_refused_connection_is_unreachable() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let result = checker().check_url(&format!("http://127.0.0.1:{port}/")).await;

        assert!(!result.is_reachable());
    }

    #[test]
    fn test_certificate_error_detection() {
        assert!(looks_like_certificate_error(
            "error sending request: client error (Connect): invalid peer certificate: Expired"
        ));
        assert!(looks_like_certificate_error("SSL routines: self signed certificate in chain"));
        assert!(!looks_like_certificate_error("dns error: failed to lookup address information"));
        assert!(!looks_like_certificate_error("operation timed out"));
    }

    #[test]
    fn test_error_chain_joins_sources() {
        let inner = std::io::Error::new(std::io::ErrorKind::Other, "certificate has expired");
        let outer = std::io::Error::new(std::io::ErrorKind::Other, inner);

        let text = error_chain(&outer);

        assert!(text.contains("certificate has expired"));
    }
}
