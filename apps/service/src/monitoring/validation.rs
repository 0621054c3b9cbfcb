//! Domain name normalisation for probing.
//!
//! Names arrive from account imports and the external fleet in many shapes
//! (`https://Example.com/`, `example.com.`). Probing always works on the bare
//! lowercase host, and refuses targets that point into private networks.

use std::net::IpAddr;

use url::Url;

use super::types::ProbeError;

/// Normalise a registered domain into the host the prober connects to.
pub fn normalize_domain_name(raw: &str) -> Result<String, ProbeError> {
    let lowered = raw.trim().to_ascii_lowercase();

    // Bare names go through the same parser so `host:port` and userinfo are handled alike.
    let candidate = if lowered.contains("://") { lowered } else { format!("http://{lowered}") };
    let host = Url::parse(&candidate)
        .ok()
        .and_then(|url| url.host_str().map(|h| h.trim_matches(['[', ']']).to_string()))
        .ok_or_else(|| ProbeError::InvalidDomain(raw.trim().to_string()))?;
    let host = host.strip_suffix('.').unwrap_or(&host);

    if host.is_empty() || host.len() > 253 {
        return Err(ProbeError::InvalidDomain(raw.trim().to_string()));
    }

    if is_private_or_local(host) {
        return Err(ProbeError::PrivateAddress(host.to_string()));
    }

    if host.parse::<IpAddr>().is_ok() {
        return Ok(host.to_string());
    }

    let valid_labels = host.split('.').all(|label| {
        !label.is_empty()
            && label.len() <= 63
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    });

    if !valid_labels || !host.contains('.') {
        return Err(ProbeError::InvalidDomain(raw.trim().to_string()));
    }

    Ok(host.to_string())
}

/// Check if hostname/IP is private or localhost
fn is_private_or_local(host: &str) -> bool {
    if host == "localhost" || host.ends_with(".localhost") {
        return true;
    }

    match host.trim_matches(['[', ']']).parse::<IpAddr>() {
        Ok(IpAddr::V4(ipv4)) => {
            ipv4.is_private()
                || ipv4.is_loopback()
                || ipv4.is_link_local()
                || ipv4.is_broadcast()
                || ipv4.is_documentation()
                || ipv4.is_unspecified()
        }
        Ok(IpAddr::V6(ipv6)) => ipv6.is_loopback() || ipv6.is_unspecified() || ipv6.is_multicast(),
        Err(_) => host.ends_with(".local") || host.ends_with(".internal"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_strips_scheme_path_and_trailing_dot() {
        assert_eq!(normalize_domain_name("https://Example.com/login").unwrap(), "example.com");
        assert_eq!(normalize_domain_name(" example.com. ").unwrap(), "example.com");
        assert_eq!(normalize_domain_name("http://shop.example.co.uk?x=1").unwrap(), "shop.example.co.uk");
        assert_eq!(normalize_domain_name("https://user@example.com:8443/").unwrap(), "example.com");
    }

    #[test]
    fn test_bare_host_with_port() {
        assert_eq!(normalize_domain_name("example.com:8443").unwrap(), "example.com");
        assert_eq!(normalize_domain_name("Shop.Example.com:443/cart").unwrap(), "shop.example.com");
        assert!(normalize_domain_name("example.com:notaport").is_err());
        assert!(matches!(normalize_domain_name("localhost:8080"), Err(ProbeError::PrivateAddress(_))));
    }

    #[test]
    fn test_normalize_rejects_garbage() {
        assert!(normalize_domain_name("").is_err());
        assert!(normalize_domain_name("no-dots").is_err());
        assert!(normalize_domain_name("bad..example.com").is_err());
        assert!(normalize_domain_name("-lead.example.com").is_err());
        assert!(normalize_domain_name("spa ce.example.com").is_err());
    }

    #[test]
    fn test_private_targets_are_refused() {
        assert!(matches!(normalize_domain_name("localhost"), Err(ProbeError::PrivateAddress(_))));
        assert!(matches!(normalize_domain_name("10.0.0.1"), Err(ProbeError::PrivateAddress(_))));
        assert!(matches!(normalize_domain_name("printer.local"), Err(ProbeError::PrivateAddress(_))));
        assert!(normalize_domain_name("8.8.8.8").is_ok());
    }
}
