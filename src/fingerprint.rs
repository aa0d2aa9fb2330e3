use axum::http::header::USER_AGENT;
use axum::http::HeaderMap;
use derive_new::new;
use sha2::{Digest, Sha256};

/// Local/dev fallback when no proxy header carries a client address.
pub const FALLBACK_IP: &str = "127.0.0.1";

/// Proxy headers that may carry the real client address, in trust order.
const IP_HEADERS: [&str; 3] = ["x-forwarded-for", "x-real-ip", "cf-connecting-ip"];

/// The weak identity signals a visitor presents without cookies or an account.
///
/// NAT-shared addresses collapse many visitors into one fingerprint and rotating
/// addresses split one visitor into many. Both are accepted trade-offs; this is
/// a deduplication heuristic, not a security boundary.
#[derive(Debug, Clone, PartialEq, Eq, new)]
pub struct ClientIdentity {
    pub ip: String,
    pub user_agent: String,
}

impl ClientIdentity {
    /// Derives the deduplication token: a fixed-length, one-way digest over the
    /// address and user-agent. Deterministic, so repeat requests from the same
    /// visitor always map to the same token.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.ip.as_bytes());
        hasher.update(b"-");
        hasher.update(self.user_agent.as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// Picks the client address out of the request headers, first match wins.
/// `x-forwarded-for` may hold a chain; only the first entry is the client.
/// An absent or unreadable value falls through to the next header, but a
/// present-yet-invalid value is returned as-is so the caller can reject it.
pub fn client_ip(headers: &HeaderMap) -> String {
    for name in IP_HEADERS {
        if let Some(value) = headers.get(name).and_then(|value| value.to_str().ok()) {
            return value.split(',').next().unwrap_or_default().trim().to_string();
        }
    }

    FALLBACK_IP.to_string()
}

/// A missing user-agent is not an error, it fingerprints as `"unknown"`.
pub fn user_agent(headers: &HeaderMap) -> String {
    headers
        .get(USER_AGENT)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("unknown")
        .to_string()
}

pub fn is_valid_ip(ip: &str) -> bool {
    ip.parse::<std::net::IpAddr>().is_ok()
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (name, value) in pairs {
            headers.insert(*name, HeaderValue::from_str(value).unwrap());
        }
        headers
    }

    #[test]
    fn fingerprint_is_deterministic() {
        let identity = ClientIdentity::new("203.0.113.1".into(), "Mozilla/5.0".into());

        assert_eq!(
            identity.fingerprint(),
            "79f3aecd30e498ae54e697a577443e18d49039dcff648a78c7651a82e0384b29"
        );
        assert_eq!(identity.fingerprint(), identity.fingerprint());
    }

    #[test]
    fn fingerprint_differs_per_identity() {
        let first = ClientIdentity::new("203.0.113.1".into(), "Mozilla/5.0".into());
        let other_ip = ClientIdentity::new("203.0.113.2".into(), "Mozilla/5.0".into());
        let other_agent = ClientIdentity::new("203.0.113.1".into(), "curl/8.0".into());

        assert_ne!(first.fingerprint(), other_ip.fingerprint());
        assert_ne!(first.fingerprint(), other_agent.fingerprint());
    }

    #[test]
    fn forwarded_for_takes_first_entry() {
        let headers = headers(&[
            ("x-forwarded-for", "203.0.113.1, 10.0.0.1"),
            ("x-real-ip", "203.0.113.9"),
        ]);

        assert_eq!(client_ip(&headers), "203.0.113.1");
    }

    #[test]
    fn real_ip_wins_over_cdn_header() {
        let headers = headers(&[
            ("x-real-ip", "203.0.113.9"),
            ("cf-connecting-ip", "203.0.113.7"),
        ]);

        assert_eq!(client_ip(&headers), "203.0.113.9");
    }

    #[test]
    fn cdn_header_is_last_resort() {
        let headers = headers(&[("cf-connecting-ip", "203.0.113.7")]);

        assert_eq!(client_ip(&headers), "203.0.113.7");
    }

    #[test]
    fn missing_headers_fall_back_to_loopback() {
        assert_eq!(client_ip(&HeaderMap::new()), FALLBACK_IP);
    }

    #[test]
    fn empty_forwarded_for_is_not_substituted() {
        // a present-but-empty header must surface as an invalid address, not
        // silently fall back to loopback
        let headers = headers(&[("x-forwarded-for", "")]);

        let ip = client_ip(&headers);
        assert_eq!(ip, "");
        assert!(!is_valid_ip(&ip));
    }

    #[test]
    fn missing_user_agent_reads_as_unknown() {
        assert_eq!(user_agent(&HeaderMap::new()), "unknown");

        let identity = ClientIdentity::new("203.0.113.1".into(), "unknown".into());
        assert_eq!(
            identity.fingerprint(),
            "b20b057f56279a43aac6fc95acb259ea11c0a4660e61783fa68a0cb8f914f432"
        );
    }

    #[test]
    fn accepts_loopback_and_public_addresses() {
        assert!(is_valid_ip("127.0.0.1"));
        assert!(is_valid_ip("::1"));
        assert!(is_valid_ip("203.0.113.5"));
        assert!(is_valid_ip("2001:0db8:85a3:0000:0000:8a2e:0370:7334"));
    }

    #[test]
    fn rejects_malformed_addresses() {
        assert!(!is_valid_ip("999.999.999.999"));
        assert!(!is_valid_ip(""));
        assert!(!is_valid_ip("not-an-ip"));
        assert!(!is_valid_ip("203.0.113"));
    }
}
