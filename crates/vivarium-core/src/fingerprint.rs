//! Voter fingerprinting and trusted-proxy address resolution.
//!
//! The fingerprint is a salted hash of the caller's network identifier; it is
//! the unit of vote rate limiting, so the forwarded-for headers behind it are
//! honored only when the direct peer is a configured trusted proxy;
//! otherwise every fingerprint would collapse to the proxy's address.

use std::net::IpAddr;

use sha2::{Digest, Sha256};

use crate::config::CidrRange;

/// Forwarding headers as received, in trust order.
#[derive(Debug, Default, Clone)]
pub struct ForwardHeaders {
    pub cf_connecting_ip: Option<String>,
    pub x_forwarded_for: Option<String>,
    pub x_real_ip: Option<String>,
}

/// Resolve the effective client address. Headers are consulted only when the
/// direct peer sits inside one of `trusted`; the first forwarded hop wins.
pub fn resolve_client_ip(peer: IpAddr, headers: &ForwardHeaders, trusted: &[CidrRange]) -> String {
    let peer_trusted = peer.is_loopback() || trusted.iter().any(|net| net.contains(peer));
    if peer_trusted {
        if let Some(ip) = headers.cf_connecting_ip.as_deref().map(str::trim) {
            if !ip.is_empty() {
                return ip.to_string();
            }
        }
        if let Some(chain) = headers.x_forwarded_for.as_deref() {
            if let Some(first) = chain.split(',').next().map(str::trim) {
                if !first.is_empty() {
                    return first.to_string();
                }
            }
        }
        if let Some(ip) = headers.x_real_ip.as_deref().map(str::trim) {
            if !ip.is_empty() {
                return ip.to_string();
            }
        }
    }
    peer.to_string()
}

/// Salted, truncated hash of the resolved address. Sixteen hex chars is
/// enough for uniqueness at this scale and keeps raw addresses out of the db.
pub fn voter_fingerprint(salt: &str, client_ip: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(b":");
    hasher.update(client_ip.as_bytes());
    let digest = hasher.finalize();
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    hex[..16].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trusted() -> Vec<CidrRange> {
        vec![CidrRange::parse("10.0.0.0/8").unwrap()]
    }

    #[test]
    fn untrusted_peer_headers_are_ignored() {
        let headers = ForwardHeaders {
            x_forwarded_for: Some("203.0.113.7".into()),
            ..Default::default()
        };
        let ip = resolve_client_ip("198.51.100.9".parse().unwrap(), &headers, &trusted());
        assert_eq!(ip, "198.51.100.9");
    }

    #[test]
    fn trusted_peer_first_forwarded_hop_wins() {
        let headers = ForwardHeaders {
            x_forwarded_for: Some("203.0.113.7, 10.0.0.1".into()),
            ..Default::default()
        };
        let ip = resolve_client_ip("10.1.2.3".parse().unwrap(), &headers, &trusted());
        assert_eq!(ip, "203.0.113.7");
    }

    #[test]
    fn cf_header_outranks_forwarded_for() {
        let headers = ForwardHeaders {
            cf_connecting_ip: Some("203.0.113.99".into()),
            x_forwarded_for: Some("203.0.113.7".into()),
            ..Default::default()
        };
        let ip = resolve_client_ip("10.1.2.3".parse().unwrap(), &headers, &trusted());
        assert_eq!(ip, "203.0.113.99");
    }

    #[test]
    fn loopback_peer_is_implicitly_trusted() {
        let headers = ForwardHeaders {
            x_real_ip: Some("203.0.113.5".into()),
            ..Default::default()
        };
        let ip = resolve_client_ip("127.0.0.1".parse().unwrap(), &headers, &[]);
        assert_eq!(ip, "203.0.113.5");
    }

    #[test]
    fn fingerprint_is_stable_salted_and_short() {
        let a = voter_fingerprint("salt", "203.0.113.7");
        let b = voter_fingerprint("salt", "203.0.113.7");
        let c = voter_fingerprint("other-salt", "203.0.113.7");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 16);
        assert!(!a.contains("203"));
    }
}
