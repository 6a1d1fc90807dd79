//! Private-network guard.
//!
//! The default check is a literal match on the hostname string. A hostname
//! that merely resolves to a private address passes unless
//! `guard.resolve_hostnames` is enabled, in which case the host is also looked
//! up and every returned address is checked.

use crate::config::GuardConfig;
use crate::error::{ScanError, Stage};
use crate::normalizer::is_allowed_scheme;
use regex::Regex;
use std::net::IpAddr;
use std::sync::OnceLock;
use url::Url;

fn private_host_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        vec![
            Regex::new(r"^10\.\d+\.\d+\.\d+$").unwrap(),
            Regex::new(r"^172\.(1[6-9]|2\d|3[0-1])\.\d+\.\d+$").unwrap(),
            Regex::new(r"^192\.168\.\d+\.\d+$").unwrap(),
        ]
    })
}

#[derive(Debug, Clone, Default)]
pub struct NetworkGuard {
    resolve_hostnames: bool,
}

impl NetworkGuard {
    pub fn new(config: &GuardConfig) -> Self {
        Self {
            resolve_hostnames: config.resolve_hostnames,
        }
    }

    pub fn check_scheme(&self, url: &Url, stage: Stage) -> Result<(), ScanError> {
        if is_allowed_scheme(url.scheme()) {
            Ok(())
        } else {
            Err(ScanError::DisallowedScheme {
                scheme: url.scheme().to_string(),
                stage,
            })
        }
    }

    /// Literal hostname match: localhost, 127.0.0.1 and the RFC 1918 ranges.
    pub fn is_private_host(host: &str) -> bool {
        let host = host.trim_end_matches('.').to_lowercase();
        host == "localhost"
            || host == "127.0.0.1"
            || private_host_patterns().iter().any(|p| p.is_match(&host))
    }

    pub fn is_private_ip(ip: &IpAddr) -> bool {
        match ip {
            IpAddr::V4(v4) => {
                v4.is_loopback()
                    || v4.is_private()
                    || v4.is_link_local()
                    || v4.is_unspecified()
            }
            IpAddr::V6(v6) => {
                if let Some(mapped) = v6.to_ipv4_mapped() {
                    return Self::is_private_ip(&IpAddr::V4(mapped));
                }
                let first = v6.segments()[0];
                v6.is_loopback()
                    || v6.is_unspecified()
                    || (first & 0xfe00) == 0xfc00 // unique local
                    || (first & 0xffc0) == 0xfe80 // link local
            }
        }
    }

    /// Reject `url` if it targets an internal address. Runs after redirect
    /// resolution, so the scheme is re-validated here as well.
    pub async fn check(&self, url: &Url) -> Result<(), ScanError> {
        self.check_scheme(url, Stage::Guarded)?;

        let host = url
            .host_str()
            .ok_or_else(|| ScanError::InvalidUrl(format!("{url}: missing host")))?;

        if Self::is_private_host(host) {
            log::warn!("Blocked private network target: {host}");
            return Err(ScanError::PrivateNetwork {
                host: host.to_string(),
            });
        }

        if self.resolve_hostnames {
            self.check_resolved(host).await?;
        }

        Ok(())
    }

    async fn check_resolved(&self, host: &str) -> Result<(), ScanError> {
        let bare = host.trim_start_matches('[').trim_end_matches(']');
        if let Ok(ip) = bare.parse::<IpAddr>() {
            return self.reject_if_private(host, &ip);
        }

        use hickory_resolver::TokioAsyncResolver;

        let resolver = match TokioAsyncResolver::tokio_from_system_conf() {
            Ok(resolver) => resolver,
            Err(e) => {
                log::warn!("DNS resolver unavailable, skipping address check for {host}: {e}");
                return Ok(());
            }
        };

        match resolver.lookup_ip(host).await {
            Ok(lookup) => {
                for ip in lookup.iter() {
                    self.reject_if_private(host, &ip)?;
                }
                Ok(())
            }
            Err(e) => {
                log::debug!("Could not resolve {host} for address check: {e}");
                Ok(())
            }
        }
    }

    fn reject_if_private(&self, host: &str, ip: &IpAddr) -> Result<(), ScanError> {
        if Self::is_private_ip(ip) {
            log::warn!("Blocked {host}: resolves to private address {ip}");
            Err(ScanError::PrivateNetwork {
                host: host.to_string(),
            })
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[tokio::test]
    async fn test_private_hosts_rejected() {
        let guard = NetworkGuard::default();
        for target in [
            "http://127.0.0.1/",
            "http://10.1.2.3/admin",
            "http://192.168.0.5:8080/",
            "http://172.20.0.1/",
            "http://localhost/",
            "http://LOCALHOST./",
        ] {
            assert!(
                matches!(
                    guard.check(&url(target)).await,
                    Err(ScanError::PrivateNetwork { .. })
                ),
                "{target} should be blocked"
            );
        }
    }

    #[tokio::test]
    async fn test_public_hosts_accepted() {
        let guard = NetworkGuard::default();
        assert!(guard.check(&url("http://8.8.8.8/")).await.is_ok());
        assert!(guard.check(&url("https://example.com/")).await.is_ok());
        // 172.32/16 sits just outside the 172.16/12 block
        assert!(guard.check(&url("http://172.32.0.1/")).await.is_ok());
        assert!(guard.check(&url("http://172.15.0.1/")).await.is_ok());
    }

    #[tokio::test]
    async fn test_literal_mode_leaves_ipv6_loopback_alone() {
        let guard = NetworkGuard::default();
        assert!(guard.check(&url("http://[::1]/")).await.is_ok());

        let strict = NetworkGuard::new(&GuardConfig {
            resolve_hostnames: true,
        });
        assert!(matches!(
            strict.check(&url("http://[::1]/")).await,
            Err(ScanError::PrivateNetwork { .. })
        ));
        assert!(matches!(
            strict.check(&url("http://169.254.169.254/latest")).await,
            Err(ScanError::PrivateNetwork { .. })
        ));
        assert!(strict.check(&url("http://8.8.8.8/")).await.is_ok());
    }

    #[test]
    fn test_scheme_recheck() {
        let guard = NetworkGuard::default();
        assert!(guard
            .check_scheme(&url("https://example.com"), Stage::Resolved)
            .is_ok());
        assert!(matches!(
            guard.check_scheme(&url("ftp://example.com"), Stage::Resolved),
            Err(ScanError::DisallowedScheme {
                stage: Stage::Resolved,
                ..
            })
        ));
    }

    #[test]
    fn test_private_ip_ranges() {
        assert!(NetworkGuard::is_private_ip(&"10.0.0.1".parse().unwrap()));
        assert!(NetworkGuard::is_private_ip(&"fd00::1".parse().unwrap()));
        assert!(NetworkGuard::is_private_ip(&"::ffff:192.168.1.1".parse().unwrap()));
        assert!(!NetworkGuard::is_private_ip(&"1.1.1.1".parse().unwrap()));
        assert!(!NetworkGuard::is_private_ip(&"2606:4700::1111".parse().unwrap()));
    }
}
