use crate::config::ResolverConfig;
use crate::network_guard::NetworkGuard;
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use url::Url;

/// Outcome of following a redirect chain.
///
/// Resolution is best-effort: a transport failure yields `Unresolved` carrying
/// the original URL instead of an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Resolved { url: Url, hops: Vec<Url> },
    Unresolved { original: Url, reason: String },
}

impl Resolution {
    pub fn url(&self) -> &Url {
        match self {
            Resolution::Resolved { url, .. } => url,
            Resolution::Unresolved { original, .. } => original,
        }
    }

    /// Intermediate redirect targets, final URL included.
    pub fn hops(&self) -> &[Url] {
        match self {
            Resolution::Resolved { hops, .. } => hops,
            Resolution::Unresolved { .. } => &[],
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, Resolution::Resolved { .. })
    }
}

#[async_trait]
pub trait RedirectResolver: Send + Sync {
    async fn resolve(&self, url: &Url) -> Resolution;
}

pub struct UrlResolver {
    client: Client,
    max_redirects: u8,
    timeout: Duration,
}

impl UrlResolver {
    pub fn new(config: &ResolverConfig) -> Result<Self, reqwest::Error> {
        let timeout = Duration::from_millis(config.timeout_ms);
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(config.user_agent.clone())
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        Ok(Self {
            client,
            max_redirects: config.max_redirects,
            timeout,
        })
    }

    /// Walk the redirect chain with HEAD requests so no body is fetched.
    ///
    /// A hop pointing at a private host ends the walk without being requested;
    /// it is returned as the final URL for the guard to reject.
    async fn follow(&self, start: &Url) -> Result<(Url, Vec<Url>), String> {
        let mut current = start.clone();
        let mut hops = Vec::new();

        loop {
            let response = self
                .client
                .head(current.as_str())
                .send()
                .await
                .map_err(|e| e.to_string())?;

            if !response.status().is_redirection() {
                return Ok((current, hops));
            }

            let Some(location) = response.headers().get("location") else {
                return Ok((current, hops));
            };

            if hops.len() >= self.max_redirects as usize {
                return Err(format!(
                    "more than {} redirects from {start}",
                    self.max_redirects
                ));
            }

            let location_str = location.to_str().map_err(|e| e.to_string())?;

            // Location may be relative to the current hop
            let next = current.join(location_str).map_err(|e| e.to_string())?;

            log::debug!("Redirect {} -> {}", current, next);
            hops.push(next.clone());

            if next.host_str().is_some_and(NetworkGuard::is_private_host) {
                log::warn!("Redirect from {current} targets a private host, not following");
                return Ok((next, hops));
            }
            current = next;
        }
    }

    /// Extract domain from URL
    pub fn extract_domain(url: &Url) -> Option<String> {
        url.host_str().map(|h| h.to_lowercase())
    }
}

#[async_trait]
impl RedirectResolver for UrlResolver {
    async fn resolve(&self, url: &Url) -> Resolution {
        // Dropping the chain future on timeout cancels the in-flight request
        match tokio::time::timeout(self.timeout, self.follow(url)).await {
            Ok(Ok((final_url, hops))) => Resolution::Resolved {
                url: final_url,
                hops,
            },
            Ok(Err(reason)) => {
                log::error!("Redirect resolution error for {url}: {reason}");
                Resolution::Unresolved {
                    original: url.clone(),
                    reason,
                }
            }
            Err(_) => {
                log::error!(
                    "Redirect resolution for {url} timed out after {:?}",
                    self.timeout
                );
                Resolution::Unresolved {
                    original: url.clone(),
                    reason: format!("timed out after {} ms", self.timeout.as_millis()),
                }
            }
        }
    }
}
