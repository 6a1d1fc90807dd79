//! Reputation lookups against the VirusTotal v3 URL API.
//!
//! Every failure is folded into [`ReputationOutcome::Unavailable`] so the
//! caller can fall back to the classifier.

use crate::config::ReputationConfig;
use async_trait::async_trait;
use base64::Engine;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const REPORT_BASE: &str = "https://www.virustotal.com/gui/url";

/// Engine detection counts for a URL, as last analysed by the reputation source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReputationEvidence {
    pub malicious: u32,
    pub suspicious: u32,
    pub harmless: u32,
    pub undetected: u32,
    pub scan_date: Option<String>,
    pub permalink: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReputationOutcome {
    Available(ReputationEvidence),
    Unavailable(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ReputationError {
    #[error("no reputation credential configured")]
    MissingCredential,
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("credential rejected (HTTP {0})")]
    Unauthorized(u16),
    #[error("no record for this URL")]
    NotFound,
    #[error("unexpected response (HTTP {status}): {message}")]
    Upstream { status: u16, message: String },
}

#[async_trait]
pub trait ReputationSource: Send + Sync {
    async fn lookup(&self, url: &str) -> ReputationOutcome;
}

#[derive(Debug, Deserialize)]
struct UrlReport {
    data: UrlReportData,
}

#[derive(Debug, Deserialize)]
struct UrlReportData {
    id: String,
    attributes: UrlAttributes,
}

#[derive(Debug, Deserialize)]
struct UrlAttributes {
    #[serde(default)]
    last_analysis_stats: AnalysisStats,
    last_analysis_date: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
struct AnalysisStats {
    #[serde(default)]
    malicious: u32,
    #[serde(default)]
    suspicious: u32,
    #[serde(default)]
    harmless: u32,
    #[serde(default)]
    undetected: u32,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

pub struct VirusTotalClient {
    client: Client,
    base_url: String,
    api_key: String,
}

impl VirusTotalClient {
    pub fn new(config: &ReputationConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }

    /// URL identifier used by the v3 API: unpadded URL-safe base64 of the URL.
    pub fn url_id(url: &str) -> String {
        base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(url)
    }

    pub async fn fetch_report(&self, url: &str) -> Result<ReputationEvidence, ReputationError> {
        if self.api_key.is_empty() {
            return Err(ReputationError::MissingCredential);
        }

        let endpoint = format!("{}/urls/{}", self.base_url, Self::url_id(url));
        log::debug!("Querying reputation source for {url}");

        let response = self
            .client
            .get(&endpoint)
            .header("x-apikey", &self.api_key)
            .header("accept", "application/json")
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::OK {
            let report: UrlReport = response.json().await?;
            return Ok(Self::into_evidence(report));
        }
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(ReputationError::Unauthorized(status.as_u16()));
        }
        if status == StatusCode::NOT_FOUND {
            return Err(ReputationError::NotFound);
        }

        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorEnvelope>(&body)
            .map(|e| format!("{}: {}", e.error.code, e.error.message))
            .unwrap_or(body);
        Err(ReputationError::Upstream {
            status: status.as_u16(),
            message,
        })
    }

    fn into_evidence(report: UrlReport) -> ReputationEvidence {
        let attrs = report.data.attributes;
        let stats = attrs.last_analysis_stats;
        let scan_date = attrs
            .last_analysis_date
            .and_then(|ts| chrono::DateTime::from_timestamp(ts, 0))
            .map(|dt| dt.to_rfc3339());

        ReputationEvidence {
            malicious: stats.malicious,
            suspicious: stats.suspicious,
            harmless: stats.harmless,
            undetected: stats.undetected,
            scan_date,
            permalink: Some(format!("{REPORT_BASE}/{}", report.data.id)),
        }
    }
}

#[async_trait]
impl ReputationSource for VirusTotalClient {
    async fn lookup(&self, url: &str) -> ReputationOutcome {
        match self.fetch_report(url).await {
            Ok(evidence) => {
                log::info!(
                    "Reputation for {url}: malicious={} suspicious={} harmless={} undetected={}",
                    evidence.malicious,
                    evidence.suspicious,
                    evidence.harmless,
                    evidence.undetected
                );
                ReputationOutcome::Available(evidence)
            }
            Err(e) => {
                log::warn!("Reputation source unavailable for {url}: {e}");
                ReputationOutcome::Unavailable(e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::Path;
    use axum::http::{HeaderMap, StatusCode as AxumStatus};
    use axum::routing::get;
    use axum::{Json, Router};
    use serde_json::json;
    use tokio::net::TcpListener;

    async fn fake_virustotal() -> String {
        let app = Router::new().route(
            "/urls/:id",
            get(|headers: HeaderMap, Path(id): Path<String>| async move {
                if headers.get("x-apikey").map(|v| v.as_bytes()) != Some(b"test-key".as_slice()) {
                    return (AxumStatus::UNAUTHORIZED, Json(json!({"error": {"code": "WrongCredentialsError", "message": "bad key"}})));
                }
                let known = VirusTotalClient::url_id("http://phish.example/");
                let quota = VirusTotalClient::url_id("http://busy.example/");
                if id == known {
                    (
                        AxumStatus::OK,
                        Json(json!({
                            "data": {
                                "id": "abc123",
                                "type": "url",
                                "attributes": {
                                    "last_analysis_stats": {
                                        "malicious": 3, "suspicious": 0,
                                        "harmless": 0, "undetected": 1, "timeout": 0
                                    },
                                    "last_analysis_date": 1700000000
                                }
                            }
                        })),
                    )
                } else if id == quota {
                    (
                        AxumStatus::TOO_MANY_REQUESTS,
                        Json(json!({"error": {"code": "QuotaExceededError", "message": "slow down"}})),
                    )
                } else {
                    (
                        AxumStatus::NOT_FOUND,
                        Json(json!({"error": {"code": "NotFoundError", "message": "not found"}})),
                    )
                }
            }),
        );

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn client(base_url: &str, api_key: &str) -> VirusTotalClient {
        VirusTotalClient::new(&ReputationConfig {
            api_key: api_key.to_string(),
            base_url: base_url.to_string(),
            timeout_seconds: 5,
        })
        .unwrap()
    }

    #[test]
    fn test_url_id_is_unpadded() {
        assert_eq!(
            VirusTotalClient::url_id("http://example.com/"),
            "aHR0cDovL2V4YW1wbGUuY29tLw"
        );
    }

    #[tokio::test]
    async fn test_report_parsed() {
        let base = fake_virustotal().await;
        let outcome = client(&base, "test-key").lookup("http://phish.example/").await;

        let ReputationOutcome::Available(evidence) = outcome else {
            panic!("expected evidence, got {outcome:?}");
        };
        assert_eq!(evidence.malicious, 3);
        assert_eq!(evidence.undetected, 1);
        assert_eq!(
            evidence.permalink.as_deref(),
            Some("https://www.virustotal.com/gui/url/abc123")
        );
        assert_eq!(
            evidence.scan_date.as_deref(),
            Some("2023-11-14T22:13:20+00:00")
        );
    }

    #[tokio::test]
    async fn test_failures_become_unavailable() {
        let base = fake_virustotal().await;

        let unknown = client(&base, "test-key").lookup("http://new.example/").await;
        assert!(matches!(unknown, ReputationOutcome::Unavailable(_)));

        let quota = client(&base, "test-key").lookup("http://busy.example/").await;
        match quota {
            ReputationOutcome::Unavailable(reason) => assert!(reason.contains("QuotaExceededError")),
            other => panic!("unexpected {other:?}"),
        }

        let bad_key = client(&base, "wrong").lookup("http://phish.example/").await;
        assert!(matches!(bad_key, ReputationOutcome::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_missing_credential_skips_network() {
        let outcome = client("http://127.0.0.1:9", "")
            .fetch_report("http://phish.example/")
            .await;
        assert!(matches!(outcome, Err(ReputationError::MissingCredential)));
    }
}
