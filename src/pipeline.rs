//! Scan orchestration.
//!
//! `Received → Decoded → Normalized → Resolved → Guarded → Evidenced → Verdicted`
//!
//! Linear, no retries at this layer. The first failing stage ends the scan.

use crate::classifier::{ClassifierError, ClassifierSource, HttpClassifierClient};
use crate::config::Config;
use crate::error::{ScanError, Stage};
use crate::network_guard::NetworkGuard;
use crate::normalizer::normalize;
use crate::qr_decoder::QrDecoder;
use crate::reputation::{ReputationSource, VirusTotalClient};
use crate::url_resolver::{RedirectResolver, Resolution, UrlResolver};
use crate::verdict::{DecisionMatrix, Verdict, VerdictResult, VerdictSource};
use serde::Serialize;
use std::sync::Arc;
use tokio::task::AbortHandle;
use url::Url;

#[derive(Debug, Clone)]
pub struct ScanOutcome {
    pub original_url: Url,
    pub resolution: Resolution,
    pub final_url: Url,
    pub verdict: Verdict,
}

pub struct ScanEngine {
    config: Arc<Config>,
    decoder: QrDecoder,
    resolver: Arc<dyn RedirectResolver>,
    guard: NetworkGuard,
    reputation: Arc<dyn ReputationSource>,
    classifier: Arc<dyn ClassifierSource>,
    matrix: DecisionMatrix,
}

impl ScanEngine {
    pub fn new(config: Arc<Config>) -> anyhow::Result<Self> {
        let resolver = Arc::new(UrlResolver::new(&config.resolver)?);
        let reputation = Arc::new(VirusTotalClient::new(&config.reputation)?);
        let classifier = Arc::new(HttpClassifierClient::new(&config.classifier)?);
        Ok(Self::with_components(config, resolver, reputation, classifier))
    }

    pub fn with_components(
        config: Arc<Config>,
        resolver: Arc<dyn RedirectResolver>,
        reputation: Arc<dyn ReputationSource>,
        classifier: Arc<dyn ClassifierSource>,
    ) -> Self {
        Self {
            guard: NetworkGuard::new(&config.guard),
            matrix: DecisionMatrix::new(config.thresholds),
            decoder: QrDecoder::new(&config.upload),
            config,
            resolver,
            reputation,
            classifier,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Scan a URL supplied directly by the caller.
    pub async fn scan_url(&self, raw: &str) -> Result<ScanOutcome, ScanError> {
        log::debug!("[{}] {raw}", Stage::Received);
        if raw.trim().is_empty() {
            return Err(ScanError::MissingInput);
        }
        let normalized = normalize(raw)?;
        self.run(normalized).await
    }

    /// Decode a QR code from an uploaded image and scan its payload.
    pub async fn check_qr(&self, bytes: Vec<u8>, mime_type: &str) -> Result<ScanOutcome, ScanError> {
        let payload = self.decode_payload(bytes, mime_type).await?;
        self.scan_url(&payload).await
    }

    /// Extract the QR payload off the async workers. The image buffer is
    /// dropped once decoding finishes.
    pub async fn decode_payload(&self, bytes: Vec<u8>, mime_type: &str) -> Result<String, ScanError> {
        log::debug!("[{}] {} bytes of {mime_type}", Stage::Received, bytes.len());
        let decoder = self.decoder.clone();
        let mime = mime_type.to_string();
        let payload = tokio::task::spawn_blocking(move || decoder.decode(&bytes, &mime))
            .await
            .map_err(|e| ScanError::Internal {
                message: format!("QR decoding task failed: {e}"),
                stage: Stage::Decoded,
            })??;
        log::debug!("[{}] payload: {payload}", Stage::Decoded);
        Ok(payload)
    }

    async fn run(&self, normalized: Url) -> Result<ScanOutcome, ScanError> {
        log::debug!("[{}] {normalized}", Stage::Normalized);
        self.guard.check_scheme(&normalized, Stage::Normalized)?;

        // Internal targets are refused before any request is sent to them
        self.guard.check(&normalized).await?;

        let resolution = self.resolver.resolve(&normalized).await;
        let final_url = resolution.url().clone();
        self.guard.check_scheme(&final_url, Stage::Resolved)?;
        log::debug!(
            "[{}] {final_url} ({} hops, resolved: {})",
            Stage::Resolved,
            resolution.hops().len(),
            resolution.is_resolved()
        );

        self.guard.check(&final_url).await?;
        log::debug!(
            "[{}] {}",
            Stage::Guarded,
            UrlResolver::extract_domain(&final_url).unwrap_or_default()
        );

        let verdict = self.gather_verdict(final_url.as_str()).await?;
        log::info!(
            "[{}] {final_url}: {:?} via {}",
            Stage::Verdicted,
            verdict.result,
            verdict.source.tag()
        );

        Ok(ScanOutcome {
            original_url: normalized,
            resolution,
            final_url,
            verdict,
        })
    }

    async fn gather_verdict(&self, url: &str) -> Result<Verdict, ScanError> {
        if !self.config.evidence.speculative_classifier {
            let outcome = self.reputation.lookup(url).await;
            log::debug!("[{}] reputation for {url}", Stage::Evidenced);
            return self
                .matrix
                .aggregate(outcome, || self.classifier.classify(url))
                .await;
        }

        // Start the classifier alongside the lookup; discard it if unused
        let classifier = self.classifier.clone();
        let target = url.to_string();
        let pending = tokio::spawn(async move { classifier.classify(&target).await });
        // Also fires if this future is dropped mid-scan
        let _abort = AbortOnDrop(pending.abort_handle());

        let outcome = self.reputation.lookup(url).await;
        log::debug!("[{}] reputation for {url} (speculative)", Stage::Evidenced);
        self.matrix
            .aggregate(outcome, || async move {
                pending
                    .await
                    .map_err(|e| ClassifierError::Interrupted(e.to_string()))?
            })
            .await
    }
}

struct AbortOnDrop(AbortHandle);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerdictDetails {
    pub source: VerdictSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub malicious: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suspicious: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub harmless: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub undetected: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scan_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

impl From<&Verdict> for VerdictDetails {
    fn from(verdict: &Verdict) -> Self {
        let rep = verdict.reputation.as_ref();
        VerdictDetails {
            source: verdict.source,
            malicious: rep.map(|r| r.malicious),
            suspicious: rep.map(|r| r.suspicious),
            harmless: rep.map(|r| r.harmless),
            undetected: rep.map(|r| r.undetected),
            scan_date: rep.and_then(|r| r.scan_date.clone()),
            confidence: verdict.classifier.as_ref().map(|c| c.confidence),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Supplementary {
    pub report_url: String,
}

fn supplementary(verdict: &Verdict) -> Option<Supplementary> {
    verdict
        .reputation
        .as_ref()
        .and_then(|r| r.permalink.clone())
        .map(|report_url| Supplementary { report_url })
}

/// Response body for `POST /scan`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanReport {
    pub result: VerdictResult,
    pub details: VerdictDetails,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub supplementary: Option<Supplementary>,
}

impl From<&ScanOutcome> for ScanReport {
    fn from(outcome: &ScanOutcome) -> Self {
        ScanReport {
            result: outcome.verdict.result,
            details: VerdictDetails::from(&outcome.verdict),
            supplementary: supplementary(&outcome.verdict),
        }
    }
}

/// Response body for `POST /check-qr`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QrReport {
    pub result: VerdictResult,
    pub original_url: String,
    pub final_url: String,
    pub redirects: usize,
    pub details: VerdictDetails,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub supplementary: Option<Supplementary>,
}

impl From<&ScanOutcome> for QrReport {
    fn from(outcome: &ScanOutcome) -> Self {
        QrReport {
            result: outcome.verdict.result,
            original_url: outcome.original_url.to_string(),
            final_url: outcome.final_url.to_string(),
            redirects: outcome.resolution.hops().len(),
            details: VerdictDetails::from(&outcome.verdict),
            supplementary: supplementary(&outcome.verdict),
        }
    }
}
