use crate::config::ClassifierConfig;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Prediction {
    Malicious,
    #[serde(alias = "safe")]
    Benign,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifierEvidence {
    pub prediction: Prediction,
    pub confidence: f64,
}

impl ClassifierEvidence {
    pub fn is_malicious(&self) -> bool {
        self.prediction == Prediction::Malicious
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ClassifierError {
    #[error("classifier request failed: {0}")]
    Network(#[from] reqwest::Error),
    #[error("classifier returned HTTP {status}: {message}")]
    Upstream { status: u16, message: String },
    #[error("classifier confidence out of range: {0}")]
    InvalidConfidence(f64),
    #[error("classifier task did not complete: {0}")]
    Interrupted(String),
}

#[async_trait]
pub trait ClassifierSource: Send + Sync {
    async fn classify(&self, url: &str) -> Result<ClassifierEvidence, ClassifierError>;
}

#[derive(Debug, Serialize)]
struct PredictRequest<'a> {
    url: &'a str,
}

/// Client for the secondary URL model served over HTTP (`POST /predict`).
pub struct HttpClassifierClient {
    client: Client,
    endpoint: String,
}

impl HttpClassifierClient {
    pub fn new(config: &ClassifierConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;

        Ok(Self {
            client,
            endpoint: format!("{}/predict", config.base_url.trim_end_matches('/')),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl ClassifierSource for HttpClassifierClient {
    async fn classify(&self, url: &str) -> Result<ClassifierEvidence, ClassifierError> {
        log::debug!("Sending {url} to classifier at {}", self.endpoint);

        let response = self
            .client
            .post(&self.endpoint)
            .json(&PredictRequest { url })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ClassifierError::Upstream {
                status: status.as_u16(),
                message,
            });
        }

        let evidence: ClassifierEvidence = response.json().await?;
        if !(0.0..=1.0).contains(&evidence.confidence) {
            return Err(ClassifierError::InvalidConfidence(evidence.confidence));
        }

        log::info!(
            "Classifier prediction for {url}: {:?} ({:.2})",
            evidence.prediction,
            evidence.confidence
        );
        Ok(evidence)
    }
}
