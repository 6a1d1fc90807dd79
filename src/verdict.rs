//! Verdict aggregation.
//!
//! Rules are applied in order, first match wins:
//! 1. reputation unavailable → classifier decides
//! 2. malicious or suspicious at/above threshold → fail on reputation
//! 3. harmless at/above threshold → pass on reputation
//! 4. otherwise inconclusive → classifier decides
//!
//! The classifier is only called for rules 1 and 4.

use crate::classifier::{ClassifierError, ClassifierEvidence};
use crate::config::Thresholds;
use crate::error::ScanError;
use crate::reputation::{ReputationEvidence, ReputationOutcome};
use serde::{Serialize, Serializer};
use std::future::Future;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VerdictResult {
    Pass,
    Fail,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerdictSource {
    Reputation,
    Classifier,
}

impl VerdictSource {
    pub fn tag(&self) -> &'static str {
        match self {
            VerdictSource::Reputation => "VirusTotal",
            VerdictSource::Classifier => "AI Model",
        }
    }
}

impl Serialize for VerdictSource {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.tag())
    }
}

/// Why the classifier was consulted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Escalation {
    ReputationUnavailable(String),
    Inconclusive,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    pub result: VerdictResult,
    pub source: VerdictSource,
    /// Reputation counts that were consulted, if any
    pub reputation: Option<ReputationEvidence>,
    pub classifier: Option<ClassifierEvidence>,
    pub escalation: Option<Escalation>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Assessment {
    Decided(Verdict),
    NeedsClassifier {
        reputation: Option<ReputationEvidence>,
        escalation: Escalation,
    },
}

#[derive(Debug, Clone)]
pub struct DecisionMatrix {
    thresholds: Thresholds,
}

impl DecisionMatrix {
    pub fn new(thresholds: Thresholds) -> Self {
        Self { thresholds }
    }

    /// Apply the reputation rules only. Pure; no I/O.
    pub fn assess(&self, outcome: &ReputationOutcome) -> Assessment {
        let evidence = match outcome {
            ReputationOutcome::Unavailable(reason) => {
                return Assessment::NeedsClassifier {
                    reputation: None,
                    escalation: Escalation::ReputationUnavailable(reason.clone()),
                };
            }
            ReputationOutcome::Available(evidence) => evidence,
        };

        let t = &self.thresholds;
        let result = if evidence.malicious >= t.malicious || evidence.suspicious >= t.suspicious {
            VerdictResult::Fail
        } else if evidence.harmless >= t.harmless {
            VerdictResult::Pass
        } else {
            return Assessment::NeedsClassifier {
                reputation: Some(evidence.clone()),
                escalation: Escalation::Inconclusive,
            };
        };

        Assessment::Decided(Verdict {
            result,
            source: VerdictSource::Reputation,
            reputation: Some(evidence.clone()),
            classifier: None,
            escalation: None,
        })
    }

    pub fn from_classifier(
        &self,
        classifier: ClassifierEvidence,
        reputation: Option<ReputationEvidence>,
        escalation: Escalation,
    ) -> Verdict {
        let result = if classifier.is_malicious() {
            VerdictResult::Fail
        } else {
            VerdictResult::Pass
        };

        Verdict {
            result,
            source: VerdictSource::Classifier,
            reputation,
            classifier: Some(classifier),
            escalation: Some(escalation),
        }
    }

    /// Run the full matrix. `classify` is invoked at most once, and only when
    /// the reputation evidence does not decide on its own.
    pub async fn aggregate<F, Fut>(
        &self,
        outcome: ReputationOutcome,
        classify: F,
    ) -> Result<Verdict, ScanError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<ClassifierEvidence, ClassifierError>>,
    {
        match self.assess(&outcome) {
            Assessment::Decided(verdict) => {
                log::debug!("Reputation evidence decided: {:?}", verdict.result);
                Ok(verdict)
            }
            Assessment::NeedsClassifier {
                reputation,
                escalation,
            } => {
                log::info!("Escalating to classifier: {escalation:?}");
                match classify().await {
                    Ok(evidence) => Ok(self.from_classifier(evidence, reputation, escalation)),
                    Err(e) => {
                        let reason = match &escalation {
                            Escalation::ReputationUnavailable(why) => {
                                format!("reputation unavailable ({why}); classifier failed ({e})")
                            }
                            Escalation::Inconclusive => {
                                format!("reputation inconclusive; classifier failed ({e})")
                            }
                        };
                        Err(ScanError::BothSourcesFailed(reason))
                    }
                }
            }
        }
    }
}

impl Default for DecisionMatrix {
    fn default() -> Self {
        Self::new(Thresholds::default())
    }
}
