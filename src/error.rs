//! Error taxonomy for the scan pipeline.
//!
//! Client-caused failures map to 400. Server-side failures are both evidence
//! sources being unusable, or a pipeline task dying underneath a request.
//! Reputation transport errors never show up here; the pipeline recovers from
//! them by asking the classifier.

use std::fmt;

/// Pipeline position an error originated at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Received,
    Decoded,
    Normalized,
    Resolved,
    Guarded,
    Evidenced,
    Verdicted,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Received => "received",
            Stage::Decoded => "decoded",
            Stage::Normalized => "normalized",
            Stage::Resolved => "resolved",
            Stage::Guarded => "guarded",
            Stage::Evidenced => "evidenced",
            Stage::Verdicted => "verdicted",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("Unsupported image type: {0}")]
    Unsupported(String),
    #[error("Could not read the uploaded image: {0}")]
    Corrupt(String),
    #[error("No QR code detected in the uploaded image.")]
    NotFound,
    #[error("Image too large: {0}")]
    TooLarge(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("Please provide a URL to scan.")]
    MissingInput,
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("Invalid URL format: {0}")]
    InvalidUrl(String),
    #[error("Invalid URL protocol: {scheme}. Only HTTP/HTTPS URLs allowed.")]
    DisallowedScheme { scheme: String, stage: Stage },
    #[error("URL points to a private network: {host}")]
    PrivateNetwork { host: String },
    #[error("Both scanners failed: {0}")]
    BothSourcesFailed(String),
    #[error("Internal error: {message}")]
    Internal { message: String, stage: Stage },
}

impl ScanError {
    pub fn stage(&self) -> Stage {
        match self {
            ScanError::MissingInput => Stage::Received,
            ScanError::Decode(_) => Stage::Decoded,
            ScanError::InvalidUrl(_) => Stage::Normalized,
            ScanError::DisallowedScheme { stage, .. } => *stage,
            ScanError::PrivateNetwork { .. } => Stage::Guarded,
            ScanError::BothSourcesFailed(_) => Stage::Verdicted,
            ScanError::Internal { stage, .. } => *stage,
        }
    }

    pub fn is_client_error(&self) -> bool {
        !matches!(
            self,
            ScanError::BothSourcesFailed(_) | ScanError::Internal { .. }
        )
    }

    pub fn status_code(&self) -> u16 {
        if self.is_client_error() {
            400
        } else {
            500
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(ScanError::Decode(DecodeError::NotFound).status_code(), 400);
        assert_eq!(ScanError::InvalidUrl("x".into()).status_code(), 400);
        assert_eq!(
            ScanError::PrivateNetwork {
                host: "10.0.0.1".into()
            }
            .status_code(),
            400
        );
        assert_eq!(
            ScanError::BothSourcesFailed("down".into()).status_code(),
            500
        );
        let internal = ScanError::Internal {
            message: "boom".into(),
            stage: Stage::Decoded,
        };
        assert_eq!(internal.status_code(), 500);
        assert_eq!(internal.stage(), Stage::Decoded);
    }

    #[test]
    fn test_stage_attribution() {
        let err = ScanError::DisallowedScheme {
            scheme: "ftp".into(),
            stage: Stage::Resolved,
        };
        assert_eq!(err.stage(), Stage::Resolved);
        assert_eq!(
            ScanError::Decode(DecodeError::Corrupt("bad".into())).stage(),
            Stage::Decoded
        );
        assert_eq!(err.stage().to_string(), "resolved");
    }
}
