pub mod classifier;
pub mod config;
pub mod error;
pub mod network_guard;
pub mod normalizer;
pub mod pipeline;
pub mod qr_decoder;
pub mod reputation;
pub mod server;
pub mod url_resolver;
pub mod verdict;

pub use config::Config;
pub use error::{DecodeError, ScanError, Stage};
pub use pipeline::{QrReport, ScanEngine, ScanOutcome, ScanReport};
pub use verdict::{DecisionMatrix, Verdict, VerdictResult, VerdictSource};
