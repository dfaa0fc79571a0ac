//! Failure taxonomy for the scan pipeline.
//!
//! Only the variants here abort a request. Extraction failures stay local to
//! one candidate element (`Option`), and enrichment failures stay local to one
//! ad (error markers on the record) — neither ever becomes a typed error.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("Invalid API key")]
    Unauthorized,

    #[error("Browser connection failed after {attempts} attempts: {message}")]
    Connection { attempts: u32, message: String },

    /// Fatal navigation before any results page was processed. Failures after
    /// the first page degrade to partial results instead of surfacing here.
    #[error("Navigation failed: {0}")]
    Navigation(String),
}
