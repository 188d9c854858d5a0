use std::fmt;

use crate::CategorySet;

use super::raw::RawFinding;

/// Transport-level detector failure.
///
/// Both variants are retried by the gateway and, once retries are exhausted,
/// downgrade to an "undetermined" frame rather than aborting the scan.
#[derive(Clone, Debug)]
pub enum DetectorError {
    /// Network or service failure (connection refused, DNS, HTTP 5xx).
    Unavailable(String),
    /// The backend did not answer within the configured deadline.
    Timeout(String),
}

impl fmt::Display for DetectorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DetectorError::Unavailable(detail) => {
                write!(f, "detector unavailable: {}", detail)
            }
            DetectorError::Timeout(detail) => write!(f, "detector timed out: {}", detail),
        }
    }
}

impl std::error::Error for DetectorError {}

/// Detector backend trait.
///
/// Implementations send one encoded frame to a detection model and return its
/// findings without interpreting them. Validation and schema enforcement are
/// the normalizer's job, not the backend's:
/// - A response the backend cannot parse as structured findings is returned
///   as a raw-text finding, never as an error
/// - `DetectorError` is reserved for transport failures
pub trait DetectorBackend: Send {
    /// Backend identifier used in logs and configuration.
    fn name(&self) -> &'static str;

    /// Run detection on one JPEG-encoded frame.
    fn detect(
        &mut self,
        image: &[u8],
        categories: &CategorySet,
    ) -> Result<Vec<RawFinding>, DetectorError>;

    /// Optional warm-up hook (connection checks, model loading).
    fn warm_up(&mut self) -> Result<(), DetectorError> {
        Ok(())
    }
}
