//! Retrying detector gateway.
//!
//! Wraps a backend with the failure-recovery discipline: transport failures
//! are retried a bounded number of times with exponential backoff and random
//! jitter, then downgraded to an "undetermined" outcome so the scan can
//! continue. The gateway never surfaces a transport error to the caller.

use rand::Rng;
use std::time::Duration;

use crate::config::RetryPolicy;
use crate::CategorySet;

use super::backend::{DetectorBackend, DetectorError};
use super::raw::RawFinding;

/// Terminal outcome of one frame's detection call.
#[derive(Clone, Debug)]
pub enum DetectOutcome {
    Findings(Vec<RawFinding>),
    /// All retries failed; the frame is recorded as undetermined.
    Undetermined { attempts: u32, reason: String },
}

pub struct DetectorGateway {
    backend: Box<dyn DetectorBackend>,
    retry: RetryPolicy,
}

impl DetectorGateway {
    pub fn new(backend: Box<dyn DetectorBackend>, retry: RetryPolicy) -> Self {
        Self { backend, retry }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn warm_up(&mut self) -> Result<(), DetectorError> {
        self.backend.warm_up()
    }

    /// Detect with bounded retry. Calls are sequential; one frame in flight.
    pub fn detect(&mut self, image: &[u8], categories: &CategorySet) -> DetectOutcome {
        let attempts = self.retry.attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            match self.backend.detect(image, categories) {
                Ok(findings) => return DetectOutcome::Findings(findings),
                Err(err @ (DetectorError::Unavailable(_) | DetectorError::Timeout(_))) => {
                    log::warn!(
                        "detector '{}' attempt {}/{} failed: {}",
                        self.backend.name(),
                        attempt,
                        attempts,
                        err
                    );
                    last_error = err.to_string();
                    if attempt < attempts {
                        std::thread::sleep(self.backoff_delay(attempt));
                    }
                }
            }
        }

        DetectOutcome::Undetermined {
            attempts,
            reason: last_error,
        }
    }

    /// Exponential backoff with random jitter: `base * 2^(attempt-1) + jitter`.
    fn backoff_delay(&self, attempt: u32) -> Duration {
        let base_ms = self.retry.base_delay_ms.max(1);
        let backoff_ms = base_ms.saturating_mul(1u64 << (attempt - 1).min(8));
        let jitter_ms = rand::thread_rng().gen_range(0..=base_ms / 2 + 1);
        Duration::from_millis(backoff_ms.saturating_add(jitter_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::StubBackend;
    use crate::CategorySet;
    use serde_json::json;

    fn finding(category: &str, confidence: f64) -> RawFinding {
        RawFinding {
            category: Some(category.to_string()),
            confidence: Some(json!(confidence)),
            ..RawFinding::default()
        }
    }

    #[test]
    fn passes_findings_through() {
        let backend = StubBackend::new().respond_at(0, vec![finding("weed", 0.9)]);
        let mut gateway = DetectorGateway::new(Box::new(backend), RetryPolicy::for_tests());
        match gateway.detect(&[0u8; 4], &CategorySet::all()) {
            DetectOutcome::Findings(findings) => {
                assert_eq!(findings.len(), 1);
                assert_eq!(findings[0].category.as_deref(), Some("weed"));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[test]
    fn retries_then_succeeds() {
        let backend = StubBackend::new()
            .fail_at(0, DetectorError::Unavailable("connection refused".into()))
            .respond_at(1, vec![finding("animal", 0.95)]);
        let mut gateway = DetectorGateway::new(Box::new(backend), RetryPolicy::for_tests());
        match gateway.detect(&[0u8; 4], &CategorySet::all()) {
            DetectOutcome::Findings(findings) => assert_eq!(findings.len(), 1),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[test]
    fn exhausted_retries_become_undetermined() {
        let backend = StubBackend::new().always_fail();
        let mut gateway = DetectorGateway::new(Box::new(backend), RetryPolicy::for_tests());
        match gateway.detect(&[0u8; 4], &CategorySet::all()) {
            DetectOutcome::Undetermined { attempts, reason } => {
                assert_eq!(attempts, RetryPolicy::for_tests().attempts);
                assert!(reason.contains("unavailable"));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[test]
    fn timeouts_are_retried_like_unavailability() {
        let backend = StubBackend::new()
            .fail_at(0, DetectorError::Timeout("deadline exceeded".into()))
            .respond_at(1, vec![]);
        let mut gateway = DetectorGateway::new(Box::new(backend), RetryPolicy::for_tests());
        match gateway.detect(&[0u8; 4], &CategorySet::all()) {
            DetectOutcome::Findings(findings) => assert!(findings.is_empty()),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }
}
