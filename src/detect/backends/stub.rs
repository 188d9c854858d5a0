use std::collections::HashMap;
use std::time::Duration;

use crate::detect::backend::{DetectorBackend, DetectorError};
use crate::detect::raw::RawFinding;
use crate::CategorySet;

/// Stub backend for tests and the demo.
///
/// Responses and failures are scripted per call index; unscripted calls
/// return no findings. An optional per-call delay simulates detection
/// latency so state-machine tests can observe a run in flight.
pub struct StubBackend {
    responses: HashMap<u64, Vec<RawFinding>>,
    failures: HashMap<u64, DetectorError>,
    fail_always: bool,
    delay: Option<Duration>,
    calls: u64,
}

impl StubBackend {
    pub fn new() -> Self {
        Self {
            responses: HashMap::new(),
            failures: HashMap::new(),
            fail_always: false,
            delay: None,
            calls: 0,
        }
    }

    /// Script findings for the n-th detect call (0-based).
    pub fn respond_at(mut self, call: u64, findings: Vec<RawFinding>) -> Self {
        self.responses.insert(call, findings);
        self
    }

    /// Script a transport failure for the n-th detect call (0-based).
    pub fn fail_at(mut self, call: u64, error: DetectorError) -> Self {
        self.failures.insert(call, error);
        self
    }

    /// Fail every call (service permanently down).
    pub fn always_fail(mut self) -> Self {
        self.fail_always = true;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> u64 {
        self.calls
    }
}

impl Default for StubBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl DetectorBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(
        &mut self,
        _image: &[u8],
        _categories: &CategorySet,
    ) -> Result<Vec<RawFinding>, DetectorError> {
        let call = self.calls;
        self.calls += 1;

        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        if self.fail_always {
            return Err(DetectorError::Unavailable("stub backend down".to_string()));
        }
        if let Some(error) = self.failures.get(&call) {
            return Err(error.clone());
        }
        Ok(self.responses.get(&call).cloned().unwrap_or_default())
    }
}
