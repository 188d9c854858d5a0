//! Locally served detection backend.
//!
//! Talks to a self-hosted model server on the local machine or network over
//! the same wire boundary as the hosted backend, with no authentication and
//! a longer deadline (local model servers pay a load cost on first call).

use std::time::Duration;

use anyhow::Result;
use url::Url;

use crate::detect::backend::{DetectorBackend, DetectorError};
use crate::detect::raw::{findings_from_body, RawFinding};
use crate::CategorySet;

use super::http;

pub struct LocalBackend {
    agent: ureq::Agent,
    endpoint: Url,
}

impl LocalBackend {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self> {
        Ok(Self {
            agent: http::build_agent(timeout),
            endpoint: http::parse_endpoint(endpoint)?,
        })
    }
}

impl DetectorBackend for LocalBackend {
    fn name(&self) -> &'static str {
        "local"
    }

    fn detect(
        &mut self,
        image: &[u8],
        categories: &CategorySet,
    ) -> Result<Vec<RawFinding>, DetectorError> {
        let url = http::request_url(&self.endpoint, categories);
        let body = http::post_image(&self.agent, &url, None, image)?;
        Ok(findings_from_body(&body))
    }

    fn warm_up(&mut self) -> Result<(), DetectorError> {
        // A zero-byte probe forces the server to load its model before the
        // first real frame; failures here are non-fatal and just logged by
        // the caller.
        let url = http::request_url(&self.endpoint, &CategorySet::all());
        http::post_image(&self.agent, &url, None, &[]).map(|_| ())
    }
}
