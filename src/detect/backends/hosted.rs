//! Hosted detection backend.
//!
//! Talks to a remotely hosted vision model over HTTPS. Requires an API token
//! (env `FIELDSCAN_API_TOKEN` by convention, threaded in explicitly by the
//! caller); honors the shared wire boundary in `http`.

use std::time::Duration;

use anyhow::{anyhow, Result};
use url::Url;

use crate::detect::backend::{DetectorBackend, DetectorError};
use crate::detect::raw::{findings_from_body, RawFinding};
use crate::CategorySet;

use super::http;

pub struct HostedBackend {
    agent: ureq::Agent,
    endpoint: Url,
    token: String,
}

impl HostedBackend {
    pub fn new(endpoint: &str, token: &str, timeout: Duration) -> Result<Self> {
        let token = token.trim();
        if token.is_empty() {
            return Err(anyhow!("hosted detector requires a non-empty API token"));
        }
        Ok(Self {
            agent: http::build_agent(timeout),
            endpoint: http::parse_endpoint(endpoint)?,
            token: token.to_string(),
        })
    }
}

impl DetectorBackend for HostedBackend {
    fn name(&self) -> &'static str {
        "hosted"
    }

    fn detect(
        &mut self,
        image: &[u8],
        categories: &CategorySet,
    ) -> Result<Vec<RawFinding>, DetectorError> {
        let url = http::request_url(&self.endpoint, categories);
        let body = http::post_image(&self.agent, &url, Some(&self.token), image)?;
        Ok(findings_from_body(&body))
    }
}
