//! Shared HTTP plumbing for the hosted and local detector backends.
//!
//! Both backends satisfy the same wire boundary: a POST whose body is the
//! JPEG-encoded frame, with the requested category set and its directive
//! text in the query string, answered by zero or more findings in a lenient
//! JSON shape (or free text, which passes through to the normalizer).

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use url::Url;

use crate::detect::backend::DetectorError;
use crate::CategorySet;

pub(super) fn build_agent(timeout: Duration) -> ureq::Agent {
    ureq::AgentBuilder::new()
        .timeout_connect(timeout.min(Duration::from_secs(10)))
        .timeout(timeout)
        .build()
}

/// Validate and normalize a backend endpoint at construction time.
pub(super) fn parse_endpoint(endpoint: &str) -> Result<Url> {
    let url = Url::parse(endpoint)
        .with_context(|| format!("invalid detector endpoint '{}'", endpoint))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(anyhow!(
            "unsupported detector endpoint scheme '{}'; expected http(s)",
            other
        )),
    }
}

/// Request URL for one detect call: endpoint plus category parameters.
pub(super) fn request_url(endpoint: &Url, categories: &CategorySet) -> Url {
    let mut url = endpoint.clone();
    url.query_pairs_mut()
        .append_pair("categories", &categories.query_value())
        .append_pair("directives", &categories.directive_text());
    url
}

/// POST the frame and return the raw response body.
pub(super) fn post_image(
    agent: &ureq::Agent,
    url: &Url,
    bearer_token: Option<&str>,
    image: &[u8],
) -> Result<String, DetectorError> {
    let mut request = agent
        .post(url.as_str())
        .set("Content-Type", "image/jpeg")
        .set("Accept", "application/json");
    if let Some(token) = bearer_token {
        request = request.set("Authorization", &format!("Bearer {}", token));
    }

    let response = request.send_bytes(image).map_err(classify_error)?;
    response
        .into_string()
        .map_err(|e| DetectorError::Unavailable(format!("failed to read response body: {}", e)))
}

/// Map transport-layer failures onto the detector error taxonomy.
///
/// Agent deadline overruns surface as io transport errors; everything else
/// (DNS, refused connections, TLS, HTTP error statuses) is unavailability.
fn classify_error(err: ureq::Error) -> DetectorError {
    match err {
        ureq::Error::Status(code, _) => {
            DetectorError::Unavailable(format!("backend returned HTTP {}", code))
        }
        ureq::Error::Transport(transport) => {
            if transport.kind() == ureq::ErrorKind::Io {
                DetectorError::Timeout(transport.to_string())
            } else {
                DetectorError::Unavailable(transport.to_string())
            }
        }
    }
}
