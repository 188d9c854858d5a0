//! Detection capability.
//!
//! The detector is an opaque, swappable capability behind a fixed contract:
//! a backend receives encoded image bytes plus the requested category set and
//! returns zero or more raw, untrusted findings. Callers are polymorphic over
//! the `DetectorBackend` trait and do not know which backend is active.
//!
//! A malformed response body is never a backend error; the raw text passes
//! through for the normalizer to make sense of. Network failures and
//! timeouts are typed errors handled by the retrying `DetectorGateway`.

mod backend;
mod backends;
mod gateway;
mod raw;

pub use backend::{DetectorBackend, DetectorError};
#[cfg(feature = "detect-http")]
pub use backends::{HostedBackend, LocalBackend};
pub use backends::StubBackend;
pub use gateway::{DetectOutcome, DetectorGateway};
pub use raw::{findings_from_body, RawFinding};
