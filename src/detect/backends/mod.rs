#[cfg(feature = "detect-http")]
mod hosted;
#[cfg(feature = "detect-http")]
mod http;
#[cfg(feature = "detect-http")]
mod local;
mod stub;

#[cfg(feature = "detect-http")]
pub use hosted::HostedBackend;
#[cfg(feature = "detect-http")]
pub use local::LocalBackend;
pub use stub::StubBackend;
