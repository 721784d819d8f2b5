//! `HealthProbe` trait — a single liveness check against the backend.
//!
//! A probe never returns an error: transport failures, bad status codes
//! and timeouts all come back as [`ProbeOutcome::Unhealthy`] with a short
//! cause that the monitor keeps as its last error.

pub mod http;

use async_trait::async_trait;

pub use http::HttpProbe;

/// Result of one health check.
#[derive(Debug, Clone, PartialEq)]
pub enum ProbeOutcome {
    Healthy,
    /// The check failed; the string describes why.
    Unhealthy(String),
}

impl ProbeOutcome {
    pub fn unhealthy(cause: impl Into<String>) -> Self {
        Self::Unhealthy(cause.into())
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self, Self::Healthy)
    }
}

/// Abstraction over health check transports.
///
/// Implementations issue exactly one request per call and do not retry;
/// retry policy belongs to the monitor.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn probe(&self) -> ProbeOutcome;

    /// Endpoint description for logs, e.g. `"GET http://localhost/health"`.
    fn target(&self) -> String;
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Compile-time verification that `HealthProbe` is object-safe.
    #[test]
    fn test_health_probe_is_object_safe() {
        fn _assert_object_safe(_: &dyn HealthProbe) {}
    }

    #[test]
    fn test_outcome_is_healthy() {
        assert!(ProbeOutcome::Healthy.is_healthy());
        assert!(!ProbeOutcome::unhealthy("connection refused").is_healthy());
    }
}
