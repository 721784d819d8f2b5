//! HTTP health probe: `GET <url>`, any 2xx within the timeout is healthy.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use super::{HealthProbe, ProbeOutcome};
use crate::config::HealthConfig;

/// User-Agent header sent with health checks.
const USER_AGENT: &str = concat!("connwatch/", env!("CARGO_PKG_VERSION"));

pub struct HttpProbe {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl HttpProbe {
    pub fn new(url: impl Into<String>, timeout: Duration, connect_timeout: Duration) -> Self {
        // No redirects: a health endpoint that redirects is misconfigured
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(connect_timeout.min(timeout))
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            url: url.into(),
            timeout,
        }
    }

    pub fn from_config(config: &HealthConfig) -> Self {
        Self::new(&config.url, config.timeout(), config.connect_timeout())
    }
}

/// Maps a reqwest error to a short cause string.
fn describe_error(err: &reqwest::Error, timeout: Duration) -> String {
    if err.is_timeout() {
        format!("health check timed out after {}ms", timeout.as_millis())
    } else if err.is_connect() {
        format!("connection failed: {err}")
    } else {
        format!("request failed: {err}")
    }
}

#[async_trait]
impl HealthProbe for HttpProbe {
    async fn probe(&self) -> ProbeOutcome {
        let response = match self.client.get(&self.url).send().await {
            Ok(response) => response,
            Err(e) => return ProbeOutcome::unhealthy(describe_error(&e, self.timeout)),
        };

        let status = response.status();
        debug!("Health check {} -> {status}", self.url);
        if status.is_success() {
            ProbeOutcome::Healthy
        } else {
            ProbeOutcome::unhealthy(format!("health endpoint returned {status}"))
        }
    }

    fn target(&self) -> String {
        format!("GET {}", self.url)
    }
}
