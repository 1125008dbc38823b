//! Collector that polls the Airthings cloud API on every scrape.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, RequestBuilder, StatusCode, Url};
use serde::Deserialize;
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::{AirthingsConfig, ConfigError};
use crate::error::{CollectError, Result};
use crate::family::MetricFamily;
use crate::ratelimit::{Gate, RateLimitTracker, format_remaining};
use crate::reading::SensorReading;

/// OAuth client credentials.
#[derive(Clone)]
pub struct Credentials {
    pub client_id: String,
    pub client_secret: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

/// Collector statistics.
#[derive(Debug, Clone, Default)]
pub struct CollectorStats {
    /// Collection cycles that went upstream.
    pub collections: u64,
    /// Cycles short-circuited by an active rate-limit window.
    pub skipped_rate_limited: u64,
    /// HTTP requests sent to the API.
    pub upstream_requests: u64,
    /// 429 responses received.
    pub rate_limit_hits: u64,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Deserialize)]
struct LatestSamplesResponse {
    data: Map<String, Value>,
}

/// Polls the Airthings API and maps readings into a [`MetricFamily`].
///
/// Not meant to run concurrently with itself; share it as a
/// [`SharedCollector`] so collection cycles are serialized.
pub struct SensorCollector {
    client: Client,
    credentials: Credentials,
    device_ids: Arc<[String]>,
    token_url: String,
    api_base_url: Url,
    scope: String,
    rate_limit: RateLimitTracker,
    clock: Arc<dyn Clock>,
    stats: CollectorStats,
}

/// Collector handle shared with the HTTP server.
pub type SharedCollector = Arc<Mutex<SensorCollector>>;

impl SensorCollector {
    /// Create a collector using the system clock.
    pub fn new(config: &AirthingsConfig) -> std::result::Result<Self, ConfigError> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create a collector with an explicit time source.
    pub fn with_clock(
        config: &AirthingsConfig,
        clock: Arc<dyn Clock>,
    ) -> std::result::Result<Self, ConfigError> {
        let api_base_url = config.base_url()?;
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .user_agent(concat!("airthings-exporter/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            credentials: Credentials {
                client_id: config.client_id.clone(),
                client_secret: config.client_secret.clone(),
            },
            device_ids: Arc::from(config.device_ids.clone()),
            token_url: config.token_url.clone(),
            api_base_url,
            scope: config.scope.clone(),
            rate_limit: RateLimitTracker::new(),
            clock,
            stats: CollectorStats::default(),
        })
    }

    /// Wrap into a [`SharedCollector`].
    pub fn into_shared(self) -> SharedCollector {
        Arc::new(Mutex::new(self))
    }

    pub fn device_ids(&self) -> &[String] {
        &self.device_ids
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// Get collector statistics.
    pub fn stats(&self) -> CollectorStats {
        self.stats.clone()
    }

    pub fn rate_limit(&self) -> &RateLimitTracker {
        &self.rate_limit
    }

    #[cfg(test)]
    pub(crate) fn rate_limit_mut(&mut self) -> &mut RateLimitTracker {
        &mut self.rate_limit
    }

    /// Seconds left in the rate-limit window, if one is active now.
    pub fn rate_limit_remaining(&self) -> Option<i64> {
        self.rate_limit.remaining_secs(self.clock.now())
    }

    /// Run one collection cycle.
    ///
    /// Inside an active rate-limit window this returns an empty family,
    /// marked as skipped, without touching the network. A 429 on any request sets the window
    /// and aborts the cycle with [`CollectError::RateLimited`].
    pub async fn collect(&mut self) -> Result<MetricFamily> {
        match self.rate_limit.gate(self.clock.now()) {
            Gate::Blocked {
                until,
                remaining_secs,
            } => {
                self.stats.skipped_rate_limited += 1;
                warn!(
                    until = %until.format("%Y-%m-%d %H:%M:%S UTC"),
                    "Rate limited, skipping collection (retry in {})",
                    format_remaining(remaining_secs)
                );
                return Ok(MetricFamily::skipped());
            }
            Gate::Reopened => info!("Rate limit window expired, resuming normal operation"),
            Gate::Open => {}
        }

        self.stats.collections += 1;

        let token = self.fetch_access_token().await?;

        let mut family = MetricFamily::new();
        let device_ids = Arc::clone(&self.device_ids);
        for device_id in device_ids.iter() {
            let reading = self.fetch_latest_samples(&token, device_id).await?;
            let added = family.add_reading(device_id, &reading);
            debug!(device_id = %device_id, samples = added, "Device samples collected");
        }

        debug!(
            devices = device_ids.len(),
            samples = family.len(),
            "Collection complete"
        );
        Ok(family)
    }

    async fn fetch_access_token(&mut self) -> Result<String> {
        const CONTEXT: &str = "auth token";

        let form = [
            ("grant_type", "client_credentials"),
            ("client_id", self.credentials.client_id.as_str()),
            ("client_secret", self.credentials.client_secret.as_str()),
            ("scope", self.scope.as_str()),
        ];
        let request = self.client.post(&self.token_url).form(&form);

        let body = self.send(request, CONTEXT).await?;
        let response: TokenResponse = serde_json::from_str(&body)
            .map_err(|e| CollectError::malformed(CONTEXT, e.to_string()))?;

        if response.access_token.is_empty() {
            return Err(CollectError::malformed(CONTEXT, "empty access_token"));
        }

        Ok(response.access_token)
    }

    async fn fetch_latest_samples(&mut self, token: &str, device_id: &str) -> Result<SensorReading> {
        let context = format!("device {}", device_id);
        let url = self.latest_samples_url(device_id);
        let request = self.client.get(url).bearer_auth(token);

        let body = self.send(request, &context).await?;
        let response: LatestSamplesResponse = serde_json::from_str(&body).map_err(|e| {
            warn!(device_id, body = %body, "Unexpected API response");
            CollectError::malformed(&context, e.to_string())
        })?;

        Ok(SensorReading::from_json(&response.data))
    }

    /// `{base}/devices/{device_id}/latest-samples`, with the id escaped as
    /// a single path segment.
    fn latest_samples_url(&self, device_id: &str) -> Url {
        let mut url = self.api_base_url.clone();
        // Base URLs that cannot carry a path are rejected by `base_url()`.
        if let Ok(mut segments) = url.path_segments_mut() {
            segments
                .pop_if_empty()
                .extend(["devices", device_id, "latest-samples"]);
        }
        url
    }

    /// Send a request and return the body of a 2xx response.
    async fn send(&mut self, request: RequestBuilder, context: &str) -> Result<String> {
        self.stats.upstream_requests += 1;

        let response = request
            .send()
            .await
            .map_err(|e| CollectError::transport(context, e))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            self.stats.rate_limit_hits += 1;
            return Err(self
                .rate_limit
                .trip(response.headers(), context, self.clock.now()));
        }

        if !status.is_success() {
            warn!(context, %status, "Upstream request failed");
            return Err(CollectError::status(context, status));
        }

        response
            .text()
            .await
            .map_err(|e| CollectError::transport(context, e))
    }
}
