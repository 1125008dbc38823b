//! Exporter self-metrics, appended to every successful scrape.

use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;

type OutcomeLabels = Vec<(String, String)>;

/// How a scrape of the metrics endpoint ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrapeOutcome {
    /// Fresh readings were collected.
    Success,
    /// An active rate-limit window short-circuited the collection.
    Skipped,
    /// The API started rate limiting during this scrape.
    RateLimited,
    /// Any other failure.
    Error,
}

impl ScrapeOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScrapeOutcome::Success => "success",
            ScrapeOutcome::Skipped => "skipped",
            ScrapeOutcome::RateLimited => "rate_limited",
            ScrapeOutcome::Error => "error",
        }
    }
}

/// Registry of exporter health metrics.
#[derive(Debug)]
pub struct ExporterStats {
    registry: Registry,
    scrapes: Family<OutcomeLabels, Counter>,
    rate_limited: Gauge,
    rate_limit_remaining: Gauge,
    samples: Gauge,
}

impl ExporterStats {
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let scrapes = Family::<OutcomeLabels, Counter>::default();
        registry.register(
            "airthings_exporter_scrapes",
            "Scrapes of the metrics endpoint by outcome",
            scrapes.clone(),
        );

        let rate_limited = Gauge::default();
        registry.register(
            "airthings_exporter_rate_limited",
            "Whether the Airthings API rate limit window is active (1) or not (0)",
            rate_limited.clone(),
        );

        let rate_limit_remaining = Gauge::default();
        registry.register(
            "airthings_exporter_rate_limit_remaining_seconds",
            "Seconds until the Airthings API rate limit window ends",
            rate_limit_remaining.clone(),
        );

        let samples = Gauge::default();
        registry.register(
            "airthings_exporter_samples",
            "Sensor samples produced by the last successful collection",
            samples.clone(),
        );

        Self {
            registry,
            scrapes,
            rate_limited,
            rate_limit_remaining,
            samples,
        }
    }

    /// Count a scrape.
    pub fn record_scrape(&self, outcome: ScrapeOutcome) {
        self.scrapes
            .get_or_create(&vec![("outcome".to_string(), outcome.as_str().to_string())])
            .inc();
    }

    /// Reflect the collector's rate-limit window.
    pub fn set_rate_limit(&self, remaining_secs: Option<i64>) {
        match remaining_secs {
            Some(secs) => {
                self.rate_limited.set(1);
                self.rate_limit_remaining.set(secs.max(0));
            }
            None => {
                self.rate_limited.set(0);
                self.rate_limit_remaining.set(0);
            }
        }
    }

    pub fn set_samples(&self, count: usize) {
        self.samples.set(count as i64);
    }

    /// Encode in text exposition format.
    pub fn encode(&self) -> Result<String, std::fmt::Error> {
        let mut buffer = String::new();
        encode(&mut buffer, &self.registry)?;
        Ok(buffer)
    }
}

impl Default for ExporterStats {
    fn default() -> Self {
        Self::new()
    }
}
