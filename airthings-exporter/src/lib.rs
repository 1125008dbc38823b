//! Prometheus exporter for Airthings cloud sensor readings.
//!
//! Every scrape of `/metrics` triggers one collection cycle against the
//! Airthings API: fetch an access token, fetch the latest samples of each
//! configured device, and map the readings onto a fixed set of gauges.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌─────────────────┐     ┌─────────────────┐
//! │  Airthings API  │<────│ SensorCollector │<────│   HTTP Server   │
//! │ (token, samples)│     │ (+ rate limits) │     │   (/metrics)    │
//! └─────────────────┘     └─────────────────┘     └─────────────────┘
//! ```
//!
//! When the API answers 429 the collector records a "blocked until"
//! deadline from the rate-limit headers. That scrape fails with 429; later
//! scrapes return an empty gauge family without calling the API until the
//! deadline passes.
//!
//! # Usage
//!
//! ```bash
//! airthings-exporter --client-id ID --client-secret SECRET --device-id 2960000001
//! airthings-exporter --config config.json5
//! ```
//!
//! # Configuration
//!
//! See [`config::ExporterConfig`] for configuration options.

pub mod clock;
pub mod collector;
pub mod config;
pub mod error;
pub mod family;
pub mod http;
pub mod ratelimit;
pub mod reading;
pub mod stats;

pub use collector::{SensorCollector, SharedCollector};
pub use config::ExporterConfig;
pub use error::CollectError;
pub use family::MetricFamily;
pub use http::HttpServer;
pub use ratelimit::RateLimitTracker;
pub use stats::ExporterStats;
