//! Rate-limit window tracking for the Airthings API.
//!
//! The API signals a rate limit with HTTP 429 plus a set of headers that
//! are not always trustworthy:
//!
//! - `X-RateLimit-Reset`: Unix timestamp when the window resets (preferred)
//! - `X-RateLimit-Retry-After`: seconds until reset, or an ISO-8601 timestamp.
//!   Frequently reported as `0` while still limited.
//! - `X-RateLimit-Remaining`: requests left, logged only
//!
//! A single deadline is tracked per collector. While it lies in the future
//! no upstream request is made at all.

use chrono::{DateTime, NaiveDateTime, TimeDelta, Utc};
use reqwest::header::HeaderMap;
use tracing::{error, info, warn};

use crate::error::CollectError;

/// Header carrying the reset time as a Unix timestamp.
pub const RESET_HEADER: &str = "x-ratelimit-reset";

/// Header carrying seconds (or a timestamp) until the window resets.
pub const RETRY_AFTER_HEADER: &str = "x-ratelimit-retry-after";

/// Header carrying the number of requests left in the window.
pub const REMAINING_HEADER: &str = "x-ratelimit-remaining";

/// Backoff applied when the headers give nothing usable (15 minutes).
pub const DEFAULT_BACKOFF_SECS: i64 = 15 * 60;

/// Which signal produced a deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeadlineSource {
    /// `X-RateLimit-Reset` Unix timestamp.
    Reset,
    /// Positive `X-RateLimit-Retry-After` seconds.
    RetryAfterSeconds,
    /// Non-positive `X-RateLimit-Retry-After`, replaced by the default backoff.
    RetryAfterBuggy,
    /// ISO-8601 `X-RateLimit-Retry-After` timestamp.
    RetryAfterTimestamp,
    /// No usable header.
    Default,
}

/// Outcome of checking the window at the start of a collection cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    /// No window was set.
    Open,
    /// A window was set but has expired; it has now been cleared.
    Reopened,
    /// Still inside the window.
    Blocked {
        until: DateTime<Utc>,
        remaining_secs: i64,
    },
}

/// Tracks the single "blocked until" deadline for a collector.
#[derive(Debug, Default)]
pub struct RateLimitTracker {
    blocked_until: Option<DateTime<Utc>>,
}

impl RateLimitTracker {
    /// Create a tracker with no active window.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current deadline, if any (expired or not).
    pub fn blocked_until(&self) -> Option<DateTime<Utc>> {
        self.blocked_until
    }

    /// Seconds left in the window at `now`, if it is still active.
    pub fn remaining_secs(&self, now: DateTime<Utc>) -> Option<i64> {
        self.blocked_until
            .filter(|until| now < *until)
            .map(|until| (until - now).num_seconds())
    }

    /// Check the window, clearing it if it has expired.
    pub fn gate(&mut self, now: DateTime<Utc>) -> Gate {
        match self.blocked_until {
            Some(until) if now < until => Gate::Blocked {
                until,
                remaining_secs: (until - now).num_seconds(),
            },
            Some(_) => {
                self.blocked_until = None;
                Gate::Reopened
            }
            None => Gate::Open,
        }
    }

    /// Record a 429 response and build the error to hand back to the caller.
    ///
    /// Always replaces the current window with the deadline derived from
    /// `headers`.
    pub fn trip(&mut self, headers: &HeaderMap, context: &str, now: DateTime<Utc>) -> CollectError {
        info!(
            context,
            remaining = header_value(headers, REMAINING_HEADER).unwrap_or("-"),
            reset = header_value(headers, RESET_HEADER).unwrap_or("-"),
            retry_after = header_value(headers, RETRY_AFTER_HEADER).unwrap_or("-"),
            "Rate limit headers received"
        );

        let (until, source) = deadline_from_headers(headers, now);
        self.blocked_until = Some(until);

        let remaining_secs = (until - now).num_seconds();
        error!(
            context,
            ?source,
            until = %until.format("%Y-%m-%d %H:%M:%S UTC"),
            "Rate limit hit, retrying in {}",
            format_remaining(remaining_secs)
        );

        CollectError::RateLimited {
            until,
            remaining_secs,
        }
    }
}

/// Compute the end of the rate-limit window from response headers.
///
/// Priority: `X-RateLimit-Reset`, then `X-RateLimit-Retry-After` (seconds,
/// then ISO-8601), then [`DEFAULT_BACKOFF_SECS`] from `now`.
pub fn deadline_from_headers(
    headers: &HeaderMap,
    now: DateTime<Utc>,
) -> (DateTime<Utc>, DeadlineSource) {
    if let Some(raw) = header_value(headers, RESET_HEADER) {
        match parse_unix_timestamp(raw) {
            Some(until) => return (until, DeadlineSource::Reset),
            None => error!(value = raw, "Could not parse X-RateLimit-Reset"),
        }
    }

    let Some(raw) = header_value(headers, RETRY_AFTER_HEADER) else {
        warn!("No usable rate limit headers, defaulting to 15 minutes");
        return (default_deadline(now), DeadlineSource::Default);
    };

    if let Ok(secs) = raw.parse::<i64>() {
        if secs <= 0 {
            warn!(
                value = secs,
                "X-RateLimit-Retry-After is not positive (buggy header), defaulting to 15 minutes"
            );
            return (default_deadline(now), DeadlineSource::RetryAfterBuggy);
        }

        return match TimeDelta::try_seconds(secs).and_then(|d| now.checked_add_signed(d)) {
            Some(until) => (until, DeadlineSource::RetryAfterSeconds),
            None => {
                error!(value = secs, "X-RateLimit-Retry-After out of range");
                (default_deadline(now), DeadlineSource::Default)
            }
        };
    }

    match parse_iso8601(raw) {
        Some(until) => (until, DeadlineSource::RetryAfterTimestamp),
        None => {
            error!(value = raw, "Could not parse X-RateLimit-Retry-After");
            (default_deadline(now), DeadlineSource::Default)
        }
    }
}

/// Render a number of seconds as "1h 5m", "3m 2s" or "45s".
pub fn format_remaining(secs: i64) -> String {
    let secs = secs.max(0);
    if secs >= 3600 {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    } else if secs >= 60 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}s", secs)
    }
}

fn default_deadline(now: DateTime<Utc>) -> DateTime<Utc> {
    now + TimeDelta::seconds(DEFAULT_BACKOFF_SECS)
}

/// Trimmed header value; empty or non-ASCII values count as absent.
fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

fn parse_unix_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    raw.parse::<i64>()
        .ok()
        .and_then(|ts| DateTime::from_timestamp(ts, 0))
}

/// RFC 3339 (`Z` or offset), or a naive timestamp taken as UTC.
fn parse_iso8601(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(at) = DateTime::parse_from_rfc3339(raw) {
        return Some(at.with_timezone(&Utc));
    }

    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    fn now() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_str(value).unwrap());
        }
        map
    }

    #[test]
    fn test_reset_header_wins() {
        for value in [0_i64, 1_700_000_600, 1_800_000_000, 1_600_000_000] {
            let h = headers(&[
                ("x-ratelimit-reset", &value.to_string()),
                ("x-ratelimit-retry-after", "30"),
            ]);
            let (until, source) = deadline_from_headers(&h, now());
            assert_eq!(source, DeadlineSource::Reset);
            assert_eq!(until.timestamp(), value);
        }
    }

    #[test]
    fn test_unparseable_reset_falls_back_to_retry_after() {
        let h = headers(&[
            ("x-ratelimit-reset", "soon"),
            ("x-ratelimit-retry-after", "120"),
        ]);
        let (until, source) = deadline_from_headers(&h, now());
        assert_eq!(source, DeadlineSource::RetryAfterSeconds);
        assert_eq!(until, now() + TimeDelta::seconds(120));
    }

    #[test]
    fn test_unparseable_reset_without_retry_after_defaults() {
        let h = headers(&[("x-ratelimit-reset", "soon")]);
        let (until, source) = deadline_from_headers(&h, now());
        assert_eq!(source, DeadlineSource::Default);
        assert_eq!(until, now() + TimeDelta::minutes(15));
    }

    #[test]
    fn test_buggy_retry_after_uses_fifteen_minutes() {
        for value in ["0", "-1", "-3600"] {
            let h = headers(&[("x-ratelimit-retry-after", value)]);
            let (until, source) = deadline_from_headers(&h, now());
            assert_eq!(source, DeadlineSource::RetryAfterBuggy);
            assert_eq!(until, now() + TimeDelta::minutes(15));
        }
    }

    #[test]
    fn test_retry_after_iso_timestamp() {
        let h = headers(&[("x-ratelimit-retry-after", "2023-11-14T22:30:00Z")]);
        let (until, source) = deadline_from_headers(&h, now());
        assert_eq!(source, DeadlineSource::RetryAfterTimestamp);
        assert_eq!(until.to_rfc3339(), "2023-11-14T22:30:00+00:00");

        let h = headers(&[("x-ratelimit-retry-after", "2023-11-14T22:30:00+01:00")]);
        let (until, _) = deadline_from_headers(&h, now());
        assert_eq!(until.to_rfc3339(), "2023-11-14T21:30:00+00:00");

        let h = headers(&[("x-ratelimit-retry-after", "2023-11-14T22:30:00.250")]);
        let (until, source) = deadline_from_headers(&h, now());
        assert_eq!(source, DeadlineSource::RetryAfterTimestamp);
        assert_eq!(until.timestamp(), 1_700_001_000);
    }

    #[test]
    fn test_retry_after_garbage_defaults() {
        let h = headers(&[("x-ratelimit-retry-after", "later please")]);
        let (until, source) = deadline_from_headers(&h, now());
        assert_eq!(source, DeadlineSource::Default);
        assert_eq!(until, now() + TimeDelta::minutes(15));
    }

    #[test]
    fn test_no_headers_defaults() {
        let (until, source) = deadline_from_headers(&HeaderMap::new(), now());
        assert_eq!(source, DeadlineSource::Default);
        assert_eq!(until, now() + TimeDelta::minutes(15));

        // Blank values are treated as missing
        let h = headers(&[("x-ratelimit-reset", " "), ("x-ratelimit-retry-after", "")]);
        let (_, source) = deadline_from_headers(&h, now());
        assert_eq!(source, DeadlineSource::Default);
    }

    #[test]
    fn test_trip_sets_window_and_returns_error() {
        let mut tracker = RateLimitTracker::new();
        let h = headers(&[("x-ratelimit-reset", "1700000600")]);

        let err = tracker.trip(&h, "device 1", now());
        match err {
            CollectError::RateLimited {
                until,
                remaining_secs,
            } => {
                assert_eq!(until.timestamp(), 1_700_000_600);
                assert_eq!(remaining_secs, 600);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(
            tracker.blocked_until().map(|t| t.timestamp()),
            Some(1_700_000_600)
        );
    }

    #[test]
    fn test_gate_blocks_then_reopens() {
        let mut tracker = RateLimitTracker::new();
        assert_eq!(tracker.gate(now()), Gate::Open);

        tracker.trip(&headers(&[("x-ratelimit-retry-after", "60")]), "auth token", now());

        let later = now() + TimeDelta::seconds(15);
        assert_eq!(
            tracker.gate(later),
            Gate::Blocked {
                until: now() + TimeDelta::seconds(60),
                remaining_secs: 45,
            }
        );
        assert_eq!(tracker.remaining_secs(later), Some(45));

        // Deadline reached exactly: window is over
        let deadline = now() + TimeDelta::seconds(60);
        assert_eq!(tracker.gate(deadline), Gate::Reopened);
        assert_eq!(tracker.blocked_until(), None);
        assert_eq!(tracker.gate(deadline), Gate::Open);
    }

    #[test]
    fn test_trip_replaces_existing_window() {
        let mut tracker = RateLimitTracker::new();
        tracker.trip(&headers(&[("x-ratelimit-retry-after", "60")]), "a", now());
        tracker.trip(&headers(&[("x-ratelimit-retry-after", "300")]), "b", now());

        assert_eq!(
            tracker.blocked_until(),
            Some(now() + TimeDelta::seconds(300))
        );
    }

    #[test]
    fn test_format_remaining() {
        assert_eq!(format_remaining(45), "45s");
        assert_eq!(format_remaining(182), "3m 2s");
        assert_eq!(format_remaining(3900), "1h 5m");
        assert_eq!(format_remaining(-3), "0s");
    }
}
