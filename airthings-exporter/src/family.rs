//! The gauge family produced by one collection cycle, and its text rendering.

use std::fmt::Write;

use crate::reading::SensorReading;

/// Family name used for the sensor gauges.
pub const FAMILY_NAME: &str = "airthings_gauge";

/// Help text for the sensor gauges.
pub const FAMILY_HELP: &str = "Airthings sensor values";

/// Label attached to every sample.
pub const DEVICE_LABEL: &str = "device_id";

/// One exported value.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    /// Metric name, e.g. `airthings_temperature_celsius`.
    pub name: String,
    /// Label key-value pairs; always contains `device_id`.
    pub labels: Vec<(String, String)>,
    pub value: f64,
}

impl Sample {
    /// Value of a label, if present.
    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// All samples of one scrape, under a single gauge descriptor.
///
/// Built fresh by every collection; an empty family still renders its
/// `HELP`/`TYPE` header.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricFamily {
    pub name: &'static str,
    pub help: &'static str,
    samples: Vec<Sample>,
    skipped: bool,
}

impl MetricFamily {
    /// Create an empty sensor family.
    pub fn new() -> Self {
        Self {
            name: FAMILY_NAME,
            help: FAMILY_HELP,
            samples: Vec::new(),
            skipped: false,
        }
    }

    /// Empty family for a cycle short-circuited by a rate-limit window.
    pub fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::new()
        }
    }

    /// Whether the cycle that built this family never went upstream.
    pub fn is_skipped(&self) -> bool {
        self.skipped
    }

    /// Append one sample per reported field of `reading`.
    ///
    /// Returns the number of samples added.
    pub fn add_reading(&mut self, device_id: &str, reading: &SensorReading) -> usize {
        for (kind, value) in reading.iter() {
            self.samples.push(Sample {
                name: kind.metric_name().to_string(),
                labels: vec![(DEVICE_LABEL.to_string(), device_id.to_string())],
                value,
            });
        }
        reading.len()
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Render in Prometheus text exposition format.
    pub fn render(&self) -> String {
        let mut output = String::with_capacity(64 + self.samples.len() * 96);

        writeln!(output, "# HELP {} {}", self.name, escape_help(self.help)).ok();
        writeln!(output, "# TYPE {} gauge", self.name).ok();

        for sample in &self.samples {
            writeln!(
                output,
                "{}{} {}",
                sample.name,
                format_labels(&sample.labels),
                format_value(sample.value)
            )
            .ok();
        }

        output
    }
}

impl Default for MetricFamily {
    fn default() -> Self {
        Self::new()
    }
}

/// Escape special characters in label values.
fn escape_label_value(value: &str) -> String {
    let mut result = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => result.push_str("\\\\"),
            '"' => result.push_str("\\\""),
            '\n' => result.push_str("\\n"),
            _ => result.push(c),
        }
    }
    result
}

fn escape_help(help: &str) -> String {
    help.replace('\\', "\\\\").replace('\n', "\\n")
}

/// Format a floating point value for Prometheus.
fn format_value(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value.is_infinite() {
        if value.is_sign_positive() {
            "+Inf".to_string()
        } else {
            "-Inf".to_string()
        }
    } else if value.fract() == 0.0 {
        format!("{:.1}", value)
    } else {
        format!("{}", value)
    }
}

fn format_labels(labels: &[(String, String)]) -> String {
    if labels.is_empty() {
        return String::new();
    }

    let parts: Vec<String> = labels
        .iter()
        .map(|(k, v)| format!("{}=\"{}\"", k, escape_label_value(v)))
        .collect();

    format!("{{{}}}", parts.join(","))
}
