//! Mapping from Airthings sample fields to Prometheus metric names.

use serde_json::{Map, Value};
use tracing::warn;

/// A sensor field reported by the `latest-samples` endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SensorKind {
    Battery,
    Co2,
    Humidity,
    Pm1,
    Pm25,
    Pressure,
    RadonShortTermAvg,
    Temp,
    Voc,
}

impl SensorKind {
    /// Every recognised field, in exposition order.
    pub const ALL: [SensorKind; 9] = [
        SensorKind::Battery,
        SensorKind::Co2,
        SensorKind::Humidity,
        SensorKind::Pm1,
        SensorKind::Pm25,
        SensorKind::Pressure,
        SensorKind::RadonShortTermAvg,
        SensorKind::Temp,
        SensorKind::Voc,
    ];

    /// Field name in the API's `data` object.
    pub fn api_key(&self) -> &'static str {
        match self {
            SensorKind::Battery => "battery",
            SensorKind::Co2 => "co2",
            SensorKind::Humidity => "humidity",
            SensorKind::Pm1 => "pm1",
            SensorKind::Pm25 => "pm25",
            SensorKind::Pressure => "pressure",
            SensorKind::RadonShortTermAvg => "radonShortTermAvg",
            SensorKind::Temp => "temp",
            SensorKind::Voc => "voc",
        }
    }

    /// Exported metric name.
    pub fn metric_name(&self) -> &'static str {
        match self {
            SensorKind::Battery => "airthings_battery_percent",
            SensorKind::Co2 => "airthings_co2_parts_per_million",
            SensorKind::Humidity => "airthings_humidity_percent",
            SensorKind::Pm1 => "airthings_pm1_micrograms_per_cubic_meter",
            SensorKind::Pm25 => "airthings_pm25_micrograms_per_cubic_meter",
            SensorKind::Pressure => "airthings_pressure_hectopascals",
            SensorKind::RadonShortTermAvg => {
                "airthings_radon_short_term_average_becquerels_per_cubic_meter"
            }
            SensorKind::Temp => "airthings_temperature_celsius",
            SensorKind::Voc => "airthings_voc_parts_per_billion",
        }
    }
}

/// Values a single device reported, keyed by [`SensorKind`].
///
/// Fields the device did not report are simply absent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SensorReading {
    values: Vec<(SensorKind, f64)>,
}

impl SensorReading {
    /// Extract recognised numeric fields from a `data` object.
    ///
    /// Unknown keys are ignored. Numbers and numeric strings are coerced to
    /// `f64`; a recognised key with any other value is skipped with a warning.
    pub fn from_json(data: &Map<String, Value>) -> Self {
        let values = SensorKind::ALL
            .iter()
            .filter_map(|kind| {
                let raw = data.get(kind.api_key())?;
                match numeric_value(raw) {
                    Some(value) => Some((*kind, value)),
                    None => {
                        warn!(
                            field = kind.api_key(),
                            value = %raw,
                            "Ignoring non-numeric sensor value"
                        );
                        None
                    }
                }
            })
            .collect();

        Self { values }
    }

    /// Value for a field, if reported.
    pub fn get(&self, kind: SensorKind) -> Option<f64> {
        self.values
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, v)| *v)
    }

    /// Reported fields in exposition order.
    pub fn iter(&self) -> impl Iterator<Item = (SensorKind, f64)> + '_ {
        self.values.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// JSON number, or a string holding one (e.g. `"150"`).
fn numeric_value(raw: &Value) -> Option<f64> {
    raw.as_f64()
        .or_else(|| raw.as_str().and_then(|s| s.trim().parse::<f64>().ok()))
}
