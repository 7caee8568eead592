//! Custom JSON decoder
//!
//! Parses the structured export produced by the gas analyzer's own software:
//!
//! ```json
//! {
//!     "dataMap": [[5, {"Flow": 25660, "O2_Flow": 1462, "HR": 121}], ...],
//!     "setup": {"name": "...", "weight": 53, "height": 170, "sex": "f", ...}
//! }
//! ```
//!
//! Gas flows are reported in mL/min; `Flow` is in mL and is converted to L.

use crate::error::IngestError;
use crate::types::{
    Gender, NormalizedSample, NormalizedSession, RowOutcome, SkipReason, SourceFormat,
    SubjectMetadata,
};
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use super::{file_name, has_extension, FormatDecoder};

/// Top-level key holding the `[time, metrics]` pairs
const DATA_KEY: &str = "dataMap";

/// Canonical field a JSON metric key maps to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JsonMetric {
    O2Flow,
    Co2Flow,
    /// Ventilation flow in mL, converted to L
    Flow,
    HeartRate,
    Power,
    Cadence,
    Rer,
    HeartRateVariability,
    Sd1,
    Sd2,
}

const METRIC_MAP: &[(&str, JsonMetric)] = &[
    ("O2_Flow", JsonMetric::O2Flow),
    ("CO2_Flow", JsonMetric::Co2Flow),
    ("Flow", JsonMetric::Flow),
    ("HR", JsonMetric::HeartRate),
    ("Power", JsonMetric::Power),
    ("Cadence", JsonMetric::Cadence),
    ("R", JsonMetric::Rer),
    ("HRvar", JsonMetric::HeartRateVariability),
    ("SD1", JsonMetric::Sd1),
    ("SD2", JsonMetric::Sd2),
];

impl JsonMetric {
    fn apply(self, sample: &mut NormalizedSample, value: f64) {
        match self {
            JsonMetric::O2Flow => sample.vo2_ml_min = Some(value),
            JsonMetric::Co2Flow => sample.vco2_ml_min = Some(value),
            JsonMetric::Flow => sample.ve_l_min = Some(value / 1000.0),
            JsonMetric::HeartRate => sample.hr_bpm = Some(value.trunc() as i32),
            JsonMetric::Power => sample.power_w = Some(value),
            JsonMetric::Cadence => sample.cadence_rpm = Some(value),
            JsonMetric::Rer => sample.rer = Some(value),
            JsonMetric::HeartRateVariability => sample.hrv_ms = Some(value.trunc() as i32),
            JsonMetric::Sd1 => sample.sd1_ms = Some(value),
            JsonMetric::Sd2 => sample.sd2_ms = Some(value),
        }
    }
}

/// Custom JSON decoder
pub struct DataMapJsonDecoder;

impl FormatDecoder for DataMapJsonDecoder {
    fn name(&self) -> &'static str {
        "JSON (dataMap)"
    }

    fn source_format(&self) -> SourceFormat {
        SourceFormat::CustomJson
    }

    fn can_decode(&self, path: &Path) -> bool {
        if !has_extension(path, "json") {
            return false;
        }
        match read_document(path) {
            Ok(document) => document.get(DATA_KEY).is_some(),
            Err(_) => false,
        }
    }

    fn decode(&self, path: &Path) -> Result<NormalizedSession, IngestError> {
        let document: DataMapDocument = serde_json::from_value(read_document(path)?)?;
        let mut session = NormalizedSession::new(self.source_format(), file_name(path));

        for (idx, entry) in document.data_map.iter().enumerate() {
            session.push_outcome(idx, decode_entry(entry));
        }

        let setup = match document.setup {
            Some(Value::Object(map)) => map,
            None => Map::new(),
            Some(other) => {
                tracing::warn!(
                    file = %session.source_file,
                    found = %other,
                    "ignoring setup block that is not an object"
                );
                Map::new()
            }
        };
        apply_setup(&mut session, &setup);

        if !session.skipped.is_empty() {
            tracing::warn!(
                file = %session.source_file,
                skipped = session.skipped.len(),
                "dropped malformed dataMap entries"
            );
        }
        tracing::debug!(
            file = %session.source_file,
            samples = session.samples.len(),
            "decoded dataMap JSON export"
        );

        Ok(session)
    }
}

/// The whole document has to be buffered: the data array and the setup block
/// can appear in either order.
fn read_document(path: &Path) -> Result<Value, IngestError> {
    let file = File::open(path)?;
    Ok(serde_json::from_reader(BufReader::new(file))?)
}

/// Decode one `[time, metrics]` entry
fn decode_entry(entry: &Value) -> RowOutcome {
    let Some([time, metrics]) = entry.as_array().map(Vec::as_slice) else {
        return RowOutcome::Skipped(SkipReason::MalformedEntry {
            detail: "expected a [time, metrics] pair".to_string(),
        });
    };
    let Some(metrics) = metrics.as_object() else {
        return RowOutcome::Skipped(SkipReason::MalformedEntry {
            detail: "metrics is not an object".to_string(),
        });
    };

    if time.is_null() {
        return RowOutcome::Skipped(SkipReason::MissingTime);
    }
    let Some(time_sec) = numeric_value(time) else {
        return RowOutcome::Skipped(SkipReason::MalformedNumber {
            column: "time".to_string(),
            value: time.to_string(),
        });
    };

    let mut sample = NormalizedSample::at(time_sec);
    for (key, metric) in METRIC_MAP {
        let Some(raw) = metrics.get(*key) else {
            continue;
        };
        if raw.is_null() {
            continue;
        }
        match numeric_value(raw) {
            Some(value) => metric.apply(&mut sample, value),
            None => {
                return RowOutcome::Skipped(SkipReason::MalformedNumber {
                    column: key.to_string(),
                    value: raw.to_string(),
                })
            }
        }
    }

    RowOutcome::Sample(sample)
}

/// Read subject and test metadata from the `setup` block.
///
/// Each key is read on its own: a value of the wrong type leaves only that
/// field absent.
fn apply_setup(session: &mut NormalizedSession, setup: &Map<String, Value>) {
    let file = session.source_file.clone();
    let present = |key: &str| setup.get(key).filter(|v| !v.is_null());
    let text = |key: &str| {
        let raw = present(key)?;
        let value = raw.as_str().map(str::to_string);
        if value.is_none() {
            tracing::warn!(file = %file, key, value = %raw, "ignoring malformed setup value");
        }
        value
    };
    let number = |key: &str| {
        let raw = present(key)?;
        let value = numeric_value(raw);
        if value.is_none() {
            tracing::warn!(file = %file, key, value = %raw, "ignoring malformed setup value");
        }
        value
    };

    session.subject = SubjectMetadata {
        name: text("name").filter(|n| !n.trim().is_empty()),
        weight_kg: number("weight"),
        height_cm: number("height"),
        gender: text("sex").as_deref().and_then(Gender::from_token),
        age: number("age")
            .filter(|a| *a >= 0.0 && *a <= f64::from(u32::MAX))
            .map(|a| a.trunc() as u32),
    };
    session.measurement_date = text("createTS").and_then(|ts| {
        let parsed = parse_timestamp(&ts);
        if parsed.is_none() {
            tracing::warn!(file = %file, timestamp = %ts, "unparseable measurement date");
        }
        parsed
    });
    session.test_id = present("testID").and_then(|id| match id {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    });
    session.comment = text("comment");
}

/// Finite numbers, or strings holding one
fn numeric_value(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    number.filter(|n| n.is_finite())
}

/// Parse an ISO-8601 timestamp.
///
/// A trailing `Z` is rewritten to `+00:00`. Timestamps without an offset,
/// and bare dates, are taken as UTC.
pub(crate) fn parse_timestamp(ts: &str) -> Option<DateTime<FixedOffset>> {
    let ts = ts.trim();
    let normalized = match ts.strip_suffix('Z') {
        Some(stripped) => format!("{stripped}+00:00"),
        None => ts.to_string(),
    };

    if let Ok(dt) = DateTime::parse_from_rfc3339(&normalized) {
        return Some(dt);
    }
    if let Ok(dt) = DateTime::parse_from_str(&normalized, "%Y-%m-%dT%H:%M:%S%.f%:z") {
        return Some(dt);
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(&normalized, format) {
            return Some(naive.and_utc().into());
        }
    }
    NaiveDate::parse_from_str(&normalized, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc().into())
}

// Export document structures

#[derive(Debug, Deserialize)]
struct DataMapDocument {
    #[serde(rename = "dataMap", default)]
    data_map: Vec<Value>,
    #[serde(default)]
    setup: Option<Value>,
}
