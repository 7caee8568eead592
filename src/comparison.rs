//! Cross-session comparison
//!
//! Aligns several sessions of one subject by power level and computes how
//! peak values moved between consecutive tests. Pure read-only aggregation:
//! the same inputs always give the same tables.

use crate::error::IngestError;
use crate::store::{StoredSample, StoredSession};
use crate::types::TestType;
use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Default column label, e.g. "04 Aug"
pub const DEFAULT_LABEL_FORMAT: &str = "%d %b";

/// Sample field a comparison table is built over
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Metric {
    #[serde(rename = "hr")]
    HeartRate,
    #[serde(rename = "vo2_ml_kg_min")]
    Vo2PerKg,
    #[serde(rename = "vo2_ml_min")]
    Vo2,
    #[serde(rename = "vco2_ml_min")]
    Vco2,
    #[serde(rename = "power")]
    Power,
    #[serde(rename = "rf")]
    RespiratoryFrequency,
    #[serde(rename = "tv")]
    TidalVolume,
    #[serde(rename = "ve")]
    Ventilation,
    #[serde(rename = "rpm")]
    Cadence,
    #[serde(rename = "ve_vo2")]
    VeVo2,
    #[serde(rename = "feo2")]
    Feo2,
    #[serde(rename = "r")]
    Rer,
    #[serde(rename = "hrv")]
    HeartRateVariability,
    #[serde(rename = "sd1")]
    Sd1,
    #[serde(rename = "sd2")]
    Sd2,
    #[serde(rename = "lactat")]
    Lactate,
    #[serde(rename = "temp")]
    Temperature,
    #[serde(rename = "hum")]
    Humidity,
}

impl Metric {
    pub const ALL: [Metric; 18] = [
        Metric::HeartRate,
        Metric::Vo2PerKg,
        Metric::Vo2,
        Metric::Vco2,
        Metric::Power,
        Metric::RespiratoryFrequency,
        Metric::TidalVolume,
        Metric::Ventilation,
        Metric::Cadence,
        Metric::VeVo2,
        Metric::Feo2,
        Metric::Rer,
        Metric::HeartRateVariability,
        Metric::Sd1,
        Metric::Sd2,
        Metric::Lactate,
        Metric::Temperature,
        Metric::Humidity,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::HeartRate => "hr",
            Metric::Vo2PerKg => "vo2_ml_kg_min",
            Metric::Vo2 => "vo2_ml_min",
            Metric::Vco2 => "vco2_ml_min",
            Metric::Power => "power",
            Metric::RespiratoryFrequency => "rf",
            Metric::TidalVolume => "tv",
            Metric::Ventilation => "ve",
            Metric::Cadence => "rpm",
            Metric::VeVo2 => "ve_vo2",
            Metric::Feo2 => "feo2",
            Metric::Rer => "r",
            Metric::HeartRateVariability => "hrv",
            Metric::Sd1 => "sd1",
            Metric::Sd2 => "sd2",
            Metric::Lactate => "lactat",
            Metric::Temperature => "temp",
            Metric::Humidity => "hum",
        }
    }

    /// Read this metric from a stored sample
    pub fn value(&self, stored: &StoredSample) -> Option<f64> {
        let s = &stored.sample;
        match self {
            Metric::HeartRate => s.hr_bpm.map(f64::from),
            Metric::Vo2PerKg => s.vo2_ml_kg_min,
            Metric::Vo2 => s.vo2_ml_min,
            Metric::Vco2 => s.vco2_ml_min,
            Metric::Power => s.power_w,
            Metric::RespiratoryFrequency => s.rf_bpm,
            Metric::TidalVolume => s.tv_l,
            Metric::Ventilation => s.ve_l_min,
            Metric::Cadence => s.cadence_rpm,
            Metric::VeVo2 => s.ve_vo2,
            Metric::Feo2 => s.feo2_pct,
            Metric::Rer => s.rer,
            Metric::HeartRateVariability => s.hrv_ms.map(f64::from),
            Metric::Sd1 => s.sd1_ms,
            Metric::Sd2 => s.sd2_ms,
            Metric::Lactate => stored.lactate_mmol_l,
            Metric::Temperature => s.temperature_c,
            Metric::Humidity => s.humidity_pct,
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Metric {
    type Err = IngestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Metric::ALL
            .iter()
            .find(|m| m.as_str() == s)
            .copied()
            .ok_or_else(|| IngestError::UnknownMetric(s.to_string()))
    }
}

/// One session column of a comparison table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonColumn {
    pub session_id: Uuid,
    pub date: DateTime<FixedOffset>,
    pub test_type: TestType,
    pub label: String,
}

/// One power level of a comparison table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonRow {
    pub power: i32,
    /// Averaged metric per session; `None` when the session has no value
    /// at this power
    pub values: BTreeMap<Uuid, Option<f64>>,
}

impl ComparisonRow {
    pub fn value(&self, session_id: Uuid) -> Option<f64> {
        self.values.get(&session_id).copied().flatten()
    }
}

/// Sessions side by side, aligned on power
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonTable {
    pub metric: Metric,
    pub columns: Vec<ComparisonColumn>,
    /// Ascending by power
    pub rows: Vec<ComparisonRow>,
}

impl ComparisonTable {
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Peak values of one session, over samples included in reports
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionPeaks {
    pub vo2_ml_kg_min: Option<f64>,
    pub hr_bpm: Option<i32>,
    pub power_w: Option<f64>,
}

impl SessionPeaks {
    pub fn of(session: &StoredSession) -> Self {
        let mut peaks = SessionPeaks::default();
        for stored in session.samples.iter().filter(|s| s.use_in_report) {
            let s = &stored.sample;
            peaks.vo2_ml_kg_min = max_f64(peaks.vo2_ml_kg_min, s.vo2_ml_kg_min);
            peaks.hr_bpm = peaks.hr_bpm.max(s.hr_bpm);
            peaks.power_w = max_f64(peaks.power_w, s.power_w);
        }
        peaks
    }
}

fn max_f64(current: Option<f64>, candidate: Option<f64>) -> Option<f64> {
    match (current, candidate) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, b) => a.or(b),
    }
}

/// Change between two consecutive sessions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DynamicsDelta {
    pub from_date: DateTime<FixedOffset>,
    pub to_date: DateTime<FixedOffset>,
    /// Whole days elapsed
    pub day_gap: i64,
    pub peak_vo2_delta: f64,
    pub peak_hr_delta: i32,
    pub peak_power_delta: f64,
}

/// Session entry of a dynamics report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DynamicsSession {
    pub session_id: Uuid,
    pub date: DateTime<FixedOffset>,
    pub peaks: SessionPeaks,
}

/// Peak-value changes across sessions, oldest first
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DynamicsReport {
    pub sessions: Vec<DynamicsSession>,
    pub deltas: Vec<DynamicsDelta>,
}

impl DynamicsReport {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Comparison engine
#[derive(Debug, Clone)]
pub struct ComparisonEngine {
    label_format: String,
}

impl Default for ComparisonEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ComparisonEngine {
    pub fn new() -> Self {
        Self::with_label_format(DEFAULT_LABEL_FORMAT)
    }

    /// Use a custom `strftime` format for column labels
    pub fn with_label_format(label_format: impl Into<String>) -> Self {
        Self {
            label_format: label_format.into(),
        }
    }

    /// Build a table with one column per session and one row per power level.
    ///
    /// Samples are bucketed by rated power when one is set, otherwise by
    /// measured power rounded to whole watts. Each cell is the mean of the
    /// metric over the bucket.
    pub fn power_aligned_table(
        &self,
        sessions: &[StoredSession],
        metric: Metric,
    ) -> ComparisonTable {
        let columns = sessions
            .iter()
            .map(|s| ComparisonColumn {
                session_id: s.id,
                date: s.measurement_date,
                test_type: s.test_type,
                label: s.measurement_date.format(&self.label_format).to_string(),
            })
            .collect();

        let averages: Vec<BTreeMap<i32, f64>> = sessions
            .iter()
            .map(|s| bucket_averages(s, metric))
            .collect();

        let powers: BTreeSet<i32> = averages.iter().flat_map(|a| a.keys().copied()).collect();

        let rows = powers
            .into_iter()
            .map(|power| ComparisonRow {
                power,
                values: sessions
                    .iter()
                    .zip(&averages)
                    .map(|(s, a)| (s.id, a.get(&power).copied()))
                    .collect(),
            })
            .collect();

        ComparisonTable {
            metric,
            columns,
            rows,
        }
    }

    /// Peak deltas between consecutive sessions.
    ///
    /// Sessions are put in chronological order first. A missing peak counts
    /// as zero. Fewer than two sessions give no deltas.
    pub fn dynamics(&self, sessions: &[StoredSession]) -> DynamicsReport {
        let mut ordered: Vec<&StoredSession> = sessions.iter().collect();
        ordered.sort_by_key(|s| s.measurement_date);

        let summaries: Vec<DynamicsSession> = ordered
            .iter()
            .map(|s| DynamicsSession {
                session_id: s.id,
                date: s.measurement_date,
                peaks: SessionPeaks::of(s),
            })
            .collect();

        let deltas = summaries
            .windows(2)
            .map(|pair| {
                let (prev, curr) = (&pair[0], &pair[1]);
                DynamicsDelta {
                    from_date: prev.date,
                    to_date: curr.date,
                    day_gap: (curr.date - prev.date).num_days(),
                    peak_vo2_delta: curr.peaks.vo2_ml_kg_min.unwrap_or(0.0)
                        - prev.peaks.vo2_ml_kg_min.unwrap_or(0.0),
                    peak_hr_delta: curr.peaks.hr_bpm.unwrap_or(0) - prev.peaks.hr_bpm.unwrap_or(0),
                    peak_power_delta: curr.peaks.power_w.unwrap_or(0.0)
                        - prev.peaks.power_w.unwrap_or(0.0),
                }
            })
            .collect();

        DynamicsReport {
            sessions: summaries,
            deltas,
        }
    }
}

/// Rated power when prescribed, else measured power to the nearest watt
pub fn effective_power(stored: &StoredSample) -> i32 {
    stored
        .rated_power
        .filter(|p| *p != 0)
        .unwrap_or_else(|| stored.sample.power_w.map_or(0, |p| p.round() as i32))
}

/// Mean metric value per power bucket; buckets without a value are absent
fn bucket_averages(session: &StoredSession, metric: Metric) -> BTreeMap<i32, f64> {
    let mut sums: BTreeMap<i32, (f64, usize)> = BTreeMap::new();

    for stored in session.samples.iter().filter(|s| s.use_in_report) {
        let Some(value) = metric.value(stored) else {
            continue;
        };
        let entry = sums.entry(effective_power(stored)).or_insert((0.0, 0));
        entry.0 += value;
        entry.1 += 1;
    }

    sums.into_iter()
        .map(|(power, (sum, count))| (power, sum / count as f64))
        .collect()
}
