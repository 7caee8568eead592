//! Core types for the CPET Flux pipeline
//!
//! This module defines the canonical, format-agnostic records every decoder
//! produces and every downstream stage (protocol inference, storage,
//! comparison) consumes without format-specific branching.

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of the decoder that produced a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SourceFormat {
    /// COSMED OMNIA tabular export
    OmniaCsv,
    /// Structured export with a `dataMap` array
    CustomJson,
    PnoeCsv,
    Metasoft,
    Fit,
}

impl SourceFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceFormat::OmniaCsv => "OMNIA_CSV",
            SourceFormat::CustomJson => "CUSTOM_JSON",
            SourceFormat::PnoeCsv => "PNOE_CSV",
            SourceFormat::Metasoft => "METASOFT",
            SourceFormat::Fit => "FIT",
        }
    }
}

impl fmt::Display for SourceFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalized gender code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Gender {
    #[serde(rename = "M")]
    Male,
    #[serde(rename = "F")]
    Female,
}

impl Gender {
    /// Normalize a free-form gender token.
    ///
    /// Accepts English and Cyrillic single-letter tokens as well as the
    /// full English words, case-insensitively. Anything else is `None`.
    pub fn from_token(token: &str) -> Option<Self> {
        match token.trim().to_lowercase().as_str() {
            "m" | "male" | "м" => Some(Gender::Male),
            "f" | "female" | "ж" => Some(Gender::Female),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Gender::Male => "M",
            Gender::Female => "F",
        }
    }
}

/// Kind of exercise test, used to keep comparisons like-for-like
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TestType {
    #[default]
    Cycling,
    Running,
    Swimming,
    Skiing,
    Rowing,
    Other,
}

impl TestType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TestType::Cycling => "CYCLING",
            TestType::Running => "RUNNING",
            TestType::Swimming => "SWIMMING",
            TestType::Skiing => "SKIING",
            TestType::Rowing => "ROWING",
            TestType::Other => "OTHER",
        }
    }
}

impl fmt::Display for TestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One time-stamped physiological observation.
///
/// Only `time_sec` is required; every other field is independently optional
/// because different devices export different subsets of metrics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NormalizedSample {
    /// Seconds from test start
    pub time_sec: f64,
    /// Oxygen uptake normalized to body mass (mL/kg/min)
    pub vo2_ml_kg_min: Option<f64>,
    /// Absolute oxygen uptake (mL/min)
    pub vo2_ml_min: Option<f64>,
    /// Carbon dioxide output (mL/min)
    pub vco2_ml_min: Option<f64>,
    /// Heart rate (bpm)
    pub hr_bpm: Option<i32>,
    /// Measured power output (W)
    pub power_w: Option<f64>,
    /// Respiratory frequency (breaths/min)
    pub rf_bpm: Option<f64>,
    /// Tidal volume (L)
    pub tv_l: Option<f64>,
    /// Minute ventilation (L/min)
    pub ve_l_min: Option<f64>,
    /// Cadence (rpm)
    pub cadence_rpm: Option<f64>,
    /// Ventilatory equivalent for O2
    pub ve_vo2: Option<f64>,
    /// Expired O2 fraction (%)
    pub feo2_pct: Option<f64>,
    /// Respiratory exchange ratio (VCO2/VO2)
    pub rer: Option<f64>,
    /// Heart rate variability (ms)
    pub hrv_ms: Option<i32>,
    /// Poincaré plot SD1 (ms)
    pub sd1_ms: Option<f64>,
    /// Poincaré plot SD2 (ms)
    pub sd2_ms: Option<f64>,
    /// Ambient temperature (°C)
    pub temperature_c: Option<f64>,
    /// Ambient humidity (%RH)
    pub humidity_pct: Option<f64>,
}

impl NormalizedSample {
    pub fn at(time_sec: f64) -> Self {
        Self {
            time_sec,
            ..Default::default()
        }
    }
}

/// Subject metadata recovered from an export, when the format carries it
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubjectMetadata {
    pub name: Option<String>,
    pub weight_kg: Option<f64>,
    pub height_cm: Option<f64>,
    pub gender: Option<Gender>,
    pub age: Option<u32>,
}

/// Why a single row or entry was dropped during decoding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum SkipReason {
    /// The row carried no time offset
    MissingTime,
    /// A mapped column held a value that is not a number
    MalformedNumber { column: String, value: String },
    /// The entry does not have the expected structure
    MalformedEntry { detail: String },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::MissingTime => write!(f, "missing time offset"),
            SkipReason::MalformedNumber { column, value } => {
                write!(f, "malformed number {value:?} in column {column}")
            }
            SkipReason::MalformedEntry { detail } => write!(f, "malformed entry: {detail}"),
        }
    }
}

/// A dropped row together with its position in the source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedRecord {
    /// 1-based line number for tabular files, 0-based entry index for arrays
    pub position: usize,
    pub reason: SkipReason,
}

/// Per-row decode result
#[derive(Debug, Clone, PartialEq)]
pub enum RowOutcome {
    Sample(NormalizedSample),
    Skipped(SkipReason),
}

/// Decode output for one file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedSession {
    /// Samples in the order the file emitted them
    pub samples: Vec<NormalizedSample>,
    pub subject: SubjectMetadata,
    /// Device-assigned test identifier
    pub test_id: Option<String>,
    pub comment: Option<String>,
    pub measurement_date: Option<DateTime<FixedOffset>>,
    pub source_format: SourceFormat,
    /// Original file name (without directories)
    pub source_file: String,
    /// Rows the decoder dropped, in source order
    #[serde(default)]
    pub skipped: Vec<SkippedRecord>,
}

impl NormalizedSession {
    pub fn new(source_format: SourceFormat, source_file: impl Into<String>) -> Self {
        Self {
            samples: Vec::new(),
            subject: SubjectMetadata::default(),
            test_id: None,
            comment: None,
            measurement_date: None,
            source_format,
            source_file: source_file.into(),
            skipped: Vec::new(),
        }
    }

    /// Record one row outcome, keeping the sample or remembering the skip
    pub fn push_outcome(&mut self, position: usize, outcome: RowOutcome) {
        match outcome {
            RowOutcome::Sample(sample) => self.samples.push(sample),
            RowOutcome::Skipped(reason) => self.skipped.push(SkippedRecord { position, reason }),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Ramp protocol parameters inferred from the power signal
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolParameters {
    /// Start power (W)
    pub start_power: i32,
    /// Power increment per stage (W); 0 when no ascending step was found
    pub step_power: i32,
}

impl fmt::Display for ProtocolParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.step_power == 0 {
            write!(f, "constant {} W", self.start_power)
        } else {
            write!(
                f,
                "start {} W, +{} W per stage",
                self.start_power, self.step_power
            )
        }
    }
}
