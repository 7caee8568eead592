//! COSMED OMNIA CSV decoder
//!
//! OMNIA exports are comma-separated with a header row of bracketed-unit
//! column names (`Time[s]`, `VO2[mL/kg/min]`, ...). Numeric cells are often
//! quoted and use a comma as decimal separator (`"22,53"`). The format
//! carries no subject or date metadata.

use crate::error::IngestError;
use crate::types::{NormalizedSample, NormalizedSession, RowOutcome, SkipReason, SourceFormat};
use csv::{ReaderBuilder, StringRecord};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use super::{file_name, has_extension, parse_decimal_comma, FormatDecoder};

/// Header tokens that identify an OMNIA export on its first line
const DETECTION_TOKENS: &[&str] = &["VO2[mL", "Time[s]"];

const UTF8_BOM: char = '\u{feff}';

/// Canonical field a CSV column maps to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CsvField {
    Time,
    Vo2PerKg,
    Vo2,
    HeartRate,
    Power,
    RespiratoryFrequency,
    TidalVolume,
    Ventilation,
    Cadence,
    VeVo2,
    Feo2,
    Temperature,
    Humidity,
}

/// OMNIA header name -> canonical field
const COLUMN_MAP: &[(&str, CsvField)] = &[
    ("Time[s]", CsvField::Time),
    ("VO2[mL/kg/min]", CsvField::Vo2PerKg),
    ("VO2[mL/min]", CsvField::Vo2),
    ("HR[bpm]", CsvField::HeartRate),
    ("Power[watts]", CsvField::Power),
    ("Rf[bpm]", CsvField::RespiratoryFrequency),
    ("Tv[L]", CsvField::TidalVolume),
    ("Ve[L/min]", CsvField::Ventilation),
    ("RPM[rpm]", CsvField::Cadence),
    ("Ve/VO2", CsvField::VeVo2),
    ("FeO2[%]", CsvField::Feo2),
    ("Temp[C]", CsvField::Temperature),
    ("HUM[%RH]", CsvField::Humidity),
];

impl CsvField {
    fn from_header(header: &str) -> Option<Self> {
        COLUMN_MAP
            .iter()
            .find(|(name, _)| *name == header)
            .map(|(_, field)| *field)
    }

    fn apply(self, sample: &mut NormalizedSample, value: f64) {
        match self {
            CsvField::Time => sample.time_sec = value,
            CsvField::Vo2PerKg => sample.vo2_ml_kg_min = Some(value),
            CsvField::Vo2 => sample.vo2_ml_min = Some(value),
            CsvField::HeartRate => sample.hr_bpm = Some(value.round() as i32),
            CsvField::Power => sample.power_w = Some(value),
            CsvField::RespiratoryFrequency => sample.rf_bpm = Some(value),
            CsvField::TidalVolume => sample.tv_l = Some(value),
            CsvField::Ventilation => sample.ve_l_min = Some(value),
            CsvField::Cadence => sample.cadence_rpm = Some(value),
            CsvField::VeVo2 => sample.ve_vo2 = Some(value),
            CsvField::Feo2 => sample.feo2_pct = Some(value),
            CsvField::Temperature => sample.temperature_c = Some(value),
            CsvField::Humidity => sample.humidity_pct = Some(value),
        }
    }
}

/// Column index -> canonical field, for the columns this decoder knows
#[derive(Debug, Clone, Default)]
struct ColumnIndex {
    columns: Vec<(usize, String, CsvField)>,
}

impl ColumnIndex {
    fn from_header(header_line: &str) -> Self {
        let header_line = header_line.trim_start_matches(UTF8_BOM).trim_end();
        let columns = split_record(header_line)
            .map(|record| {
                record
                    .iter()
                    .enumerate()
                    .filter_map(|(idx, name)| {
                        let name = name.trim();
                        CsvField::from_header(name).map(|field| (idx, name.to_string(), field))
                    })
                    .collect()
            })
            .unwrap_or_default();
        Self { columns }
    }
}

/// OMNIA CSV decoder
pub struct OmniaCsvDecoder;

impl FormatDecoder for OmniaCsvDecoder {
    fn name(&self) -> &'static str {
        "CSV (OMNIA)"
    }

    fn source_format(&self) -> SourceFormat {
        SourceFormat::OmniaCsv
    }

    fn can_decode(&self, path: &Path) -> bool {
        if !has_extension(path, "csv") {
            return false;
        }
        let Ok(file) = File::open(path) else {
            return false;
        };
        let mut first_line = String::new();
        if BufReader::new(file).read_line(&mut first_line).is_err() {
            return false;
        }
        DETECTION_TOKENS
            .iter()
            .any(|token| first_line.contains(token))
    }

    fn decode(&self, path: &Path) -> Result<NormalizedSession, IngestError> {
        let file = File::open(path)?;
        let mut lines = BufReader::new(file).split(b'\n');
        let mut session = NormalizedSession::new(self.source_format(), file_name(path));

        let Some(header_line) = lines.next().transpose()? else {
            tracing::debug!(file = %session.source_file, "empty CSV export");
            return Ok(session);
        };
        let index = ColumnIndex::from_header(&String::from_utf8_lossy(&header_line));

        for (offset, raw) in lines.enumerate() {
            let raw = raw?;
            // Header is line 1
            let line_number = offset + 2;
            let outcome = match std::str::from_utf8(&raw) {
                Ok(line) if line.trim().is_empty() => continue,
                Ok(line) => decode_row(line.trim(), &index),
                Err(e) => RowOutcome::Skipped(SkipReason::MalformedEntry {
                    detail: format!("invalid UTF-8: {e}"),
                }),
            };
            session.push_outcome(line_number, outcome);
        }

        if !session.skipped.is_empty() {
            tracing::warn!(
                file = %session.source_file,
                skipped = session.skipped.len(),
                "dropped malformed CSV rows"
            );
        }
        tracing::debug!(
            file = %session.source_file,
            samples = session.samples.len(),
            "decoded OMNIA CSV export"
        );

        Ok(session)
    }
}

/// Split one line into fields, honoring quotes
fn split_record(line: &str) -> Result<StringRecord, csv::Error> {
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(line.as_bytes());
    let mut record = StringRecord::new();
    reader.read_record(&mut record)?;
    Ok(record)
}

/// Build one sample from a data line; any malformed mapped cell drops the row
fn decode_row(line: &str, index: &ColumnIndex) -> RowOutcome {
    let record = match split_record(line) {
        Ok(record) => record,
        Err(e) => {
            return RowOutcome::Skipped(SkipReason::MalformedEntry {
                detail: e.to_string(),
            })
        }
    };

    let mut sample = NormalizedSample::default();
    let mut has_time = false;

    for (idx, column, field) in &index.columns {
        let Some(raw) = record.get(*idx) else {
            continue;
        };
        if raw.trim().is_empty() {
            continue;
        }
        let value = match parse_decimal_comma(raw) {
            Some(value) => value,
            None => {
                return RowOutcome::Skipped(SkipReason::MalformedNumber {
                    column: column.clone(),
                    value: raw.to_string(),
                })
            }
        };
        if *field == CsvField::Time {
            has_time = true;
        }
        field.apply(&mut sample, value);
    }

    if !has_time {
        return RowOutcome::Skipped(SkipReason::MissingTime);
    }
    RowOutcome::Sample(sample)
}
