//! Pipeline orchestration
//!
//! This module provides the public API for CPET Flux. It takes one export
//! file through detection, decoding, subject resolution and protocol
//! inference, hands the result to a [`SessionStore`], and runs comparisons
//! over what the store holds.

use crate::comparison::{ComparisonEngine, ComparisonTable, DynamicsReport, Metric};
use crate::config::{ImportOptions, IngestConfig};
use crate::decoders::FormatDecoder;
use crate::error::IngestError;
use crate::protocol::infer_protocol_with_quantum;
use crate::registry::FormatRegistry;
use crate::store::{MemoryStore, NewSession, NewSubject, SessionStore, StoredSession, Subject};
use crate::types::{
    Gender, NormalizedSession, ProtocolParameters, SkippedRecord, SourceFormat, SubjectMetadata,
    TestType,
};
use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

/// First name given to subjects created from exports without a name
const UNKNOWN_SUBJECT: &str = "Unknown";

/// Result of importing one file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportOutcome {
    pub session_id: Uuid,
    pub subject_id: Uuid,
    /// True when the subject was created by this import
    pub subject_created: bool,
    pub source_format: SourceFormat,
    pub sample_count: usize,
    /// Rows the decoder dropped
    pub skipped: Vec<SkippedRecord>,
    pub protocol: ProtocolParameters,
    pub measurement_date: DateTime<FixedOffset>,
}

/// Stateful processor owning the decoder registry and the session store.
///
/// Use this when imports and comparisons should share one store.
pub struct CpetProcessor<S = MemoryStore> {
    config: IngestConfig,
    registry: FormatRegistry,
    engine: ComparisonEngine,
    store: S,
}

impl Default for CpetProcessor<MemoryStore> {
    fn default() -> Self {
        Self::new()
    }
}

impl CpetProcessor<MemoryStore> {
    /// Create a processor with default settings and an empty in-memory store
    pub fn new() -> Self {
        Self::with_store(MemoryStore::new())
    }
}

impl<S: SessionStore> CpetProcessor<S> {
    /// Create a processor over an existing store
    pub fn with_store(store: S) -> Self {
        let config = IngestConfig::default();
        Self {
            engine: ComparisonEngine::with_label_format(config.date_label_format.clone()),
            config,
            registry: FormatRegistry::with_builtin(),
            store,
        }
    }

    pub fn with_config(mut self, config: IngestConfig) -> Self {
        self.engine = ComparisonEngine::with_label_format(config.date_label_format.clone());
        self.config = config;
        self
    }

    pub fn with_registry(mut self, registry: FormatRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Register an additional decoder ahead of the built-ins
    pub fn register_decoder(&mut self, decoder: Arc<dyn FormatDecoder>) {
        self.registry.register(decoder);
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    pub fn registry(&self) -> &FormatRegistry {
        &self.registry
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    /// Import one export file.
    ///
    /// Pipeline stages:
    /// 1. FormatRegistry - Detect the format and decode to a normalized session
    /// 2. Subject - Use the override, else match the decoded name, else create
    /// 3. Protocol - Infer start power and step from measured power
    /// 4. SessionStore - Persist the session with its ordered samples
    pub fn import_file(
        &mut self,
        path: &Path,
        options: &ImportOptions,
    ) -> Result<ImportOutcome, IngestError> {
        let session = self.registry.decode(path)?;

        let (subject, subject_created) = self.resolve_subject(&session, options)?;
        let protocol =
            infer_protocol_with_quantum(&session.samples, self.config.protocol_power_quantum_w);
        let measurement_date = options
            .measurement_date
            .or(session.measurement_date)
            .unwrap_or_else(|| Utc::now().into());
        let test_type = options
            .test_type
            .unwrap_or(self.config.default_test_type);

        let NormalizedSession {
            samples,
            source_format,
            source_file,
            skipped,
            ..
        } = session;

        let stored = self.store.create_session(NewSession {
            subject_id: subject.id,
            measurement_date,
            protocol,
            test_type,
            source_format,
            source_file,
            samples,
        })?;

        if !skipped.is_empty() {
            tracing::warn!(
                file = %stored.source_file,
                skipped = skipped.len(),
                "dropped unreadable records during import"
            );
        }
        tracing::info!(
            file = %stored.source_file,
            format = %stored.source_format,
            session = %stored.id,
            subject = %subject.id,
            samples = stored.sample_count(),
            protocol = %stored.protocol,
            "imported CPET session"
        );

        Ok(ImportOutcome {
            session_id: stored.id,
            subject_id: subject.id,
            subject_created,
            source_format: stored.source_format,
            sample_count: stored.sample_count(),
            skipped,
            protocol: stored.protocol,
            measurement_date: stored.measurement_date,
        })
    }

    fn resolve_subject(
        &mut self,
        session: &NormalizedSession,
        options: &ImportOptions,
    ) -> Result<(Subject, bool), IngestError> {
        if let Some(id) = options.subject_id {
            return Ok((self.store.subject(id)?, false));
        }

        if let Some(name) = session.subject.name.as_deref() {
            if let Some(existing) = self.store.find_subject_by_name(name)? {
                tracing::debug!(subject = %existing.id, name, "matched existing subject");
                return Ok((existing, false));
            }
        }

        let subject = self.store.create_subject(new_subject_from(&session.subject))?;
        tracing::debug!(subject = %subject.id, name = %subject.full_name(), "created subject");
        Ok((subject, true))
    }

    /// Sessions of a subject, oldest first, capped at the configured limit
    fn sessions_chronological(
        &self,
        subject_id: Uuid,
        test_type: Option<TestType>,
    ) -> Result<Vec<StoredSession>, IngestError> {
        self.store.subject(subject_id)?;
        let mut sessions =
            self.store
                .sessions_for_subject(subject_id, test_type, self.config.comparison_limit)?;
        sessions.reverse();
        Ok(sessions)
    }

    /// Power-aligned comparison of a subject's most recent sessions
    pub fn compare(
        &self,
        subject_id: Uuid,
        test_type: Option<TestType>,
        metric: Metric,
    ) -> Result<ComparisonTable, IngestError> {
        let sessions = self.sessions_chronological(subject_id, test_type)?;
        Ok(self.engine.power_aligned_table(&sessions, metric))
    }

    /// Peak-value changes across a subject's most recent sessions
    pub fn dynamics(
        &self,
        subject_id: Uuid,
        test_type: Option<TestType>,
    ) -> Result<DynamicsReport, IngestError> {
        let sessions = self.sessions_chronological(subject_id, test_type)?;
        Ok(self.engine.dynamics(&sessions))
    }
}

/// Subject record for a name recovered from an export: the first word is the
/// first name, the rest is the last name.
fn new_subject_from(metadata: &SubjectMetadata) -> NewSubject {
    let name = metadata
        .name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .unwrap_or(UNKNOWN_SUBJECT);
    let mut parts = name.split_whitespace();
    let first_name = parts.next().unwrap_or(UNKNOWN_SUBJECT).to_string();
    let last_name = parts.collect::<Vec<_>>().join(" ");

    NewSubject {
        first_name,
        last_name,
        gender: metadata.gender.unwrap_or(Gender::Male),
        birthdate: None,
        height_cm: metadata.height_cm,
        weight_kg: metadata.weight_kg,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_file(suffix: &str, content: &str) -> NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    fn omnia_csv() -> NamedTempFile {
        write_file(
            ".csv",
            "Time[s],VO2[mL/kg/min],HR[bpm],Power[watts]\n\
             \"5\",\"20,5\",\"110\",\"100\"\n\
             \"10\",\"22,5\",\"118\",\"100\"\n\
             \"\",\"23,0\",\"120\",\"120\"\n\
             \"15\",\"25,0\",\"130\",\"120\"\n\
             \"20\",\"28,0\",\"140\",\"140\"\n",
        )
    }

    fn datamap_json(create_ts: &str, peak_o2: u32) -> NamedTempFile {
        let content = format!(
            r#"{{
                "dataMap": [
                    [5, {{"O2_Flow": 1200, "HR": 120, "Power": 140}}],
                    [10, {{"O2_Flow": 1400, "HR": 135, "Power": 160}}],
                    [15, {{"O2_Flow": {peak_o2}, "HR": 150, "Power": 180}}]
                ],
                "setup": {{
                    "name": "Irina Fetisova",
                    "weight": 53,
                    "height": 170,
                    "sex": "f",
                    "createTS": "{create_ts}"
                }}
            }}"#
        );
        write_file(".json", &content)
    }

    fn params(start_power: i32, step_power: i32) -> ProtocolParameters {
        ProtocolParameters {
            start_power,
            step_power,
        }
    }

    fn date(y: i32, m: u32, d: u32) -> DateTime<FixedOffset> {
        FixedOffset::east_opt(0)
            .unwrap()
            .with_ymd_and_hms(y, m, d, 9, 0, 0)
            .unwrap()
    }

    #[test]
    fn test_import_csv_creates_unknown_subject() {
        let mut processor = CpetProcessor::new();
        let file = omnia_csv();

        let outcome = processor
            .import_file(file.path(), &ImportOptions::new())
            .unwrap();

        assert_eq!(outcome.source_format, SourceFormat::OmniaCsv);
        assert_eq!(outcome.sample_count, 4);
        assert_eq!(outcome.skipped.len(), 1);
        assert_eq!(outcome.protocol, params(100, 20));
        assert!(outcome.subject_created);

        let subject = processor.store().subject(outcome.subject_id).unwrap();
        assert_eq!(subject.first_name, "Unknown");
        assert_eq!(subject.last_name, "");
        assert_eq!(subject.gender, Gender::Male);

        let session = processor.store().session(outcome.session_id).unwrap();
        assert_eq!(session.test_type, TestType::Cycling);
        let times: Vec<f64> = session.samples.iter().map(|s| s.sample.time_sec).collect();
        assert_eq!(times, vec![5.0, 10.0, 15.0, 20.0]);
    }

    #[test]
    fn test_import_json_creates_then_reuses_subject() {
        let mut processor = CpetProcessor::new();
        let first = datamap_json("2024-08-04T09:00:00Z", 1600);
        let second = datamap_json("2024-08-14T09:00:00Z", 1700);

        let a = processor
            .import_file(first.path(), &ImportOptions::new())
            .unwrap();
        let b = processor
            .import_file(second.path(), &ImportOptions::new())
            .unwrap();

        assert!(a.subject_created);
        assert!(!b.subject_created);
        assert_eq!(a.subject_id, b.subject_id);
        assert_eq!(a.measurement_date, date(2024, 8, 4));

        let subject = processor.store().subject(a.subject_id).unwrap();
        assert_eq!(subject.first_name, "Irina");
        assert_eq!(subject.last_name, "Fetisova");
        assert_eq!(subject.gender, Gender::Female);
        assert_eq!(subject.weight_kg, Some(53.0));
        assert_eq!(subject.height_cm, Some(170.0));
        assert_eq!(a.protocol, params(140, 20));
    }

    #[test]
    fn test_overrides_win_over_decoded_metadata() {
        let mut processor = CpetProcessor::new();
        let subject = processor
            .store_mut()
            .create_subject(NewSubject {
                first_name: "Oleg".to_string(),
                last_name: "Petrov".to_string(),
                gender: Gender::Male,
                birthdate: None,
                height_cm: None,
                weight_kg: None,
            })
            .unwrap();

        let file = datamap_json("2024-08-04T09:00:00Z", 1600);
        let options = ImportOptions::new()
            .with_subject(subject.id)
            .with_measurement_date(date(2024, 9, 1))
            .with_test_type(TestType::Running);
        let outcome = processor.import_file(file.path(), &options).unwrap();

        assert_eq!(outcome.subject_id, subject.id);
        assert!(!outcome.subject_created);
        assert_eq!(outcome.measurement_date, date(2024, 9, 1));

        let session = processor.store().session(outcome.session_id).unwrap();
        assert_eq!(session.test_type, TestType::Running);
        assert!(processor
            .store()
            .find_subject_by_name("Irina Fetisova")
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_missing_date_falls_back_to_now() {
        let mut processor = CpetProcessor::new();
        let file = omnia_csv();
        let before = Utc::now();

        let outcome = processor
            .import_file(file.path(), &ImportOptions::new())
            .unwrap();

        assert!(outcome.measurement_date >= before - chrono::Duration::seconds(1));
        assert!(outcome.measurement_date <= Utc::now());
    }

    #[test]
    fn test_unknown_subject_override_is_an_error() {
        let mut processor = CpetProcessor::new();
        let file = omnia_csv();
        let options = ImportOptions::new().with_subject(Uuid::new_v4());

        let result = processor.import_file(file.path(), &options);
        assert!(matches!(result, Err(IngestError::SubjectNotFound(_))));
        assert!(processor.store().find_subject_by_name("Unknown").unwrap().is_none());
    }

    #[test]
    fn test_import_errors_surface() {
        let mut processor = CpetProcessor::new();
        let missing = processor.import_file(Path::new("/no/such/test.csv"), &ImportOptions::new());
        assert!(matches!(missing, Err(IngestError::FileNotFound(_))));

        let text = write_file(".txt", "not an export");
        let unknown = processor.import_file(text.path(), &ImportOptions::new());
        assert!(matches!(unknown, Err(IngestError::NoMatchingFormat { .. })));
    }

    #[test]
    fn test_configured_quantum_is_used() {
        let config = IngestConfig {
            protocol_power_quantum_w: 50,
            ..IngestConfig::default()
        };
        let mut processor = CpetProcessor::new().with_config(config);
        let file = datamap_json("2024-08-04T09:00:00Z", 1600);

        let outcome = processor
            .import_file(file.path(), &ImportOptions::new())
            .unwrap();
        // 140, 160, 180 snap to 150, 150, 200
        assert_eq!(outcome.protocol, params(150, 50));
    }

    #[test]
    fn test_compare_and_dynamics_over_store() {
        let mut processor = CpetProcessor::new();
        let later = datamap_json("2024-08-14T09:00:00Z", 1700);
        let earlier = datamap_json("2024-08-04T09:00:00Z", 1600);

        let b = processor
            .import_file(later.path(), &ImportOptions::new())
            .unwrap();
        let a = processor
            .import_file(earlier.path(), &ImportOptions::new())
            .unwrap();

        let table = processor
            .compare(a.subject_id, Some(TestType::Cycling), Metric::Vo2)
            .unwrap();
        let ids: Vec<Uuid> = table.columns.iter().map(|c| c.session_id).collect();
        assert_eq!(ids, vec![a.session_id, b.session_id]);
        assert_eq!(table.columns[0].label, "04 Aug");

        let powers: Vec<i32> = table.rows.iter().map(|r| r.power).collect();
        assert_eq!(powers, vec![140, 160, 180]);
        assert_eq!(table.rows[2].value(a.session_id), Some(1600.0));
        assert_eq!(table.rows[2].value(b.session_id), Some(1700.0));

        let report = processor.dynamics(a.subject_id, None).unwrap();
        assert_eq!(report.deltas.len(), 1);
        assert_eq!(report.deltas[0].day_gap, 10);
        assert_eq!(report.deltas[0].peak_hr_delta, 0);
        assert_eq!(report.deltas[0].peak_power_delta, 0.0);

        let running = processor
            .compare(a.subject_id, Some(TestType::Running), Metric::Vo2)
            .unwrap();
        assert!(running.is_empty());
    }

    #[test]
    fn test_comparison_limit_keeps_newest() {
        let config = IngestConfig {
            comparison_limit: 2,
            ..IngestConfig::default()
        };
        let mut processor = CpetProcessor::new().with_config(config);
        let files = [
            datamap_json("2024-08-04T09:00:00Z", 1600),
            datamap_json("2024-08-14T09:00:00Z", 1650),
            datamap_json("2024-08-24T09:00:00Z", 1700),
        ];
        let outcomes: Vec<ImportOutcome> = files
            .iter()
            .map(|f| processor.import_file(f.path(), &ImportOptions::new()).unwrap())
            .collect();

        let table = processor
            .compare(outcomes[0].subject_id, None, Metric::HeartRate)
            .unwrap();
        let ids: Vec<Uuid> = table.columns.iter().map(|c| c.session_id).collect();
        assert_eq!(ids, vec![outcomes[1].session_id, outcomes[2].session_id]);
    }

    #[test]
    fn test_compare_unknown_subject() {
        let processor = CpetProcessor::new();
        let result = processor.compare(Uuid::new_v4(), None, Metric::HeartRate);
        assert!(matches!(result, Err(IngestError::SubjectNotFound(_))));
    }

    #[test]
    fn test_store_survives_snapshot() {
        let mut processor = CpetProcessor::new();
        let file = datamap_json("2024-08-04T09:00:00Z", 1600);
        let outcome = processor
            .import_file(file.path(), &ImportOptions::new())
            .unwrap();

        let snapshot = processor.store().to_json().unwrap();
        let restored = CpetProcessor::with_store(MemoryStore::from_json(&snapshot).unwrap());

        let session = restored.store().session(outcome.session_id).unwrap();
        assert_eq!(session.sample_count(), 3);
        assert_eq!(session.protocol, outcome.protocol);
    }
}
