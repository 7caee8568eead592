//! Session storage
//!
//! Records handed to persistence after decoding: subjects, sessions with
//! their inferred protocol, and the ordered samples of each session. The
//! [`SessionStore`] trait is the boundary to a real database; [`MemoryStore`]
//! is an in-process implementation that snapshots to JSON.

use crate::error::IngestError;
use crate::types::{Gender, NormalizedSample, ProtocolParameters, SourceFormat, TestType};
use chrono::{DateTime, Datelike, FixedOffset, NaiveDate};
use serde::{Deserialize, Serialize};
use std::path::Path;
use uuid::Uuid;

/// Athlete profile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subject {
    pub id: Uuid,
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    pub gender: Gender,
    pub birthdate: Option<NaiveDate>,
    pub height_cm: Option<f64>,
    pub weight_kg: Option<f64>,
}

impl Subject {
    /// "First Last", skipping empty parts
    pub fn full_name(&self) -> String {
        [self.first_name.as_str(), self.last_name.as_str()]
            .iter()
            .filter(|part| !part.is_empty())
            .copied()
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Age in whole years on the given date
    pub fn age_on(&self, date: NaiveDate) -> Option<u32> {
        let birthdate = self.birthdate?;
        let mut years = date.year() - birthdate.year();
        if (date.month(), date.day()) < (birthdate.month(), birthdate.day()) {
            years -= 1;
        }
        u32::try_from(years).ok()
    }
}

/// Subject fields supplied on creation
#[derive(Debug, Clone, PartialEq)]
pub struct NewSubject {
    pub first_name: String,
    pub last_name: String,
    pub gender: Gender,
    pub birthdate: Option<NaiveDate>,
    pub height_cm: Option<f64>,
    pub weight_kg: Option<f64>,
}

/// A persisted sample: the canonical fields plus review annotations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredSample {
    #[serde(flatten)]
    pub sample: NormalizedSample,
    /// Protocol-prescribed power for the stage (W)
    pub rated_power: Option<i32>,
    /// Blood lactate, entered by hand (mmol/L)
    pub lactate_mmol_l: Option<f64>,
    /// Excluded samples are ignored by comparisons and peaks
    #[serde(default = "default_true")]
    pub use_in_report: bool,
}

fn default_true() -> bool {
    true
}

impl From<NormalizedSample> for StoredSample {
    fn from(sample: NormalizedSample) -> Self {
        Self {
            sample,
            rated_power: None,
            lactate_mmol_l: None,
            use_in_report: true,
        }
    }
}

/// A persisted test session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredSession {
    pub id: Uuid,
    pub subject_id: Uuid,
    pub measurement_date: DateTime<FixedOffset>,
    pub protocol: ProtocolParameters,
    pub test_type: TestType,
    pub source_format: SourceFormat,
    pub source_file: String,
    #[serde(default = "default_true")]
    pub use_in_report: bool,
    pub samples: Vec<StoredSample>,
}

impl StoredSession {
    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    /// Largest time offset, i.e. the test duration in seconds
    pub fn duration_sec(&self) -> Option<f64> {
        self.samples
            .iter()
            .map(|s| s.sample.time_sec)
            .fold(None, |max, t| Some(max.map_or(t, |m: f64| m.max(t))))
    }
}

/// Session fields supplied on creation
#[derive(Debug, Clone, PartialEq)]
pub struct NewSession {
    pub subject_id: Uuid,
    pub measurement_date: DateTime<FixedOffset>,
    pub protocol: ProtocolParameters,
    pub test_type: TestType,
    pub source_format: SourceFormat,
    pub source_file: String,
    /// Samples in source order
    pub samples: Vec<NormalizedSample>,
}

/// Persistence boundary for subjects and sessions
pub trait SessionStore {
    /// Case-insensitive lookup on the full name
    fn find_subject_by_name(&self, name: &str) -> Result<Option<Subject>, IngestError>;

    fn subject(&self, id: Uuid) -> Result<Subject, IngestError>;

    fn create_subject(&mut self, subject: NewSubject) -> Result<Subject, IngestError>;

    /// Create a session together with its ordered samples
    fn create_session(&mut self, session: NewSession) -> Result<StoredSession, IngestError>;

    fn session(&self, id: Uuid) -> Result<StoredSession, IngestError>;

    /// Sessions of one subject, newest first, optionally of one test type
    fn sessions_for_subject(
        &self,
        subject_id: Uuid,
        test_type: Option<TestType>,
        limit: usize,
    ) -> Result<Vec<StoredSession>, IngestError>;
}

/// In-memory store with JSON snapshots
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryStore {
    subjects: Vec<Subject>,
    sessions: Vec<StoredSession>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mutable access to a stored session, for manual review edits
    pub fn session_mut(&mut self, id: Uuid) -> Result<&mut StoredSession, IngestError> {
        self.sessions
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or(IngestError::SessionNotFound(id))
    }

    /// Load store state from JSON
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Serialize store state to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn load(path: &Path) -> Result<Self, IngestError> {
        if !path.exists() {
            return Err(IngestError::FileNotFound(path.to_path_buf()));
        }
        let contents = std::fs::read_to_string(path)?;
        Ok(Self::from_json(&contents)?)
    }

    pub fn save(&self, path: &Path) -> Result<(), IngestError> {
        std::fs::write(path, self.to_json()?)?;
        tracing::debug!(
            path = %path.display(),
            subjects = self.subjects.len(),
            sessions = self.sessions.len(),
            "saved store snapshot"
        );
        Ok(())
    }
}

impl SessionStore for MemoryStore {
    fn find_subject_by_name(&self, name: &str) -> Result<Option<Subject>, IngestError> {
        let wanted = name.trim().to_lowercase();
        Ok(self
            .subjects
            .iter()
            .find(|s| s.full_name().to_lowercase() == wanted)
            .cloned())
    }

    fn subject(&self, id: Uuid) -> Result<Subject, IngestError> {
        self.subjects
            .iter()
            .find(|s| s.id == id)
            .cloned()
            .ok_or(IngestError::SubjectNotFound(id))
    }

    fn create_subject(&mut self, subject: NewSubject) -> Result<Subject, IngestError> {
        let subject = Subject {
            id: Uuid::new_v4(),
            first_name: subject.first_name,
            last_name: subject.last_name,
            gender: subject.gender,
            birthdate: subject.birthdate,
            height_cm: subject.height_cm,
            weight_kg: subject.weight_kg,
        };
        self.subjects.push(subject.clone());
        Ok(subject)
    }

    fn create_session(&mut self, session: NewSession) -> Result<StoredSession, IngestError> {
        if !self.subjects.iter().any(|s| s.id == session.subject_id) {
            return Err(IngestError::SubjectNotFound(session.subject_id));
        }

        let stored = StoredSession {
            id: Uuid::new_v4(),
            subject_id: session.subject_id,
            measurement_date: session.measurement_date,
            protocol: session.protocol,
            test_type: session.test_type,
            source_format: session.source_format,
            source_file: session.source_file,
            use_in_report: true,
            samples: session.samples.into_iter().map(StoredSample::from).collect(),
        };
        self.sessions.push(stored.clone());
        Ok(stored)
    }

    fn session(&self, id: Uuid) -> Result<StoredSession, IngestError> {
        self.sessions
            .iter()
            .find(|s| s.id == id)
            .cloned()
            .ok_or(IngestError::SessionNotFound(id))
    }

    fn sessions_for_subject(
        &self,
        subject_id: Uuid,
        test_type: Option<TestType>,
        limit: usize,
    ) -> Result<Vec<StoredSession>, IngestError> {
        let mut sessions: Vec<StoredSession> = self
            .sessions
            .iter()
            .filter(|s| s.subject_id == subject_id)
            .filter(|s| test_type.map_or(true, |t| s.test_type == t))
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.measurement_date.cmp(&a.measurement_date));
        sessions.truncate(limit);
        Ok(sessions)
    }
}
