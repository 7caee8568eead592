//! CPET Flux - Ingestion and analytics core for cardiopulmonary exercise tests
//!
//! Flux turns gas-analyzer exports into normalized sessions through a
//! deterministic pipeline: format detection → decoding → protocol inference
//! → storage, and compares stored sessions of one subject by power level.
//!
//! ## Modules
//!
//! - **Decoders**: COSMED OMNIA CSV and `dataMap` JSON exports, selected by
//!   the format registry
//! - **Protocol**: ramp start power and step inference from measured power
//! - **Comparison**: power-aligned tables and peak dynamics across sessions

pub mod comparison;
pub mod config;
pub mod decoders;
pub mod error;
pub mod pipeline;
pub mod protocol;
pub mod registry;
pub mod store;
pub mod types;

pub use comparison::{ComparisonEngine, ComparisonTable, DynamicsReport, Metric};
pub use config::{ImportOptions, IngestConfig};
pub use decoders::{DataMapJsonDecoder, FormatDecoder, OmniaCsvDecoder};
pub use error::IngestError;
pub use pipeline::{CpetProcessor, ImportOutcome};
pub use protocol::infer_protocol;
pub use registry::{FormatRegistry, SharedRegistry};
pub use store::{MemoryStore, SessionStore};
pub use types::{NormalizedSample, NormalizedSession, ProtocolParameters, SourceFormat, TestType};

/// Flux version
pub const FLUX_VERSION: &str = env!("CARGO_PKG_VERSION");
