//! Format registry
//!
//! Holds decoders in priority order and picks the first one whose detection
//! predicate accepts a file.
//!
//! Registration is an override mechanism: a decoder registered at runtime is
//! inserted at the front of the list, so it takes precedence over the
//! built-ins. It is not hot-reloading. The registry is a plain value built at
//! startup and handed to callers; callers that share one across threads and
//! register late must synchronize it themselves (see [`SharedRegistry`]).

use crate::decoders::{DataMapJsonDecoder, FormatDecoder, OmniaCsvDecoder};
use crate::error::IngestError;
use crate::types::NormalizedSession;
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};

/// Ordered list of decoders
#[derive(Clone)]
pub struct FormatRegistry {
    decoders: Vec<Arc<dyn FormatDecoder>>,
}

impl Default for FormatRegistry {
    fn default() -> Self {
        Self::with_builtin()
    }
}

impl std::fmt::Debug for FormatRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

impl FormatRegistry {
    /// Create a registry with no decoders
    pub fn empty() -> Self {
        Self {
            decoders: Vec::new(),
        }
    }

    /// Create a registry with the built-in decoders, JSON before CSV
    pub fn with_builtin() -> Self {
        Self {
            decoders: vec![Arc::new(DataMapJsonDecoder), Arc::new(OmniaCsvDecoder)],
        }
    }

    /// Register a decoder ahead of every existing one.
    ///
    /// A decoder with the same name as an existing one replaces it.
    pub fn register(&mut self, decoder: Arc<dyn FormatDecoder>) {
        self.decoders.retain(|d| d.name() != decoder.name());
        tracing::debug!(decoder = decoder.name(), "registered format decoder");
        self.decoders.insert(0, decoder);
    }

    /// Names of registered decoders, in priority order
    pub fn names(&self) -> Vec<&'static str> {
        self.decoders.iter().map(|d| d.name()).collect()
    }

    /// Human-readable list of supported formats
    pub fn supported_formats(&self) -> String {
        self.names().join(", ")
    }

    /// Select the decoder for a file.
    pub fn detect(&self, path: &Path) -> Result<&dyn FormatDecoder, IngestError> {
        if !path.exists() {
            return Err(IngestError::FileNotFound(path.to_path_buf()));
        }

        for decoder in &self.decoders {
            if decoder.can_decode(path) {
                tracing::debug!(
                    file = %path.display(),
                    decoder = decoder.name(),
                    "detected file format"
                );
                return Ok(decoder.as_ref());
            }
        }

        Err(IngestError::NoMatchingFormat {
            file: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string()),
            supported: self.supported_formats(),
        })
    }

    /// Detect the format and decode in one call
    pub fn decode(&self, path: &Path) -> Result<NormalizedSession, IngestError> {
        self.detect(path)?.decode(path)
    }
}

/// Registry shared between threads, for callers that register decoders
/// after startup.
#[derive(Debug, Clone, Default)]
pub struct SharedRegistry {
    inner: Arc<RwLock<FormatRegistry>>,
}

impl SharedRegistry {
    pub fn new(registry: FormatRegistry) -> Self {
        Self {
            inner: Arc::new(RwLock::new(registry)),
        }
    }

    pub fn register(&self, decoder: Arc<dyn FormatDecoder>) {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .register(decoder);
    }

    pub fn decode(&self, path: &Path) -> Result<NormalizedSession, IngestError> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .decode(path)
    }

    /// Copy of the current decoder list
    pub fn snapshot(&self) -> FormatRegistry {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoders::has_extension;
    use crate::types::{NormalizedSample, SourceFormat};
    use std::io::Write;
    use tempfile::NamedTempFile;

    /// Accepts any `.csv` file, to check registration precedence
    struct PnoeDecoder;

    impl FormatDecoder for PnoeDecoder {
        fn name(&self) -> &'static str {
            "CSV (PNOE)"
        }

        fn source_format(&self) -> SourceFormat {
            SourceFormat::PnoeCsv
        }

        fn can_decode(&self, path: &Path) -> bool {
            has_extension(path, "csv")
        }

        fn decode(&self, _path: &Path) -> Result<NormalizedSession, IngestError> {
            let mut session = NormalizedSession::new(self.source_format(), "pnoe.csv");
            session.samples.push(NormalizedSample::at(0.0));
            Ok(session)
        }
    }

    fn write_file(suffix: &str, content: &str) -> NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_detects_builtin_formats() {
        let registry = FormatRegistry::with_builtin();

        let csv = write_file(".csv", "Time[s],HR[bpm]\n\"5\",\"120\"\n");
        let json = write_file(".json", r#"{"dataMap": [[5, {"HR": 120}]]}"#);

        assert_eq!(
            registry.detect(csv.path()).unwrap().source_format(),
            SourceFormat::OmniaCsv
        );
        assert_eq!(
            registry.decode(json.path()).unwrap().source_format,
            SourceFormat::CustomJson
        );
    }

    #[test]
    fn test_missing_file() {
        let registry = FormatRegistry::with_builtin();
        let result = registry.decode(Path::new("/definitely/not/here.csv"));
        assert!(matches!(result, Err(IngestError::FileNotFound(_))));
    }

    #[test]
    fn test_no_matching_format_lists_supported() {
        let registry = FormatRegistry::with_builtin();
        let file = write_file(".txt", "hello");

        match registry.detect(file.path()) {
            Err(IngestError::NoMatchingFormat { supported, .. }) => {
                assert_eq!(supported, "JSON (dataMap), CSV (OMNIA)");
            }
            other => panic!("expected NoMatchingFormat, got {:?}", other.map(|d| d.name())),
        }
    }

    #[test]
    fn test_csv_with_foreign_header_is_not_omnia() {
        let registry = FormatRegistry::with_builtin();
        let file = write_file(".csv", "a,b,c\n1,2,3\n");
        assert!(matches!(
            registry.detect(file.path()),
            Err(IngestError::NoMatchingFormat { .. })
        ));
    }

    #[test]
    fn test_registered_decoder_takes_precedence() {
        let mut registry = FormatRegistry::with_builtin();
        registry.register(Arc::new(PnoeDecoder));
        registry.register(Arc::new(PnoeDecoder));

        assert_eq!(
            registry.names(),
            vec!["CSV (PNOE)", "JSON (dataMap)", "CSV (OMNIA)"]
        );

        let file = write_file(".csv", "Time[s],HR[bpm]\n\"5\",\"120\"\n");
        let session = registry.decode(file.path()).unwrap();
        assert_eq!(session.source_format, SourceFormat::PnoeCsv);
    }

    #[test]
    fn test_shared_registry_late_registration() {
        let shared = SharedRegistry::new(FormatRegistry::with_builtin());
        let file = write_file(".csv", "Time[s]\n\"1\"\n");

        assert_eq!(
            shared.decode(file.path()).unwrap().source_format,
            SourceFormat::OmniaCsv
        );

        let writer = shared.clone();
        std::thread::spawn(move || writer.register(Arc::new(PnoeDecoder)))
            .join()
            .unwrap();

        assert_eq!(
            shared.decode(file.path()).unwrap().source_format,
            SourceFormat::PnoeCsv
        );
        assert_eq!(shared.snapshot().names().len(), 3);
    }
}
