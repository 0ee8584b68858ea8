//! Error types for the bundler pipeline.

use std::path::PathBuf;

use crate::query::BlockKind;
use crate::types::SfcError;

/// Error type for pipeline operations.
///
/// Every variant is raised at the hook call that detected it; the pipeline
/// never degrades a failure into partial output.
#[derive(Debug, thiserror::Error)]
pub enum ChevaletError {
    /// The compiler could not split the source into blocks.
    #[error("failed to parse {filename}: {error}")]
    Parse { filename: String, error: SfcError },

    /// A block failed to compile.
    #[error("failed to compile {block} of {filename}: {error}")]
    Compile {
        filename: String,
        block: BlockKind,
        error: SfcError,
    },

    /// A sub-module was requested before its parent went through a main request.
    #[error("orphan sub-module request `{id}`: {filename} has not been loaded yet")]
    OrphanSubRequest { id: String, filename: String },

    /// The descriptor no longer has a block at the requested index.
    #[error("stale {kind} index {index} for {filename}: the component has {len} such block(s)")]
    StaleIndex {
        filename: String,
        kind: BlockKind,
        index: usize,
        len: usize,
    },

    /// The requested single block (script/template) does not exist.
    #[error("{filename} has no {kind} block")]
    MissingBlock { filename: String, kind: BlockKind },

    /// A `src`-referenced file could not be read.
    #[error("failed to read `{path}` referenced by {importer}: {source}")]
    ExternalRead {
        importer: String,
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The id carries the sub-module marker but is not a well-formed request.
    #[error("invalid virtual request `{id}`: {reason}")]
    InvalidRequest { id: String, reason: String },

    /// The compiled main module has no default export to attach HMR metadata to.
    #[error("compiled main module of {filename} has no `export default`")]
    MissingDefaultExport { filename: String },

    /// Configuration file could not be parsed.
    #[error("failed to parse {}: {source}", .path.display())]
    Config {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Include/exclude pattern is not a valid regular expression.
    #[error("invalid filter pattern: {0}")]
    Filter(#[from] regex::Error),

    /// A blocking hook task panicked or was cancelled.
    #[error("hook task failed: {0}")]
    Join(String),
}

impl ChevaletError {
    /// Whether the host should recover by fully reloading the parent component.
    pub fn requires_full_reload(&self) -> bool {
        matches!(self, Self::StaleIndex { .. })
    }
}

/// Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, ChevaletError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stale_index_requests_reload() {
        let error = ChevaletError::StaleIndex {
            filename: "/src/App.vue".into(),
            kind: BlockKind::Style,
            index: 1,
            len: 1,
        };
        assert!(error.requires_full_reload());
        assert_eq!(
            error.to_string(),
            "stale style index 1 for /src/App.vue: the component has 1 such block(s)"
        );
    }

    #[test]
    fn test_external_read_names_importer() {
        let error = ChevaletError::ExternalRead {
            importer: "/src/App.vue".into(),
            path: "/src/missing.css".into(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "not found"),
        };
        let message = error.to_string();
        assert!(message.contains("/src/App.vue"));
        assert!(message.contains("/src/missing.css"));
        assert!(!error.requires_full_reload());
    }
}
