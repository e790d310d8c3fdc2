use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, TransformError>;

#[derive(Debug, Error)]
pub enum TransformError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("directory walk failed: {0}")]
    Walk(#[from] walkdir::Error),

    /// Two rewrite rules matched the same text. Always a bug in the transformer.
    #[error("overlapping replacements {first:?} and {second:?}")]
    OverlappingReplacements {
        first: (usize, usize),
        second: (usize, usize),
    },

    #[error("replacement {start}..{end} does not fit a source of {len} bytes")]
    InvalidReplacement { start: usize, end: usize, len: usize },

    #[error("invalid configuration: {0}")]
    Config(#[from] serde_json::Error),

    #[error("invalid file pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    #[error("source map generation failed: {0}")]
    SourceMap(String),

    #[error("server function registry used before build start")]
    RegistryNotBuilt,
}
