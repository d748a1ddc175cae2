use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PackageError {
    #[error("i/o error on {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid model descriptor {}", path.display())]
    Descriptor {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("model descriptor has no `{0}` flavor")]
    MissingFlavor(&'static str),
    #[error("package has no artifact `{0}`")]
    MissingArtifact(String),
    #[error("weights digest mismatch: expected {expected}, found {actual}")]
    DigestMismatch { expected: String, actual: String },
    #[error("cannot record model: {0}")]
    Record(String),
    #[error("invalid model config: {0}")]
    Config(String),
    #[error("row {row} has {width} values, expected {expected}")]
    RowWidth {
        row: usize,
        width: usize,
        expected: usize,
    },
    #[error("cannot read prediction tensor: {0}")]
    Tensor(String),
}

impl PackageError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
