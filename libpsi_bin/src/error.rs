use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum LayoutError {
    #[error("Field {name} at offset {offset} (width {width}) exceeds buffer of {len} bytes")]
    OutOfBounds {
        name: &'static str,
        offset: usize,
        width: usize,
        len: usize,
    },
    #[error("Field {name} has {count} elements, expected at most {max}")]
    TooManyElements {
        name: &'static str,
        count: usize,
        max: usize,
    },
    #[error("Field {0} was accessed with the wrong value kind")]
    KindMismatch(&'static str),
}

/// Failures of the decode/encode entry points.
///
/// Each variant maps to the legacy integer status through [`CodecError::code`].
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Could not open file {path:?}: {source}")]
    OpenFailed {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to read header: {0}")]
    HeaderReadFailed(String),
    #[error("Unsupported format version {0:?}")]
    UnsupportedFormatVersion(String),
    #[error("Failed to allocate buffer: {0}")]
    AllocationFailed(String),
    #[error("Number of histograms per record is {0}, not 1; the required algorithm is not implemented")]
    UnsupportedRecordGeometry(i16),
    #[error("Invalid histogram count: {0}")]
    HistogramCountInvalid(String),
    #[error("Failed to read histogram data: {0}")]
    DataReadFailed(String),
    #[error("Data consistency check failed: {0}")]
    ConsistencyViolation(String),
    #[error("Failed to write file: {0}")]
    WriteFailed(#[from] std::io::Error),
}

impl CodecError {
    /// Legacy small integer status code (0 is reserved for success)
    pub fn code(&self) -> i32 {
        match self {
            Self::OpenFailed { .. } => 1,
            Self::HeaderReadFailed(_) => 2,
            Self::UnsupportedFormatVersion(_) => 3,
            Self::AllocationFailed(_) => 4,
            Self::UnsupportedRecordGeometry(_) => 5,
            Self::HistogramCountInvalid(_) => 6,
            Self::DataReadFailed(_) => 7,
            Self::ConsistencyViolation(_) => 8,
            Self::WriteFailed(_) => 9,
        }
    }
}

impl From<LayoutError> for CodecError {
    fn from(value: LayoutError) -> Self {
        Self::HeaderReadFailed(value.to_string())
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration as file {0:?} does not exist")]
    BadFilePath(PathBuf),
    #[error("Config failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Config failed to parse YAML: {0}")]
    ParsingError(#[from] serde_yaml::Error),
    #[error("Config has an invalid value: {0}")]
    InvalidValue(String),
}

#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error("Processor failed due to Config error: {0}")]
    ConfigError(#[from] ConfigError),
    #[error("Processor failed due to codec error: {0}")]
    CodecError(#[from] CodecError),
    #[error("Processor failed due to IO error: {0}")]
    IoError(#[from] std::io::Error),
}
