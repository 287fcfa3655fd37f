//! Error types for buildkit-state
//!
//! All modules use `BkStateResult<T>` as their return type.

use crate::driver::mux::CloseError;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for buildkit-state operations
pub type BkStateResult<T> = Result<T, BkStateError>;

/// Stage of the snapshot pipeline an I/O failure came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferPhase {
    /// Extracting the state directory from the container
    ReadSource,
    /// Feeding the compressor or finalizing its output
    WriteCompressed,
    /// Downloading the compressed snapshot from the remote
    ReadCompressed,
    /// Decoding the compressed snapshot
    Decompress,
    /// Writing the decoded archive into the container
    Inject,
}

impl fmt::Display for TransferPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let phase = match self {
            Self::ReadSource => "could not read snapshot source",
            Self::WriteCompressed => "could not write compressed output",
            Self::ReadCompressed => "could not read compressed snapshot",
            Self::Decompress => "could not decompress snapshot",
            Self::Inject => "could not inject into destination",
        };
        f.write_str(phase)
    }
}

/// All errors that can occur in buildkit-state
#[derive(Error, Debug)]
pub enum BkStateError {
    // Configuration errors
    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    #[error("Failed to create config directory {path}: {source}")]
    ConfigDirCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Missing required input: {0}")]
    MissingInput(&'static str),

    #[error("Invalid value {value:?} for {name}: {reason}")]
    InvalidInput {
        name: &'static str,
        value: String,
        reason: String,
    },

    #[error("Compression level {level} is outside the supported range {min}..={max}")]
    CompressionLevel { level: i32, min: i32, max: i32 },

    #[error("Unknown record type: {0}")]
    UnknownRecordType(String),

    #[error("Unknown remote type: {0}. Only supports `gha`, `s3` or `local`")]
    UnknownRemote(String),

    #[error("Environment variable {0} is not set")]
    MissingEnv(&'static str),

    // Daemon errors
    #[error("Docker error while {context}: {source}")]
    Docker {
        context: String,
        #[source]
        source: bollard::errors::Error,
    },

    #[error("Failed to dial buildkitd in {container}: {reason}")]
    Dial { container: String, reason: String },

    #[error("Failed to connect buildkit control client: {0}")]
    ControlConnect(#[source] tonic::transport::Error),

    #[error("buildkit {op} call failed: {source}")]
    Control {
        op: &'static str,
        #[source]
        source: tonic::Status,
    },

    #[error("buildkit control client is not connected")]
    NotConnected,

    #[error(transparent)]
    Mux(#[from] CloseError),

    // Transfer errors
    #[error("{phase}: {source}")]
    Transfer {
        phase: TransferPhase,
        #[source]
        source: std::io::Error,
    },

    // Remote errors
    #[error("S3 error while {context}: {reason}")]
    S3 { context: String, reason: String },

    #[error("Actions cache error while {context}: {reason}")]
    ActionsCache { context: String, reason: String },

    #[error("HTTP error while {context}: {source}")]
    Http {
        context: String,
        #[source]
        source: reqwest::Error,
    },

    // IO errors
    #[error("IO error: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    // Aggregated errors
    #[error("{}", display_joined(.0))]
    Joined(Vec<BkStateError>),

    // General errors
    #[error("Internal error: {0}")]
    Internal(String),
}

fn display_joined(errors: &[BkStateError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl BkStateError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a Docker API error with context
    pub fn docker(context: impl Into<String>, source: bollard::errors::Error) -> Self {
        Self::Docker {
            context: context.into(),
            source,
        }
    }

    /// Create a pipeline error tagged with the phase that produced it
    pub fn transfer(phase: TransferPhase, source: std::io::Error) -> Self {
        Self::Transfer { phase, source }
    }

    /// Create an S3 error from any displayable SDK error
    pub fn s3(context: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self::S3 {
            context: context.into(),
            reason: reason.to_string(),
        }
    }

    /// Create an HTTP transport error with context
    pub fn http(context: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Http {
            context: context.into(),
            source,
        }
    }

    /// Combine two failures so neither is lost.
    ///
    /// Nested joins are flattened.
    pub fn join(self, other: BkStateError) -> Self {
        let mut errors = Vec::new();
        for err in [self, other] {
            match err {
                Self::Joined(inner) => errors.extend(inner),
                err => errors.push(err),
            }
        }
        Self::Joined(errors)
    }

    /// Fold a list of failures into one, if there are any
    pub fn combine(errors: Vec<BkStateError>) -> Option<Self> {
        errors.into_iter().reduce(Self::join)
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::Docker { .. } => {
                Some("Check that Docker is running and the buildx builder uses the docker-container driver")
            }
            Self::Dial { .. } | Self::ControlConnect(_) => {
                Some("The builder container must be running and ship `buildctl`")
            }
            Self::NotConnected => Some("Resume the builder before issuing control calls"),
            Self::MissingEnv(_) => {
                Some("The gha remote only works inside a GitHub Actions job; use --remote-type s3 or local elsewhere")
            }
            Self::CompressionLevel { .. } => Some("Levels 1 to 22 are the conventional zstd range"),
            Self::MissingInput(_) => Some("Pass the value as a flag or set the matching INPUT_* variable"),
            _ => None,
        }
    }
}
