use std::path::PathBuf;

/// Errors surfaced by the fitting engine.
///
/// Variants are grouped the way callers need to react to them:
///
/// - configuration problems (bad device index, unknown model) are fatal and
///   reported before any compute resource is allocated
/// - data shape problems are fatal at load time, before dispatch
/// - dispatch failures abort the whole batch
///
/// Per-voxel numerical trouble is never an `Error`; it is recorded as a
/// [`FitStatus`](crate::domain::FitStatus) on that voxel's result.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("device index {index} is out of range ({available} devices available)")]
    DeviceIndex { index: usize, available: usize },

    #[error("unknown model '{name}' (available: {available})")]
    UnknownModel { name: String, available: String },

    #[error("model '{0}' is already registered")]
    DuplicateModel(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("protocol has {protocol_rows} rows but the signal has {signal_volumes} volumes")]
    ProtocolMismatch {
        protocol_rows: usize,
        signal_volumes: usize,
    },

    #[error("{what}: expected spatial shape {expected:?}, got {actual:?}")]
    ShapeMismatch {
        what: &'static str,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("protocol '{}' line {line}: {message}", path.display())]
    Protocol {
        path: PathBuf,
        line: usize,
        message: String,
    },

    #[error("volume '{}': {message}", path.display())]
    Volume { path: PathBuf, message: String },

    #[error("got {results} fit results for a batch of {voxels} voxels")]
    ResultMismatch { results: usize, voxels: usize },

    #[error("no compute device available")]
    NoComputeDeviceAvailable,

    #[error("dispatch to device '{device}' failed: {message}")]
    ComputeDispatch { device: String, message: String },

    #[error("{context} '{}': {source}", path.display())]
    Io {
        context: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("fitting was cancelled before model '{0}'")]
    Cancelled(String),
}

impl Error {
    /// Process exit code for the `voxfit` binary.
    pub fn exit_code(&self) -> u8 {
        match self {
            Error::DeviceIndex { .. }
            | Error::UnknownModel { .. }
            | Error::DuplicateModel(_)
            | Error::InvalidConfig(_) => 2,
            Error::ProtocolMismatch { .. }
            | Error::ShapeMismatch { .. }
            | Error::Protocol { .. }
            | Error::Volume { .. }
            | Error::ResultMismatch { .. } => 3,
            Error::NoComputeDeviceAvailable | Error::ComputeDispatch { .. } => 4,
            Error::Io { .. } => 5,
            Error::Cancelled(_) => 130,
        }
    }

    pub(crate) fn io(context: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            context,
            path: path.into(),
            source,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
