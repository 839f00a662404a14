use thiserror::Error;

/// Errors from decoding progress values.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProgressParseError {
    #[error("unknown progress state: {0}")]
    UnknownState(String),

    #[error("invalid progress percentage: {0}")]
    InvalidPercent(String),

    #[error("progress text must look like '<State>:<percent>', got '{0}'")]
    MalformedText(String),

    #[error("progress value must carry exactly one state, got {0}")]
    StateCount(usize),
}
