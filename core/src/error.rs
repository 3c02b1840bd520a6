use thiserror::Error;

/// Error taxonomy for the parsing engine.
///
/// `FormatViolation` means the on-disk bytes broke a structural invariant and
/// the current operation must not continue; a bad offset in a corrupt (or
/// hostile) structure is never followed. `NotSupported` is the opposite:
/// structurally valid data the engine deliberately does not handle.
/// `InvariantViolation` indicates a defect in the engine itself, not bad disk
/// data.
#[derive(Debug, Error)]
pub enum RelicError {
    #[error("format violation: {0}")]
    FormatViolation(String),

    #[error("device I/O error: {0}")]
    DeviceIo(#[from] std::io::Error),

    #[error("not supported: {0}")]
    NotSupported(String),

    #[error("internal invariant violation: {0}")]
    InvariantViolation(String),

    #[error("invalid argument: {0}")]
    InvalidInput(String),
}

impl RelicError {
    /// Native OS error code for device failures, when the platform reported one.
    pub fn os_code(&self) -> Option<i32> {
        match self {
            RelicError::DeviceIo(e) => e.raw_os_error(),
            _ => None,
        }
    }
}
