use thiserror::Error;

/// Error types for managed process operations
#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("{call} failed: {source}")]
    Os {
        call: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("Process group has already been disposed")]
    GroupDisposed,

    #[error("Process has not exited yet")]
    NotExited,

    #[error("Timeout occurred: {0}")]
    Timeout(String),

    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

pub type Result<T, E = ProcessError> = std::result::Result<T, E>;

impl ProcessError {
    /// Wrap an OS error together with the name of the call that produced it
    pub fn os(call: &'static str, source: std::io::Error) -> Self {
        ProcessError::Os { call, source }
    }

    /// Capture `errno` / `GetLastError` for the named call
    pub fn last_os_error(call: &'static str) -> Self {
        Self::os(call, std::io::Error::last_os_error())
    }

    /// Raw OS error code, if this error came from an OS call
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            ProcessError::Os { source, .. } => source.raw_os_error(),
            _ => None,
        }
    }

    /// Name of the failing OS call, if any
    pub fn os_call(&self) -> Option<&'static str> {
        match self {
            ProcessError::Os { call, .. } => Some(call),
            _ => None,
        }
    }

    /// Check if this error indicates a failure that repeating the call cannot fix
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            ProcessError::ConfigurationError(_) | ProcessError::GroupDisposed
        )
    }
}
