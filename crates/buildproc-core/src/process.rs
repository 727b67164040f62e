use crate::config::{GroupOptions, ProcessSpec};
use crate::error::Result;
use async_trait::async_trait;
use std::io;
use tokio::io::{AsyncRead, AsyncWrite};

/// Unique identifier for a process
pub type ProcessId = u32;

/// Status of a managed process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    /// Process is currently running
    Running,
    /// Process exited on its own with the given exit code
    Exited(i32),
    /// Process was terminated by a signal (Unix) or forcibly terminated
    /// (Windows). Carries the conventional exit code for that termination.
    Killed(i32),
}

impl ProcessStatus {
    pub fn is_running(&self) -> bool {
        matches!(self, ProcessStatus::Running)
    }

    pub fn is_killed(&self) -> bool {
        matches!(self, ProcessStatus::Killed(_))
    }

    /// Exit code, or `None` while the process is still running
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            ProcessStatus::Running => None,
            ProcessStatus::Exited(code) | ProcessStatus::Killed(code) => Some(*code),
        }
    }
}

impl From<std::process::ExitStatus> for ProcessStatus {
    fn from(status: std::process::ExitStatus) -> Self {
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(signal) = status.signal() {
                return ProcessStatus::Killed(128 + signal);
            }
        }

        match status.code() {
            Some(code) => ProcessStatus::Exited(code),
            None => ProcessStatus::Killed(-1),
        }
    }
}

/// Handle to one native child process.
///
/// Implementations own the OS process handle and release it on drop.
#[async_trait]
pub trait ProcessHandle: Send + Sync {
    /// Get the process ID (None if it is no longer known)
    fn pid(&self) -> Option<ProcessId>;

    /// Query the exit status without blocking
    fn try_wait(&mut self) -> io::Result<Option<ProcessStatus>>;

    /// Wait until the OS confirms the process has exited
    async fn wait(&mut self) -> io::Result<ProcessStatus>;

    /// Request forced termination without waiting. Already-exited processes
    /// are not an error.
    fn start_kill(&mut self) -> io::Result<()>;
}

/// Output stream handed over by a platform spawner: stdout with stderr merged in
pub type BoxedOutput = Box<dyn AsyncRead + Send + Unpin>;

/// Parent end of the child's stdin pipe
pub type BoxedInput = Box<dyn AsyncWrite + Send + Unpin>;

/// A freshly started child whose pipes have not been touched yet
pub struct SpawnedProcess<H: ProcessHandle> {
    pub handle: H,
    pub stdin: BoxedInput,
    pub output: BoxedOutput,
}

/// OS-level container guaranteeing that every process spawned into it is
/// terminated once the group is disposed.
///
/// Implementations spawn their members themselves, because group assignment
/// has to happen between process creation and the first instruction the
/// child executes.
pub trait ProcessGroup: Send + Sync + 'static {
    /// The type of process handle this group produces
    type Handle: ProcessHandle;

    /// Allocate the grouping primitive
    fn create(options: GroupOptions) -> Result<Self>
    where
        Self: Sized;

    /// Create a process inside this group with stdin and merged stdout/stderr
    /// redirected to pipes. Fails with [`crate::ProcessError::GroupDisposed`]
    /// once the group has been disposed.
    fn spawn(&self, spec: &ProcessSpec) -> Result<SpawnedProcess<Self::Handle>>;

    /// Called when a member has been disposed individually
    fn forget(&self, _handle: &Self::Handle) {}

    /// Called once a member's exit status has been collected outside of
    /// disposal. The OS may hand its id to an unrelated process from now on,
    /// so by default the member is forgotten.
    fn exited(&self, handle: &Self::Handle) {
        self.forget(handle);
    }

    /// Terminate every member and release the primitive. Idempotent.
    fn dispose(&self);

    fn is_disposed(&self) -> bool;

    /// Get the platform name for logging and debugging
    fn platform_name() -> &'static str
    where
        Self: Sized;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_accessors() {
        assert!(ProcessStatus::Running.is_running());
        assert_eq!(ProcessStatus::Running.exit_code(), None);
        assert_eq!(ProcessStatus::Exited(3).exit_code(), Some(3));
        assert!(ProcessStatus::Killed(137).is_killed());
        assert!(!ProcessStatus::Exited(0).is_killed());
        assert_eq!(ProcessStatus::Killed(137).exit_code(), Some(137));
    }

    #[cfg(unix)]
    #[test]
    fn test_status_from_exit_status() {
        use std::os::unix::process::ExitStatusExt;

        let exited = std::process::ExitStatus::from_raw(2 << 8);
        assert_eq!(ProcessStatus::from(exited), ProcessStatus::Exited(2));

        let killed = std::process::ExitStatus::from_raw(9);
        assert_eq!(ProcessStatus::from(killed), ProcessStatus::Killed(137));
    }
}
