use crate::config::ProcessSpec;
use crate::error::{ProcessError, Result};
use crate::output::{OutputReader, OutputStream};
use crate::process::{BoxedInput, ProcessGroup, ProcessHandle, ProcessId, ProcessStatus, SpawnedProcess};
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// One child process spawned into a [`ProcessGroup`].
///
/// Owns the native process handle, the parent end of the stdin pipe (only
/// during construction) and the buffered reader over merged stdout/stderr.
/// Refers to its group, which stays the backstop that kills it if it is
/// never disposed.
pub struct ManagedProcess<G: ProcessGroup> {
    group: Arc<G>,
    handle: Option<G::Handle>,
    output: Option<OutputStream>,
    status: Option<ProcessStatus>,
    command: String,
}

impl<G: ProcessGroup> ManagedProcess<G> {
    /// Launch `spec` inside `group`, feed it its stdin payload and close stdin.
    ///
    /// Any failure leaves nothing behind: pipes are closed and a child that
    /// was already created is killed and reaped before the error is returned.
    pub async fn spawn(group: &Arc<G>, spec: ProcessSpec) -> Result<Self> {
        spec.validate()?;
        let command = spec.display_command();

        let SpawnedProcess {
            mut handle,
            stdin,
            output,
        } = group.spawn(&spec)?;

        info!(
            pid = ?handle.pid(),
            command = %command,
            priority = ?spec.priority,
            platform = G::platform_name(),
            "Spawned managed process"
        );

        if let Err(e) = feed_stdin(stdin, spec.stdin.as_deref()).await {
            warn!(pid = ?handle.pid(), error = %e, "Writing stdin failed, killing child");
            if let Err(e) = handle.start_kill() {
                warn!(error = %e, "Failed to kill child after stdin failure");
            }
            group.forget(&handle);
            let _ = handle.wait().await;
            return Err(ProcessError::os("write stdin", e));
        }

        Ok(Self {
            group: group.clone(),
            handle: Some(handle),
            output: Some(OutputReader::new(output)),
            status: None,
            command,
        })
    }

    /// Process ID, `None` once disposed
    pub fn pid(&self) -> Option<ProcessId> {
        self.handle.as_ref().and_then(|handle| handle.pid())
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn group(&self) -> &Arc<G> {
        &self.group
    }

    /// Read raw output bytes; `Ok(0)` means the child closed its output
    pub async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.output_mut()?.read(buf).await
    }

    /// Drain merged stdout/stderr to end of stream and split it into lines
    pub async fn read_all_lines(&mut self) -> io::Result<Vec<String>> {
        self.output_mut()?.read_all_lines().await
    }

    /// Next output line; `None` at end of stream, on cancellation or after
    /// disposal
    pub async fn try_read_line(&mut self, cancel: &CancellationToken) -> Option<String> {
        match self.output.as_mut() {
            Some(output) => output.try_read_line(cancel).await,
            None => None,
        }
    }

    /// Current status without blocking
    pub fn status(&mut self) -> Result<ProcessStatus> {
        if let Some(status) = self.status {
            return Ok(status);
        }

        let Some(handle) = self.handle.as_mut() else {
            return Err(ProcessError::os(
                "wait",
                io::Error::new(io::ErrorKind::NotFound, "process handle was released"),
            ));
        };

        match handle.try_wait().map_err(|e| ProcessError::os("wait", e))? {
            Some(status) => {
                debug!(pid = ?handle.pid(), status = ?status, "Managed process exited");
                self.group.exited(handle);
                self.status = Some(status);
                Ok(status)
            }
            None => Ok(ProcessStatus::Running),
        }
    }

    /// Exit code of an exited process; [`ProcessError::NotExited`] while it runs
    pub fn exit_code(&mut self) -> Result<i32> {
        self.status()?.exit_code().ok_or(ProcessError::NotExited)
    }

    pub fn is_running(&mut self) -> bool {
        match self.status() {
            Ok(status) => status.is_running(),
            Err(e) => {
                debug!(error = %e, "Status query failed, reporting not running");
                false
            }
        }
    }

    /// Wait for the child to exit on its own.
    ///
    /// Output is not drained meanwhile; a child blocked on a full pipe will
    /// not exit until someone reads.
    pub async fn wait_for_exit(&mut self, timeout: Option<Duration>) -> Result<ProcessStatus> {
        if let Some(status) = self.status {
            return Ok(status);
        }

        let handle = self.handle.as_mut().ok_or_else(|| {
            ProcessError::os(
                "wait",
                io::Error::new(io::ErrorKind::NotFound, "process handle was released"),
            )
        })?;

        let status = match timeout {
            Some(duration) => tokio::time::timeout(duration, handle.wait())
                .await
                .map_err(|_| ProcessError::Timeout(format!("waiting for {}", self.command)))?,
            None => handle.wait().await,
        }
        .map_err(|e| ProcessError::os("wait", e))?;

        self.group.exited(handle);
        self.status = Some(status);
        Ok(status)
    }

    /// Terminate if still alive, block until the OS confirms exit, then
    /// release the process handle and the output pipe. Idempotent.
    ///
    /// Returns the final status, or `None` if the OS could not report one.
    pub async fn dispose(&mut self) -> Option<ProcessStatus> {
        let Some(handle) = self.handle.as_mut() else {
            return self.status;
        };

        if self.status.is_none() {
            if let Err(e) = handle.start_kill() {
                warn!(pid = ?handle.pid(), error = %e, "Failed to request termination");
            }
            self.group.forget(handle);

            match handle.wait().await {
                Ok(status) => {
                    debug!(pid = ?handle.pid(), status = ?status, "Managed process disposed");
                    self.status = Some(status);
                }
                Err(e) => {
                    warn!(pid = ?handle.pid(), error = %e, "Failed to confirm process exit");
                }
            }
        } else {
            self.group.forget(handle);
        }

        self.output = None;
        self.handle = None;
        self.status
    }

    fn output_mut(&mut self) -> io::Result<&mut OutputStream> {
        self.output.as_mut().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotConnected,
                "process output was released by dispose",
            )
        })
    }
}

impl<G: ProcessGroup> Drop for ManagedProcess<G> {
    fn drop(&mut self) {
        let Some(handle) = self.handle.as_mut() else {
            return;
        };

        if self.status.is_none() && !matches!(handle.try_wait(), Ok(Some(_))) {
            warn!(
                pid = ?handle.pid(),
                command = %self.command,
                "Managed process dropped without dispose, killing it"
            );
            if let Err(e) = handle.start_kill() {
                warn!(pid = ?handle.pid(), error = %e, "Emergency kill failed");
            }
        }
        self.group.forget(handle);
    }
}

/// Write the stdin payload, then close the pipe so the child sees end-of-file
async fn feed_stdin(mut stdin: BoxedInput, bytes: Option<&[u8]>) -> io::Result<()> {
    if let Some(bytes) = bytes {
        let written = match stdin.write_all(bytes).await {
            Ok(()) => stdin.flush().await,
            Err(e) => Err(e),
        };
        match written {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {
                debug!("Child closed stdin before consuming its input");
            }
            Err(e) => return Err(e),
        }
    }

    drop(stdin);
    Ok(())
}
