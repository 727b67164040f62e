use crate::{ManagedProcess, ProcessError, ProcessGroup, ProcessSpec, ProcessStatus, Result};
use std::sync::Arc;
use tracing::debug;

/// Outcome of a tool run to completion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedProcess {
    pub command: String,
    pub status: ProcessStatus,
    /// Merged stdout/stderr, one entry per line
    pub lines: Vec<String>,
}

impl CompletedProcess {
    pub fn exit_code(&self) -> Option<i32> {
        self.status.exit_code()
    }

    pub fn success(&self) -> bool {
        self.status == ProcessStatus::Exited(0)
    }
}

/// Spawn `spec` into `group`, collect all of its output and wait for it.
///
/// The process is disposed before returning, on success and on error.
pub async fn run_to_completion<G: ProcessGroup>(
    group: &Arc<G>,
    spec: ProcessSpec,
) -> Result<CompletedProcess> {
    let mut process = ManagedProcess::spawn(group, spec).await?;

    let lines = match process.read_all_lines().await {
        Ok(lines) => lines,
        Err(e) => {
            process.dispose().await;
            return Err(ProcessError::os("read output", e));
        }
    };

    let status = match process.wait_for_exit(None).await {
        Ok(status) => status,
        Err(e) => {
            process.dispose().await;
            return Err(e);
        }
    };
    process.dispose().await;

    debug!(command = %process.command(), ?status, lines = lines.len(), "Process ran to completion");
    Ok(CompletedProcess {
        command: process.command().to_string(),
        status,
        lines,
    })
}
