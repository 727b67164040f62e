use async_trait::async_trait;
use buildproc_core::{
    GroupOptions, Priority, ProcessError, ProcessGroup, ProcessHandle, ProcessId, ProcessSpec,
    ProcessStatus, Result, SpawnedProcess, spawn_lock,
};
use std::io::{self, Cursor};
use std::process::Stdio;
use std::sync::{Mutex, MutexGuard, PoisonError};
use sysinfo::{Pid, ProcessesToUpdate, System};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::io::StreamReader;
use tracing::{debug, info, warn};

const PUMP_CHUNK: usize = 8 * 1024;
const PUMP_DEPTH: usize = 16;

type Chunk = io::Result<Cursor<Vec<u8>>>;

/// Handle to a child spawned by [`PortableProcessGroup`]
pub struct PortableProcessHandle {
    child: Child,
    // membership key, kept after the child is reaped
    pid: ProcessId,
}

#[async_trait]
impl ProcessHandle for PortableProcessHandle {
    fn pid(&self) -> Option<ProcessId> {
        self.child.id()
    }

    fn try_wait(&mut self) -> io::Result<Option<ProcessStatus>> {
        Ok(self.child.try_wait()?.map(ProcessStatus::from))
    }

    async fn wait(&mut self) -> io::Result<ProcessStatus> {
        Ok(self.child.wait().await?.into())
    }

    fn start_kill(&mut self) -> io::Result<()> {
        match self.child.start_kill() {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::InvalidInput => Ok(()),
            Err(e) => Err(e),
        }
    }
}

/// Process group that works anywhere `tokio::process` does.
///
/// Membership is an explicit list of pids, killed one by one on disposal.
/// Unlike the native groups this reaches neither grandchildren nor survives
/// a crash of the owning process.
pub struct PortableProcessGroup {
    members: Mutex<Option<Vec<ProcessId>>>,
    options: GroupOptions,
}

impl PortableProcessGroup {
    pub fn options(&self) -> &GroupOptions {
        &self.options
    }

    pub fn member_count(&self) -> usize {
        self.members().as_ref().map_or(0, Vec::len)
    }

    fn members(&self) -> MutexGuard<'_, Option<Vec<ProcessId>>> {
        self.members.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ProcessGroup for PortableProcessGroup {
    type Handle = PortableProcessHandle;

    fn create(options: GroupOptions) -> Result<Self> {
        debug!("Creating portable process group");
        if options.allow_breakaway {
            debug!("allow_breakaway has no effect on the portable process group");
        }
        Ok(Self {
            members: Mutex::new(Some(Vec::new())),
            options,
        })
    }

    fn spawn(&self, spec: &ProcessSpec) -> Result<SpawnedProcess<PortableProcessHandle>> {
        if self.is_disposed() {
            return Err(ProcessError::GroupDisposed);
        }

        let mut command = Command::new(&spec.executable);
        command
            .args(&spec.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(dir) = &spec.working_directory {
            command.current_dir(dir);
        }

        if let Some(env) = &spec.env {
            command.env_clear();
            command.envs(env.iter().map(|(key, value)| (key, value)));
        }

        let mut child = {
            let _guard = spawn_lock();
            command.spawn().map_err(|e| ProcessError::os("spawn", e))?
        };

        let Some(pid) = child.id() else {
            return Err(ProcessError::os(
                "spawn",
                io::Error::new(io::ErrorKind::NotFound, "child exited before it was tracked"),
            ));
        };

        let (Some(stdin), Some(stdout), Some(stderr)) =
            (child.stdin.take(), child.stdout.take(), child.stderr.take())
        else {
            return Err(ProcessError::os(
                "spawn",
                io::Error::other("child pipes were not created"),
            ));
        };

        apply_priority(pid, spec.priority);

        {
            let mut members = self.members();
            match members.as_mut() {
                Some(members) => members.push(pid),
                None => {
                    warn!(pid, "Group disposed during spawn, killing new member");
                    let _ = child.start_kill();
                    return Err(ProcessError::GroupDisposed);
                }
            }
        }

        let (sender, receiver) = mpsc::channel(PUMP_DEPTH);
        tokio::spawn(pump(stdout, sender.clone()));
        tokio::spawn(pump(stderr, sender));
        let output = StreamReader::new(ReceiverStream::new(receiver));

        debug!(
            pid,
            executable = %spec.executable.display(),
            "Spawned portable process"
        );

        Ok(SpawnedProcess {
            handle: PortableProcessHandle { child, pid },
            stdin: Box::new(stdin),
            output: Box::new(output),
        })
    }

    fn forget(&self, handle: &PortableProcessHandle) {
        if let Some(members) = self.members().as_mut() {
            members.retain(|pid| *pid != handle.pid);
        }
    }

    fn dispose(&self) {
        let Some(members) = self.members().take() else {
            return;
        };

        info!(count = members.len(), "Disposing portable process group");
        if members.is_empty() {
            return;
        }

        let pids: Vec<Pid> = members.iter().copied().map(Pid::from_u32).collect();
        let mut system = System::new();
        system.refresh_processes(ProcessesToUpdate::Some(&pids), true);

        for pid in pids {
            match system.process(pid) {
                Some(process) if process.kill() => debug!(pid = %pid, "Killed member"),
                Some(_) => warn!(pid = %pid, "Failed to kill member"),
                None => debug!(pid = %pid, "Member already gone"),
            }
        }
    }

    fn is_disposed(&self) -> bool {
        self.members().is_none()
    }

    fn platform_name() -> &'static str {
        "portable"
    }
}

impl Drop for PortableProcessGroup {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Forward one child stream into the shared output channel until it closes
async fn pump<R: AsyncRead + Unpin>(mut reader: R, sender: mpsc::Sender<Chunk>) {
    let mut buf = vec![0u8; PUMP_CHUNK];
    loop {
        let chunk = match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => Ok(Cursor::new(buf[..n].to_vec())),
            Err(e) => Err(e),
        };
        let failed = chunk.is_err();
        if sender.send(chunk).await.is_err() || failed {
            break;
        }
    }
}

#[cfg(unix)]
fn apply_priority(pid: ProcessId, priority: Priority) {
    let nice = priority.nice_value();
    if nice == 0 {
        return;
    }

    // SAFETY: plain syscall on a child we own
    let result = unsafe { libc::setpriority(libc::PRIO_PROCESS, pid as libc::id_t, nice) };
    if result == -1 {
        debug!(pid, nice, error = %io::Error::last_os_error(), "Could not apply priority");
    }
}

#[cfg(not(unix))]
fn apply_priority(pid: ProcessId, priority: Priority) {
    if priority != Priority::Normal {
        debug!(pid, ?priority, "Priority is not supported by the portable group here");
    }
}
