#[cfg(unix)]
mod unix_impl {
    use async_trait::async_trait;
    use buildproc_core::{
        GroupOptions, ProcessError, ProcessGroup, ProcessHandle, ProcessId, ProcessSpec,
        ProcessStatus, Result, SpawnedProcess, spawn_lock,
    };
    use nix::errno::Errno;
    use nix::sys::signal::{self, Signal};
    use nix::unistd::Pid as NixPid;
    use std::io;
    use std::os::fd::OwnedFd;
    use std::process::Stdio;
    use std::sync::{Mutex, MutexGuard, PoisonError};
    use tokio::net::unix::pipe;
    use tokio::process::{Child, Command};
    use tracing::{debug, info, warn};

    /// Unix-specific process handle implementation
    pub struct UnixProcessHandle {
        child: Child,
        pgid: NixPid,
    }

    impl UnixProcessHandle {
        /// Process group the child leads
        pub fn process_group_id(&self) -> i32 {
            self.pgid.as_raw()
        }
    }

    #[async_trait]
    impl ProcessHandle for UnixProcessHandle {
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
            // Whole group first so helpers the tool forked die with it
            match signal::killpg(self.pgid, Signal::SIGKILL) {
                Ok(()) => debug!(pgid = self.pgid.as_raw(), "Sent SIGKILL to process group"),
                Err(Errno::ESRCH) => {}
                Err(e) => warn!(pgid = self.pgid.as_raw(), error = %e, "killpg failed"),
            }

            match self.child.start_kill() {
                Ok(()) => Ok(()),
                // already reaped
                Err(e) if e.kind() == io::ErrorKind::InvalidInput => Ok(()),
                Err(e) => Err(e),
            }
        }
    }

    /// Process group backed by POSIX process groups.
    ///
    /// Unix has no kernel object that owns a set of unrelated process groups,
    /// so this keeps the ids of the member groups and signals each one on
    /// disposal. `None` marks a disposed group.
    pub struct UnixProcessGroup {
        members: Mutex<Option<Vec<NixPid>>>,
        options: GroupOptions,
    }

    impl UnixProcessGroup {
        pub fn options(&self) -> &GroupOptions {
            &self.options
        }

        /// Number of member process groups still tracked
        pub fn member_count(&self) -> usize {
            self.members().as_ref().map_or(0, Vec::len)
        }

        fn members(&self) -> MutexGuard<'_, Option<Vec<NixPid>>> {
            self.members.lock().unwrap_or_else(PoisonError::into_inner)
        }
    }

    impl ProcessGroup for UnixProcessGroup {
        type Handle = UnixProcessHandle;

        fn create(options: GroupOptions) -> Result<Self> {
            debug!("Creating Unix process group");
            if options.allow_breakaway {
                debug!("allow_breakaway has no effect on Unix process groups");
            }
            Ok(Self {
                members: Mutex::new(Some(Vec::new())),
                options,
            })
        }

        fn spawn(&self, spec: &ProcessSpec) -> Result<SpawnedProcess<UnixProcessHandle>> {
            if self.is_disposed() {
                return Err(ProcessError::GroupDisposed);
            }

            let mut command = Command::new(&spec.executable);
            command.args(&spec.args);

            if let Some(dir) = &spec.working_directory {
                command.current_dir(dir);
            }

            if let Some(env) = &spec.env {
                command.env_clear();
                command.envs(env.iter().map(|(key, value)| (key, value)));
            }

            // Own process group, joined between fork and exec so the tool
            // never runs outside it
            command.process_group(0);
            command.kill_on_drop(true);

            let nice = spec.priority.nice_value();
            if nice != 0 {
                // SAFETY: setpriority is async-signal-safe and touches no
                // parent state
                unsafe {
                    command.pre_exec(move || {
                        set_niceness(nice);
                        Ok(())
                    });
                }
            }

            let (child, stdin, output) = {
                let _guard = spawn_lock();

                let (stdin_read, stdin_write) = cloexec_pipe()?;
                let (output_read, output_write) = cloexec_pipe()?;
                let error_write = output_write
                    .try_clone()
                    .map_err(|e| ProcessError::os("dup", e))?;

                command
                    .stdin(Stdio::from(stdin_read))
                    .stdout(Stdio::from(output_write))
                    .stderr(Stdio::from(error_write));

                let child = command.spawn().map_err(|e| ProcessError::os("spawn", e))?;

                // The command still owns the child-side pipe ends; an extra
                // write end left open here would keep our reader from ever
                // seeing end-of-file
                drop(command);

                (child, stdin_write, output_read)
            };

            let Some(pid) = child.id() else {
                return Err(ProcessError::os(
                    "spawn",
                    io::Error::new(io::ErrorKind::NotFound, "child exited before it was tracked"),
                ));
            };
            let pgid = NixPid::from_raw(pid as i32);

            // Dropping `child` on any error below kills it (kill_on_drop)
            let stdin = pipe::Sender::from_owned_fd(stdin)
                .map_err(|e| ProcessError::os("register stdin pipe", e))?;
            let output = pipe::Receiver::from_owned_fd(output)
                .map_err(|e| ProcessError::os("register output pipe", e))?;

            {
                let mut members = self.members();
                match members.as_mut() {
                    Some(members) => members.push(pgid),
                    None => {
                        warn!(pid, "Group disposed during spawn, killing new member");
                        let _ = signal::killpg(pgid, Signal::SIGKILL);
                        return Err(ProcessError::GroupDisposed);
                    }
                }
            }

            debug!(
                pid,
                executable = %spec.executable.display(),
                nice,
                "Spawned Unix process"
            );

            Ok(SpawnedProcess {
                handle: UnixProcessHandle { child, pgid },
                stdin: Box::new(stdin),
                output: Box::new(output),
            })
        }

        fn forget(&self, handle: &UnixProcessHandle) {
            if let Some(members) = self.members().as_mut() {
                members.retain(|pgid| *pgid != handle.pgid);
            }
        }

        /// The leader has been reaped, but tools it started in the background
        /// may still live in its process group; those keep the pgid in use,
        /// so it stays a kill target until the group is empty.
        fn exited(&self, handle: &UnixProcessHandle) {
            match signal::killpg(handle.pgid, None) {
                Err(Errno::ESRCH) => self.forget(handle),
                _ => debug!(
                    pgid = handle.pgid.as_raw(),
                    "Leader exited, keeping its process group as a member"
                ),
            }
        }

        fn dispose(&self) {
            let Some(members) = self.members().take() else {
                return;
            };

            info!(count = members.len(), "Disposing Unix process group");
            for pgid in members {
                match signal::killpg(pgid, Signal::SIGKILL) {
                    Ok(()) => debug!(pgid = pgid.as_raw(), "Sent SIGKILL to member group"),
                    Err(Errno::ESRCH) => {
                        debug!(pgid = pgid.as_raw(), "Member group already gone")
                    }
                    Err(e) => {
                        warn!(pgid = pgid.as_raw(), error = %e, "Failed to kill member group")
                    }
                }
            }
        }

        fn is_disposed(&self) -> bool {
            self.members().is_none()
        }

        fn platform_name() -> &'static str {
            "unix"
        }
    }

    impl Drop for UnixProcessGroup {
        fn drop(&mut self) {
            self.dispose();
        }
    }

    /// Anonymous pipe whose ends are both close-on-exec from birth
    #[cfg(any(target_os = "linux", target_os = "android", target_os = "freebsd"))]
    fn cloexec_pipe() -> Result<(OwnedFd, OwnedFd)> {
        nix::unistd::pipe2(nix::fcntl::OFlag::O_CLOEXEC)
            .map_err(|e| ProcessError::os("pipe2", e.into()))
    }

    #[cfg(not(any(target_os = "linux", target_os = "android", target_os = "freebsd")))]
    fn cloexec_pipe() -> Result<(OwnedFd, OwnedFd)> {
        use std::os::fd::AsRawFd;

        let (read, write) = nix::unistd::pipe().map_err(|e| ProcessError::os("pipe", e.into()))?;
        for fd in [&read, &write] {
            // SAFETY: fd is a valid descriptor owned above
            if unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_SETFD, libc::FD_CLOEXEC) } == -1 {
                return Err(ProcessError::last_os_error("fcntl"));
            }
        }
        Ok((read, write))
    }

    /// Runs in the forked child. Raising priority needs privileges; a refusal
    /// keeps the inherited niceness.
    fn set_niceness(nice: i32) {
        // SAFETY: plain syscall on the calling process
        unsafe {
            libc::setpriority(libc::PRIO_PROCESS, 0, nice);
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use buildproc_core::{ManagedProcess, Priority};
        use std::sync::Arc;
        use std::time::Duration;

        fn sh(script: &str) -> ProcessSpec {
            ProcessSpec::builder()
                .executable("/bin/sh")
                .args(["-c", script])
                .build()
                .unwrap()
        }

        fn group() -> Arc<UnixProcessGroup> {
            let _ = tracing_subscriber::fmt()
                .with_env_filter("debug")
                .with_test_writer()
                .try_init();
            Arc::new(UnixProcessGroup::create(GroupOptions::default()).unwrap())
        }

        #[tokio::test]
        async fn test_stdout_and_stderr_are_merged() {
            let group = group();
            let mut process = ManagedProcess::spawn(&group, sh("echo out; echo err 1>&2"))
                .await
                .unwrap();

            let mut lines = process.read_all_lines().await.unwrap();
            lines.sort();
            assert_eq!(lines, vec!["err", "out"]);
            assert_eq!(
                process.wait_for_exit(Some(Duration::from_secs(10))).await.unwrap(),
                ProcessStatus::Exited(0)
            );
        }

        #[tokio::test]
        async fn test_member_leads_its_own_group() {
            let group = group();
            let mut process = ManagedProcess::spawn(&group, sh("sleep 30")).await.unwrap();
            let pid = NixPid::from_raw(process.pid().unwrap() as i32);

            assert_eq!(nix::unistd::getpgid(Some(pid)).unwrap(), pid);
            assert_ne!(pid, nix::unistd::getpgrp());
            assert_eq!(group.member_count(), 1);

            process.dispose().await;
            assert_eq!(group.member_count(), 0);
        }

        #[tokio::test]
        async fn test_environment_override_replaces_inherited() {
            // cargo exports this to test processes
            let Some(inherited_value) = std::env::var_os("CARGO_MANIFEST_DIR") else {
                return;
            };
            let group = group();
            let spec = ProcessSpec::builder()
                .executable("/bin/sh")
                .args(["-c", "echo \"${CARGO_MANIFEST_DIR:-unset} $ONLY_VAR\""])
                .env("ONLY_VAR", "set")
                .build()
                .unwrap();

            let mut process = ManagedProcess::spawn(&group, spec).await.unwrap();
            assert_eq!(process.read_all_lines().await.unwrap(), vec!["unset set"]);

            let mut inherited = ManagedProcess::spawn(&group, sh("echo \"$CARGO_MANIFEST_DIR\""))
                .await
                .unwrap();
            assert_eq!(
                inherited.read_all_lines().await.unwrap(),
                vec![inherited_value.to_string_lossy().into_owned()]
            );
        }

        #[tokio::test]
        async fn test_working_directory() {
            let group = group();
            let dir = std::env::temp_dir().canonicalize().unwrap();
            let spec = ProcessSpec::builder()
                .executable("/bin/sh")
                .args(["-c", "pwd -P"])
                .working_directory(dir.clone())
                .build()
                .unwrap();

            let mut process = ManagedProcess::spawn(&group, spec).await.unwrap();
            assert_eq!(
                process.read_all_lines().await.unwrap(),
                vec![dir.display().to_string()]
            );
        }

        #[tokio::test]
        async fn test_idle_priority_lowers_niceness() {
            let group = group();
            let spec = ProcessSpec::builder()
                .executable("/bin/sh")
                .args(["-c", "sleep 30"])
                .priority(Priority::Idle)
                .build()
                .unwrap();

            let mut process = ManagedProcess::spawn(&group, spec).await.unwrap();
            let pid = process.pid().unwrap();

            // SAFETY: read-only query of another process' niceness
            let nice = unsafe { libc::getpriority(libc::PRIO_PROCESS, pid as libc::id_t) };
            assert_eq!(nice, 19);

            process.dispose().await;
        }

        #[tokio::test]
        async fn test_missing_executable_is_os_error() {
            let group = group();
            let spec = ProcessSpec::builder()
                .executable("/nonexistent/buildproc-tool")
                .build()
                .unwrap();

            let err = ManagedProcess::spawn(&group, spec).await.err().unwrap();
            assert_eq!(err.os_call(), Some("spawn"));
            assert_eq!(group.member_count(), 0);
        }

        #[tokio::test]
        async fn test_dispose_reaches_grandchildren() {
            let group = group();
            // breakaway is a Job Object notion; it must not weaken the kill here
            assert!(group.options().allow_breakaway);
            let mut process = ManagedProcess::spawn(&group, sh("sleep 60 & sleep 60"))
                .await
                .unwrap();

            group.dispose();

            // the backgrounded sleep holds the output pipe open until it dies
            let lines = tokio::time::timeout(Duration::from_secs(10), process.read_all_lines())
                .await
                .expect("grandchild survived group disposal")
                .unwrap();
            assert!(lines.is_empty());

            let status = process.wait_for_exit(Some(Duration::from_secs(10))).await.unwrap();
            assert_eq!(status, ProcessStatus::Killed(128 + libc::SIGKILL));
        }

        #[tokio::test]
        async fn test_reaped_leader_of_empty_group_is_forgotten() {
            let group = group();
            let mut process = ManagedProcess::spawn(&group, sh("true")).await.unwrap();
            assert_eq!(group.member_count(), 1);

            let status = process.wait_for_exit(Some(Duration::from_secs(10))).await.unwrap();
            assert_eq!(status, ProcessStatus::Exited(0));
            assert_eq!(group.member_count(), 0);
        }

        #[tokio::test]
        async fn test_reaped_leader_with_background_tool_stays_member() {
            let group = group();
            let mut process = ManagedProcess::spawn(&group, sh("sleep 60 & exit 0"))
                .await
                .unwrap();

            let status = process.wait_for_exit(Some(Duration::from_secs(10))).await.unwrap();
            assert_eq!(status, ProcessStatus::Exited(0));
            assert_eq!(group.member_count(), 1);

            group.dispose();
            let lines = tokio::time::timeout(Duration::from_secs(10), process.read_all_lines())
                .await
                .expect("background tool survived group disposal")
                .unwrap();
            assert!(lines.is_empty());
        }

        #[tokio::test]
        async fn test_spawn_after_dispose_fails() {
            let group = group();
            group.dispose();
            group.dispose();
            assert!(group.is_disposed());

            let result = ManagedProcess::spawn(&group, sh("true")).await;
            assert!(matches!(result, Err(ProcessError::GroupDisposed)));
        }
    }
}

#[cfg(unix)]
pub use unix_impl::{UnixProcessGroup, UnixProcessHandle};
