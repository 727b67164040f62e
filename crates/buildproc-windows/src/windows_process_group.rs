#[cfg(windows)]
mod windows_impl {
    use crate::TERMINATED_EXIT_CODE;
    use crate::command_line::{build_command_line, environment_block};
    use async_trait::async_trait;
    use buildproc_core::{
        GroupOptions, POLL_INTERVAL, Priority, ProcessError, ProcessGroup, ProcessHandle,
        ProcessId, ProcessSpec, ProcessStatus, Result, SpawnedProcess, spawn_lock,
    };
    use std::ffi::c_void;
    use std::io;
    use std::os::windows::io::{AsRawHandle, FromRawHandle, OwnedHandle};
    use std::sync::{Mutex, MutexGuard, PoisonError};
    use tracing::{debug, info, warn};
    use windows::Win32::Foundation::{
        DUPLICATE_SAME_ACCESS, DuplicateHandle, ERROR_ACCESS_DENIED, ERROR_NOT_SUPPORTED,
        HANDLE, HANDLE_FLAG_INHERIT, HANDLE_FLAGS, SetHandleInformation, WAIT_OBJECT_0,
        WAIT_TIMEOUT,
    };
    use windows::Win32::Security::SECURITY_ATTRIBUTES;
    use windows::Win32::System::JobObjects::{
        AssignProcessToJobObject, CreateJobObjectW, IsProcessInJob,
        JOB_OBJECT_LIMIT_BREAKAWAY_OK, JOB_OBJECT_LIMIT_KILL_ON_JOB_CLOSE,
        JOBOBJECT_EXTENDED_LIMIT_INFORMATION, JobObjectExtendedLimitInformation,
        SetInformationJobObject, TerminateJobObject,
    };
    use windows::Win32::System::Pipes::CreatePipe;
    use windows::Win32::System::Threading::{
        ABOVE_NORMAL_PRIORITY_CLASS, BELOW_NORMAL_PRIORITY_CLASS, CREATE_NO_WINDOW,
        CREATE_SUSPENDED, CREATE_UNICODE_ENVIRONMENT, CreateProcessW, GetCurrentProcess,
        GetExitCodeProcess, HIGH_PRIORITY_CLASS, IDLE_PRIORITY_CLASS, NORMAL_PRIORITY_CLASS,
        PROCESS_CREATION_FLAGS, PROCESS_INFORMATION, REALTIME_PRIORITY_CLASS, ResumeThread,
        STARTF_USESTDHANDLES, STARTUPINFOW, TerminateProcess, WaitForSingleObject,
    };
    use windows::core::{BOOL, HSTRING, PCWSTR, PWSTR};

    fn raw(handle: &OwnedHandle) -> HANDLE {
        HANDLE(handle.as_raw_handle())
    }

    /// Take ownership of a handle returned by a Win32 call
    ///
    /// # Safety
    /// `handle` must be a valid handle owned by nobody else.
    unsafe fn owned(handle: HANDLE) -> OwnedHandle {
        unsafe { OwnedHandle::from_raw_handle(handle.0) }
    }

    fn win_error(call: &'static str, error: windows::core::Error) -> ProcessError {
        ProcessError::os(call, error.into())
    }

    fn priority_class(priority: Priority) -> PROCESS_CREATION_FLAGS {
        match priority {
            Priority::Idle => IDLE_PRIORITY_CLASS,
            Priority::BelowNormal => BELOW_NORMAL_PRIORITY_CLASS,
            Priority::Normal => NORMAL_PRIORITY_CLASS,
            Priority::AboveNormal => ABOVE_NORMAL_PRIORITY_CLASS,
            Priority::High => HIGH_PRIORITY_CLASS,
            Priority::RealTime => REALTIME_PRIORITY_CLASS,
        }
    }

    /// Windows-specific process handle implementation
    pub struct WindowsProcessHandle {
        process: OwnedHandle,
        pid: ProcessId,
    }

    impl WindowsProcessHandle {
        fn exit_status(&self) -> io::Result<ProcessStatus> {
            let mut code = 0u32;
            unsafe { GetExitCodeProcess(raw(&self.process), &mut code) }?;
            Ok(if code == TERMINATED_EXIT_CODE {
                ProcessStatus::Killed(code as i32)
            } else {
                ProcessStatus::Exited(code as i32)
            })
        }
    }

    #[async_trait]
    impl ProcessHandle for WindowsProcessHandle {
        fn pid(&self) -> Option<ProcessId> {
            Some(self.pid)
        }

        fn try_wait(&mut self) -> io::Result<Option<ProcessStatus>> {
            let event = unsafe { WaitForSingleObject(raw(&self.process), 0) };
            if event == WAIT_OBJECT_0 {
                self.exit_status().map(Some)
            } else if event == WAIT_TIMEOUT {
                Ok(None)
            } else {
                Err(io::Error::last_os_error())
            }
        }

        async fn wait(&mut self) -> io::Result<ProcessStatus> {
            // Process handles are not pollable by the reactor
            loop {
                if let Some(status) = self.try_wait()? {
                    return Ok(status);
                }
                tokio::time::sleep(POLL_INTERVAL).await;
            }
        }

        fn start_kill(&mut self) -> io::Result<()> {
            match unsafe { TerminateProcess(raw(&self.process), TERMINATED_EXIT_CODE) } {
                Ok(()) => Ok(()),
                // access is denied once the process has already exited
                Err(_) if self.try_wait()?.is_some() => Ok(()),
                Err(e) => Err(e.into()),
            }
        }
    }

    /// Process group backed by a Job Object.
    ///
    /// The job is configured with kill-on-close, so releasing the handle kills
    /// every member even if this process dies without running `dispose`.
    pub struct WindowsProcessGroup {
        job: Mutex<Option<OwnedHandle>>,
        options: GroupOptions,
    }

    impl WindowsProcessGroup {
        pub fn options(&self) -> &GroupOptions {
            &self.options
        }

        fn job(&self) -> MutexGuard<'_, Option<OwnedHandle>> {
            self.job.lock().unwrap_or_else(PoisonError::into_inner)
        }
    }

    impl ProcessGroup for WindowsProcessGroup {
        type Handle = WindowsProcessHandle;

        fn create(options: GroupOptions) -> Result<Self> {
            let job = unsafe { CreateJobObjectW(None, PCWSTR::null()) }
                .map_err(|e| win_error("CreateJobObjectW", e))?;
            let job = unsafe { owned(job) };

            let mut info = JOBOBJECT_EXTENDED_LIMIT_INFORMATION::default();
            info.BasicLimitInformation.LimitFlags = JOB_OBJECT_LIMIT_KILL_ON_JOB_CLOSE;
            if options.allow_breakaway {
                info.BasicLimitInformation.LimitFlags |= JOB_OBJECT_LIMIT_BREAKAWAY_OK;
            }

            unsafe {
                SetInformationJobObject(
                    raw(&job),
                    JobObjectExtendedLimitInformation,
                    (&raw const info).cast::<c_void>(),
                    std::mem::size_of::<JOBOBJECT_EXTENDED_LIMIT_INFORMATION>() as u32,
                )
            }
            .map_err(|e| win_error("SetInformationJobObject", e))?;

            debug!(allow_breakaway = options.allow_breakaway, "Created Job Object");
            Ok(Self {
                job: Mutex::new(Some(job)),
                options,
            })
        }

        fn spawn(&self, spec: &ProcessSpec) -> Result<SpawnedProcess<WindowsProcessHandle>> {
            // Held for the whole spawn so dispose cannot close the job under us
            let job_guard = self.job();
            let Some(job) = job_guard.as_ref() else {
                return Err(ProcessError::GroupDisposed);
            };

            let env_block = spec.env.as_deref().map(environment_block);
            let mut command_line: Vec<u16> = build_command_line(&spec.executable, &spec.args)
                .encode_utf16()
                .chain(std::iter::once(0))
                .collect();
            let current_dir = spec.working_directory.as_deref().map(HSTRING::from);

            let mut flags = CREATE_SUSPENDED | CREATE_NO_WINDOW | priority_class(spec.priority);
            if env_block.is_some() {
                flags |= CREATE_UNICODE_ENVIRONMENT;
            }

            let (process, pid, stdin_write, output_read) = {
                let _guard = spawn_lock();

                let (stdin_read, stdin_write) = inheritable_pipe()?;
                set_inheritable(&stdin_write, false)?;
                let (output_read, output_write) = inheritable_pipe()?;
                set_inheritable(&output_read, false)?;
                let error_write = duplicate_inheritable(&output_write)?;

                let startup = STARTUPINFOW {
                    cb: std::mem::size_of::<STARTUPINFOW>() as u32,
                    dwFlags: STARTF_USESTDHANDLES,
                    hStdInput: raw(&stdin_read),
                    hStdOutput: raw(&output_write),
                    hStdError: raw(&error_write),
                    ..Default::default()
                };
                let mut info = PROCESS_INFORMATION::default();

                unsafe {
                    CreateProcessW(
                        PCWSTR::null(),
                        Some(PWSTR(command_line.as_mut_ptr())),
                        None,
                        None,
                        true.into(),
                        flags,
                        env_block
                            .as_ref()
                            .map(|block| block.as_ptr().cast::<c_void>()),
                        current_dir
                            .as_ref()
                            .map_or(PCWSTR::null(), |dir| PCWSTR(dir.as_ptr())),
                        &startup,
                        &mut info,
                    )
                }
                .map_err(|e| win_error("CreateProcessW", e))?;

                let process = unsafe { owned(info.hProcess) };
                let thread = unsafe { owned(info.hThread) };

                if let Err(e) = assign_to_job(job, &process) {
                    let _ = unsafe { TerminateProcess(raw(&process), TERMINATED_EXIT_CODE) };
                    return Err(e);
                }

                if unsafe { ResumeThread(raw(&thread)) } == u32::MAX {
                    let error = ProcessError::last_os_error("ResumeThread");
                    let _ = unsafe { TerminateProcess(raw(&process), TERMINATED_EXIT_CODE) };
                    return Err(error);
                }

                // Child-side ends must be closed here, or the output pipe never
                // reaches end-of-file
                drop(stdin_read);
                drop(output_write);
                drop(error_write);

                (process, info.dwProcessId, stdin_write, output_read)
            };
            drop(job_guard);

            debug!(
                pid,
                command_line = %String::from_utf16_lossy(&command_line[..command_line.len() - 1]),
                "Spawned Windows process"
            );

            let stdin = tokio::fs::File::from_std(std::fs::File::from(stdin_write));
            let output = tokio::fs::File::from_std(std::fs::File::from(output_read));

            Ok(SpawnedProcess {
                handle: WindowsProcessHandle { process, pid },
                stdin: Box::new(stdin),
                output: Box::new(output),
            })
        }

        fn dispose(&self) {
            let Some(job) = self.job().take() else {
                return;
            };

            info!("Disposing Job Object");
            if let Err(e) = unsafe { TerminateJobObject(raw(&job), TERMINATED_EXIT_CODE) } {
                warn!(error = %e, "TerminateJobObject failed, relying on kill-on-close");
            }
            drop(job);
        }

        fn is_disposed(&self) -> bool {
            self.job().is_none()
        }

        fn platform_name() -> &'static str {
            "windows"
        }
    }

    impl Drop for WindowsProcessGroup {
        fn drop(&mut self) {
            self.dispose();
        }
    }

    fn inheritable_pipe() -> Result<(OwnedHandle, OwnedHandle)> {
        let attributes = SECURITY_ATTRIBUTES {
            nLength: std::mem::size_of::<SECURITY_ATTRIBUTES>() as u32,
            lpSecurityDescriptor: std::ptr::null_mut(),
            bInheritHandle: true.into(),
        };

        let mut read = HANDLE::default();
        let mut write = HANDLE::default();
        unsafe { CreatePipe(&mut read, &mut write, Some(&raw const attributes), 0) }
            .map_err(|e| win_error("CreatePipe", e))?;

        Ok(unsafe { (owned(read), owned(write)) })
    }

    fn set_inheritable(handle: &OwnedHandle, inheritable: bool) -> Result<()> {
        let flags = if inheritable {
            HANDLE_FLAG_INHERIT
        } else {
            HANDLE_FLAGS(0)
        };
        unsafe { SetHandleInformation(raw(handle), HANDLE_FLAG_INHERIT.0, flags) }
            .map_err(|e| win_error("SetHandleInformation", e))
    }

    fn duplicate_inheritable(handle: &OwnedHandle) -> Result<OwnedHandle> {
        let mut duplicate = HANDLE::default();
        unsafe {
            DuplicateHandle(
                GetCurrentProcess(),
                raw(handle),
                GetCurrentProcess(),
                &mut duplicate,
                0,
                true.into(),
                DUPLICATE_SAME_ACCESS,
            )
        }
        .map_err(|e| win_error("DuplicateHandle", e))?;

        Ok(unsafe { owned(duplicate) })
    }

    /// Nested jobs are refused on older systems, and the caller may run inside
    /// a job that forbids breakaway. Both leave the child without grouped-kill
    /// protection, which is logged rather than treated as fatal.
    fn assign_to_job(job: &OwnedHandle, process: &OwnedHandle) -> Result<()> {
        let Err(e) = (unsafe { AssignProcessToJobObject(raw(job), raw(process)) }) else {
            return Ok(());
        };

        let soft = e.code() == ERROR_ACCESS_DENIED.to_hresult()
            || e.code() == ERROR_NOT_SUPPORTED.to_hresult();
        if !soft {
            return Err(win_error("AssignProcessToJobObject", e));
        }

        let mut in_job = BOOL::default();
        let verified = unsafe { IsProcessInJob(raw(process), Some(raw(job)), &mut in_job) };
        if verified.is_ok() && in_job.as_bool() {
            return Ok(());
        }

        warn!(error = %e, "Process could not join the Job Object, continuing without it");
        Ok(())
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use buildproc_core::ManagedProcess;
        use std::sync::Arc;
        use std::time::Duration;

        fn cmd(script: &str) -> ProcessSpec {
            ProcessSpec::builder()
                .executable("cmd.exe")
                .args(["/d", "/c", script])
                .build()
                .unwrap()
        }

        #[tokio::test]
        async fn test_merged_output_and_exit_code() {
            let group = Arc::new(WindowsProcessGroup::create(GroupOptions::default()).unwrap());
            let mut process = ManagedProcess::spawn(&group, cmd("echo out& echo err 1>&2& exit 3"))
                .await
                .unwrap();

            let mut lines = process.read_all_lines().await.unwrap();
            lines.sort();
            assert_eq!(lines, vec!["err ", "out"]);
            let status = process.wait_for_exit(Some(Duration::from_secs(10))).await.unwrap();
            assert_eq!(status, ProcessStatus::Exited(3));
        }

        #[tokio::test]
        async fn test_group_dispose_kills_members() {
            let group = Arc::new(WindowsProcessGroup::create(GroupOptions::default()).unwrap());
            let mut process = ManagedProcess::spawn(&group, cmd("ping -n 60 127.0.0.1 >NUL"))
                .await
                .unwrap();

            group.dispose();
            group.dispose();

            let status = process.wait_for_exit(Some(Duration::from_secs(10))).await.unwrap();
            assert_eq!(status, ProcessStatus::Killed(TERMINATED_EXIT_CODE as i32));
        }
    }
}

#[cfg(windows)]
pub use windows_impl::{WindowsProcessGroup, WindowsProcessHandle};
