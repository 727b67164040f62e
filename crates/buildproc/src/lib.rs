//! Managed child processes for build orchestration.
//!
//! Every tool a build runs is spawned into a [`ProcessGroup`] that guarantees
//! grouped termination, has its stdout and stderr merged into one stream and
//! can be read line by line with cancellation. The native group for the
//! current platform is [`PlatformProcessGroup`]:
//!
//! - Unix: one POSIX process group per member, killed with `killpg`
//! - Windows: a Job Object with kill-on-close
//! - anything else: [`PortableProcessGroup`], which kills recorded pids
//!
//! ```no_run
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! use buildproc::{ManagedProcess, ProcessGroup, ProcessSpec, create_process_group};
//!
//! let group = create_process_group()?;
//! let spec = ProcessSpec::builder().executable("cc").arg("--version").build()?;
//! let mut process = ManagedProcess::spawn(&group, spec).await?;
//! for line in process.read_all_lines().await? {
//!     println!("{line}");
//! }
//! group.dispose();
//! # Ok(())
//! # }
//! ```

pub mod logging;
mod platform;
mod portable;
mod run;

pub use platform::{
    PlatformProcess, PlatformProcessGroup, create_process_group, create_process_group_with,
    platform_name,
};
pub use portable::{PortableProcessGroup, PortableProcessHandle};
pub use run::{CompletedProcess, run_to_completion};

#[cfg(unix)]
pub use buildproc_unix::{UnixProcessGroup, UnixProcessHandle};

#[cfg(windows)]
pub use buildproc_windows::{WindowsProcessGroup, WindowsProcessHandle};

// Re-export core functionality
pub use buildproc_core::*;
