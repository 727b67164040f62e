//! Windows-specific native spawning for buildproc
//!
//! Members are created suspended, assigned to a Job Object configured to kill
//! everything on close, and only then resumed.

mod command_line;
mod windows_process_group;

pub use command_line::{build_command_line, environment_block, quote_argument};

#[cfg(windows)]
pub use windows_process_group::{WindowsProcessGroup, WindowsProcessHandle};

/// Exit code given to processes killed by dispose (`ERROR_PROCESS_ABORTED`)
pub const TERMINATED_EXIT_CODE: u32 = 1067;
