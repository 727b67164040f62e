//! Unix-specific native spawning for buildproc
//!
//! Every member of a [`UnixProcessGroup`] leads its own POSIX process group,
//! joined before `exec`, so that killing the group also reaches the tools the
//! member started itself.

mod unix_process_group;

#[cfg(unix)]
pub use unix_process_group::{UnixProcessGroup, UnixProcessHandle};
