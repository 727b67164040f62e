//! buildproc core - platform-independent pieces of the managed child-process subsystem
//!
//! This crate provides the spawn configuration, error types, the seams that the
//! platform crates implement ([`ProcessGroup`] and [`ProcessHandle`]) and the
//! generic [`ManagedProcess`] that owns one child and consumes its output.

mod config;
mod error;
mod lines;
mod managed;
mod output;
mod priority;
mod process;
mod spawn_lock;

pub use config::*;
pub use error::*;
pub use lines::{LineSplitter, split_lines};
pub use managed::ManagedProcess;
pub use output::{OutputReader, OutputStream};
pub use priority::Priority;
pub use process::*;
pub use spawn_lock::spawn_lock;

// Re-exported so callers can build cancellation tokens without a direct dependency
pub use tokio_util::sync::CancellationToken;

/// Cadence used wherever an exit wait has no native async primitive and must poll.
pub const POLL_INTERVAL: std::time::Duration = std::time::Duration::from_millis(20);
