use serde::{Deserialize, Serialize};

/// Scheduling priority requested for a spawned tool process
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Priority {
    Idle,
    BelowNormal,
    #[default]
    Normal,
    AboveNormal,
    High,
    RealTime,
}

impl Priority {
    /// Unix nice value for this priority.
    ///
    /// Values below zero need privileges; platforms treat a refused change as
    /// best-effort and keep the inherited niceness.
    pub fn nice_value(self) -> i32 {
        match self {
            Priority::Idle => 19,
            Priority::BelowNormal => 10,
            Priority::Normal => 0,
            Priority::AboveNormal => -5,
            Priority::High => -10,
            Priority::RealTime => -20,
        }
    }

    pub fn is_elevated(self) -> bool {
        self.nice_value() < 0
    }
}
