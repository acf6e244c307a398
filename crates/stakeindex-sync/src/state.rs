//! Observer lifecycle.

use std::fmt;

/// What the observer's worker is doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ObserverState {
    /// Waiting for a new remote head.
    #[default]
    Idle,
    /// Applying levels up to the remote head.
    Advancing,
    /// Reverting levels the remote branch does not contain.
    Rebasing,
    /// Cancellation requested; the current level is finishing.
    Stopping,
    Stopped,
    /// Stopped on a fatal error.
    Failed,
}

impl ObserverState {
    /// Whether the worker has exited.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Stopped | Self::Failed)
    }
}

impl fmt::Display for ObserverState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Advancing => "advancing",
            Self::Rebasing => "rebasing",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}
