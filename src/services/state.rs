//! Service lifecycle states and events
//!
//! ```text
//!     ┌─────────┐
//!     │ Stopped │◄──────────────┐
//!     └────┬────┘               │
//!          │ start/require      │
//!     ┌────▼─────┐              │
//!     │ Starting │─────────┐    │
//!     └────┬─────┘  stop/  │    │
//!          │ deps up, fail │    │
//!          │ brought up    │    │
//!     ┌────▼────┐          │    │
//!     │ Started │          │    │
//!     └────┬────┘          │    │
//!          │ stop/release  │    │
//!     ┌────▼─────┐◄────────┘    │
//!     │ Stopping │──────────────┘
//!     └──────────┘  dependents down,
//!                   brought down
//! ```

/// Lifecycle state of a service record. Also used for the desired (target)
/// state, where only `Stopped` and `Started` occur.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Stopped,
    Starting,
    Started,
    Stopping,
}

impl ServiceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Started => "started",
            Self::Stopping => "stopping",
        }
    }
}

/// Why a service stopped (or is stopping).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StopReason {
    /// Stopped via command or release of all holds.
    #[default]
    Normal,
    /// A hard dependency failed to start.
    DepFailed,
    /// The service failed to start.
    Failed,
    /// Could not be executed at all.
    ExecFailed,
    /// The underlying process terminated on its own.
    Terminated,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::DepFailed => "dependency failed",
            Self::Failed => "failed",
            Self::ExecFailed => "exec failed",
            Self::Terminated => "terminated",
        }
    }
}

/// Events delivered synchronously to service listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceEvent {
    /// Reached Started.
    Started,
    /// Reached Stopped.
    Stopped,
    /// Start attempt failed (or was skipped).
    FailedStart,
    /// A pending start was cancelled before completing.
    StartCancelled,
    /// A stop in preparation was cancelled; returning to Starting.
    StopCancelled,
}

impl ServiceEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Started => "started",
            Self::Stopped => "stopped",
            Self::FailedStart => "failed-start",
            Self::StartCancelled => "start-cancelled",
            Self::StopCancelled => "stop-cancelled",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_as_str() {
        assert_eq!(ServiceState::Stopped.as_str(), "stopped");
        assert_eq!(ServiceState::Starting.as_str(), "starting");
        assert_eq!(ServiceState::Started.as_str(), "started");
        assert_eq!(ServiceState::Stopping.as_str(), "stopping");
    }

    #[test]
    fn test_stop_reason_default() {
        assert_eq!(StopReason::default(), StopReason::Normal);
    }

    #[test]
    fn test_event_as_str() {
        assert_eq!(ServiceEvent::Started.as_str(), "started");
        assert_eq!(ServiceEvent::Stopped.as_str(), "stopped");
        assert_eq!(ServiceEvent::FailedStart.as_str(), "failed-start");
        assert_eq!(ServiceEvent::StartCancelled.as_str(), "start-cancelled");
        assert_eq!(ServiceEvent::StopCancelled.as_str(), "stop-cancelled");
    }
}
