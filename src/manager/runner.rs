//! The process-runner collaborator contract
//!
//! The state machine never forks or signals processes itself; it asks a
//! [`ProcessRunner`] to bring the underlying work up or down and acts on the
//! returned outcome. A runner that cannot complete synchronously returns
//! `Pending` and later reports through the service set's external event
//! entry points ([`super::ServiceSet::started`],
//! [`super::ServiceSet::stopped`], [`super::ServiceSet::start_failed`],
//! [`super::ServiceSet::process_terminated`]).

use crate::services::ServiceKind;

use super::record::ServiceId;

/// Outcome of a bring-up request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BringUp {
    /// The work is up; the set marks the service started immediately.
    Complete,
    /// Startup is underway; `started` (or `start_failed`) will follow.
    Pending,
    /// Startup failed synchronously.
    Failed,
}

/// Outcome of a bring-down request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BringDown {
    /// The work is down; the set marks the service stopped immediately.
    Complete,
    /// Shutdown is underway; `stopped` will follow.
    Pending,
}

/// External collaborator that runs the actual work behind each service.
///
/// The policy hooks default to permissive answers; a concrete runner
/// overrides them where a start in progress cannot be abandoned (for
/// example between fork and exec).
pub trait ProcessRunner {
    /// Start the underlying work for `id`.
    fn bring_up(&mut self, id: ServiceId, name: &str, kind: ServiceKind) -> BringUp;

    /// Begin stopping the underlying work for `id`.
    fn bring_down(&mut self, id: ServiceId, name: &str, kind: ServiceKind) -> BringDown;

    /// May a start that is past its dependency wait be abandoned?
    fn can_interrupt_start(&mut self, _id: ServiceId) -> bool {
        true
    }

    /// Abandon a start in progress. Returning false means the interruption
    /// completes asynchronously (the stop proceeds once startup ends).
    fn interrupt_start(&mut self, _id: ServiceId) -> bool {
        true
    }

    /// May a stop in preparation be cancelled in favor of a start?
    fn can_interrupt_stop(&mut self, _id: ServiceId) -> bool {
        true
    }

    /// Last veto before bring-up once dependencies and console are ready.
    fn can_proceed_to_start(&mut self, _id: ServiceId) -> bool {
        true
    }
}

/// Runner with no real work: everything succeeds immediately.
#[derive(Debug, Default)]
pub struct DefaultRunner;

impl ProcessRunner for DefaultRunner {
    fn bring_up(&mut self, _id: ServiceId, _name: &str, _kind: ServiceKind) -> BringUp {
        BringUp::Complete
    }

    fn bring_down(&mut self, _id: ServiceId, _name: &str, _kind: ServiceKind) -> BringDown {
        BringDown::Complete
    }
}
