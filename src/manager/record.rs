//! The service record: per-service state tracked by the engine

use std::rc::Rc;

use crate::services::{OnstartFlags, ServiceEvent, ServiceKind, ServiceState, StopReason};

use super::edge::EdgeId;

/// Stable index of a service in the set's record arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServiceId(pub(crate) usize);

/// Observer of service lifecycle events. Notification is synchronous and in
/// transition order; the listener must not assume it can re-enter the set.
pub trait ServiceListener {
    fn service_event(&self, service: &ServiceRecord, event: ServiceEvent);
}

/// Runtime state of one supervised service.
///
/// All mutation happens inside [`super::ServiceSet`]; embedders observe
/// records through the read accessors.
pub struct ServiceRecord {
    pub(crate) name: String,
    pub(crate) kind: ServiceKind,
    pub(crate) flags: OnstartFlags,

    pub(crate) service_state: ServiceState,
    pub(crate) desired_state: ServiceState,

    /// Count of active holds: one per dependent edge with `holding_acq`,
    /// plus one if `start_explicit`.
    pub(crate) required_by: usize,
    /// The user hold contributes one to `required_by`.
    pub(crate) start_explicit: bool,

    pub(crate) pinned_started: bool,
    pub(crate) pinned_stopped: bool,

    /// Restart automatically after an unexpected stop.
    pub(crate) auto_restart: bool,
    /// Restart the process in place on unexpected termination.
    pub(crate) smooth_recovery: bool,
    /// A stop is in progress that will be followed by a start.
    pub(crate) restarting: bool,
    /// The stop in progress must not be interrupted by a start.
    pub(crate) force_stop: bool,

    /// Starting: waiting for dependencies to start.
    /// Stopping: waiting for dependents to stop.
    pub(crate) waiting_for_deps: bool,
    pub(crate) waiting_for_console: bool,
    pub(crate) have_console: bool,

    pub(crate) start_failed: bool,
    pub(crate) start_skipped: bool,
    pub(crate) stop_reason: StopReason,
    pub(crate) exit_status: Option<i32>,

    /// Service to start when this one self-terminates successfully.
    pub(crate) start_on_completion: Option<String>,

    // Pending propagation bits, consumed by do_propagation in this order.
    pub(crate) prop_require: bool,
    pub(crate) prop_release: bool,
    pub(crate) prop_failure: bool,
    pub(crate) prop_start: bool,
    pub(crate) prop_stop: bool,

    // Queue membership, so a record is enqueued at most once.
    pub(crate) queued_prop: bool,
    pub(crate) queued_transition: bool,

    /// Outgoing edges, in declaration order. Owning side.
    pub(crate) depends_on: Vec<EdgeId>,
    /// Incoming edges, back-references only.
    pub(crate) dependents: Vec<EdgeId>,

    pub(crate) listeners: Vec<Rc<dyn ServiceListener>>,
}

impl ServiceRecord {
    pub(crate) fn new(
        name: String,
        kind: ServiceKind,
        flags: OnstartFlags,
        auto_restart: bool,
        smooth_recovery: bool,
        start_on_completion: Option<String>,
    ) -> Self {
        Self {
            name,
            kind,
            flags,
            service_state: ServiceState::Stopped,
            desired_state: ServiceState::Stopped,
            required_by: 0,
            start_explicit: false,
            pinned_started: false,
            pinned_stopped: false,
            auto_restart,
            smooth_recovery,
            restarting: false,
            force_stop: false,
            waiting_for_deps: false,
            waiting_for_console: false,
            have_console: false,
            start_failed: false,
            start_skipped: false,
            stop_reason: StopReason::Normal,
            exit_status: None,
            start_on_completion,
            prop_require: false,
            prop_release: false,
            prop_failure: false,
            prop_start: false,
            prop_stop: false,
            queued_prop: false,
            queued_transition: false,
            depends_on: Vec::new(),
            dependents: Vec::new(),
            listeners: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ServiceKind {
        self.kind
    }

    pub fn state(&self) -> ServiceState {
        self.service_state
    }

    /// The state the service is trying to reach (Started or Stopped).
    pub fn target_state(&self) -> ServiceState {
        self.desired_state
    }

    pub fn required_by(&self) -> usize {
        self.required_by
    }

    pub fn is_explicitly_started(&self) -> bool {
        self.start_explicit
    }

    pub fn is_pinned_started(&self) -> bool {
        self.pinned_started
    }

    pub fn is_pinned_stopped(&self) -> bool {
        self.pinned_stopped
    }

    pub fn auto_restart(&self) -> bool {
        self.auto_restart
    }

    /// True while a stop in progress will be followed by a start.
    pub fn is_restarting(&self) -> bool {
        self.restarting
    }

    pub fn start_failed(&self) -> bool {
        self.start_failed
    }

    pub fn start_skipped(&self) -> bool {
        self.start_skipped
    }

    pub fn stop_reason(&self) -> StopReason {
        self.stop_reason
    }

    pub fn exit_status(&self) -> Option<i32> {
        self.exit_status
    }

    pub fn has_console(&self) -> bool {
        self.have_console
    }

    pub fn is_stopped(&self) -> bool {
        self.service_state == ServiceState::Stopped
    }

    pub fn is_started(&self) -> bool {
        self.service_state == ServiceState::Started
    }

    /// Outgoing dependency edges, in declaration order.
    pub fn dependencies(&self) -> &[EdgeId] {
        &self.depends_on
    }

    /// Incoming dependent edges.
    pub fn dependent_edges(&self) -> &[EdgeId] {
        &self.dependents
    }

    /// Whether the record could be discarded: nothing holds it, nothing is
    /// queued against it and it has fully stopped.
    pub fn is_removable(&self) -> bool {
        self.service_state == ServiceState::Stopped
            && self.required_by == 0
            && !self.queued_prop
            && !self.queued_transition
            && !self.waiting_for_console
    }

    pub(crate) fn any_prop_bit(&self) -> bool {
        self.prop_require || self.prop_release || self.prop_failure || self.prop_start || self.prop_stop
    }
}
