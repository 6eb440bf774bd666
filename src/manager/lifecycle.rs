//! The service lifecycle state machine
//!
//! Continuation of [`super::ServiceSet`]: the public control operations
//! (start, stop, restart, pin, forced stop), the propagation and transition
//! handlers driven by the work queues, and the external event entry points
//! reported by the process runner (`started`, `stopped`, `start_failed`,
//! `process_terminated`).
//!
//! Everything here is synchronous and re-entrant only through the queues:
//! an operation mutates local record state, possibly walks its edges, and
//! enqueues follow-up work. The one ordering rule that must never be broken
//! is that an edge's `holding_acq` is cleared *before* `release` is called
//! on the dependency; otherwise the dependency can walk the same edge
//! during its own transition and release it twice.

use crate::services::{DepType, ServiceEvent, ServiceState, StopReason};

use super::record::ServiceId;
use super::runner::{BringDown, BringUp};
use super::ServiceSet;

impl ServiceSet {
    /// Start a service, recording an explicit user hold. No-op when the
    /// service is stopped and pinned stopped.
    pub fn start(&mut self, id: ServiceId) {
        {
            let rec = self.rec(id);
            if rec.service_state == ServiceState::Stopped && rec.pinned_stopped {
                return;
            }
            if !rec.start_explicit {
                rec.start_explicit = true;
                rec.required_by += 1;
            }
        }
        self.do_start(id);
    }

    /// Stop a service: remove the explicit hold and set the desired state
    /// to stopped. With `bring_down` false the service keeps running while
    /// other holds remain.
    pub fn stop(&mut self, id: ServiceId, mut bring_down: bool) {
        {
            let rec = self.rec(id);
            if rec.start_explicit {
                rec.start_explicit = false;
                rec.required_by -= 1;
            }
            rec.desired_state = ServiceState::Stopped;
            if rec.pinned_started {
                return;
            }
        }

        // With no holds left this is a full manual stop regardless.
        if self.service(id).required_by == 0 {
            bring_down = true;
            let queue = {
                let rec = self.rec(id);
                rec.prop_release = !rec.prop_require;
                rec.prop_release
            };
            if queue {
                self.add_prop_queue(id);
            }
        }

        let state = self.service(id).state();
        if bring_down && state != ServiceState::Stopped && state != ServiceState::Stopping {
            self.rec(id).stop_reason = StopReason::Normal;
            self.do_stop(id);
        }
    }

    /// Restart a started service in place, without touching its activation
    /// or dependency holds. Returns false from any other state.
    pub fn restart(&mut self, id: ServiceId) -> bool {
        if self.service(id).state() != ServiceState::Started {
            return false;
        }
        {
            let rec = self.rec(id);
            rec.restarting = true;
            rec.stop_reason = StopReason::Normal;
        }
        self.do_stop(id);
        true
    }

    /// Mark this service (and, transitively, its hard dependents) to be
    /// stopped without the possibility of interruption by a start.
    pub fn forced_stop(&mut self, id: ServiceId) {
        let rec = self.rec(id);
        if rec.service_state != ServiceState::Stopped {
            rec.force_stop = true;
            if !rec.pinned_started {
                rec.prop_stop = true;
                self.add_prop_queue(id);
            }
        }
    }

    /// Add a hold on the service; starts it if it is not already active.
    pub fn require(&mut self, id: ServiceId) {
        let rec = self.rec(id);
        rec.required_by += 1;
        if rec.required_by == 1
            && rec.service_state != ServiceState::Starting
            && rec.service_state != ServiceState::Started
        {
            rec.prop_start = true;
            self.add_prop_queue(id);
            // Pin is checked in do_start; requires propagate to
            // dependencies if and when the service actually starts.
        }
    }

    /// Remove a hold. When the count reaches zero the service's desired
    /// state becomes stopped, acquisitions are released, and (with
    /// `issue_stop`) the service is brought down.
    pub fn release(&mut self, id: ServiceId, issue_stop: bool) {
        {
            let rec = self.rec(id);
            rec.required_by -= 1;
            if rec.required_by != 0 {
                return;
            }
        }

        // A stop already in progress would have restarted; that restart is
        // now cancelled.
        {
            let r = self.service(id);
            if r.service_state == ServiceState::Stopping
                && r.desired_state == ServiceState::Started
            {
                self.notify_listeners(id, ServiceEvent::StartCancelled);
            }
        }
        self.rec(id).desired_state = ServiceState::Stopped;

        if self.service(id).pinned_started {
            return;
        }

        let state = self.service(id).state();
        if state == ServiceState::Stopped {
            // Nothing is queued against a stopped record; drop any held
            // acquisitions directly rather than stranding a release bit.
            self.rec(id).prop_require = false;
            self.release_dependencies(id);
            return;
        }

        // No release needs to go out if a require is still pending.
        let queue = {
            let rec = self.rec(id);
            rec.prop_release = !rec.prop_require;
            rec.prop_require = false;
            rec.prop_release
        };
        if queue {
            self.add_prop_queue(id);
        }

        if state != ServiceState::Stopping && issue_stop {
            self.rec(id).stop_reason = StopReason::Normal;
            self.do_stop(id);
        }
    }

    /// Release every outgoing acquisition.
    pub(crate) fn release_dependencies(&mut self, id: ServiceId) {
        let deps = self.service(id).depends_on.clone();
        for eid in deps {
            if self.edge(eid).holding_acq {
                // Clear holding_acq before calling release, otherwise the
                // dependency may walk this edge during its own stop and
                // release itself a second time.
                let to = self.edge(eid).to();
                self.edge_mut(eid).holding_acq = false;
                self.release(to, true);
            }
        }
    }

    /// Remove a pin. A started service whose desired state became stopped
    /// while pinned stops now; a stopped one whose desired state became
    /// started starts now.
    pub fn unpin(&mut self, id: ServiceId) {
        if self.service(id).pinned_started {
            self.rec(id).pinned_started = false;
            if self.service(id).state() == ServiceState::Started {
                // If the hold count hit zero under the pin, the release
                // was never propagated; do it now.
                if self.service(id).required_by() == 0 {
                    self.rec(id).prop_release = true;
                    self.add_prop_queue(id);
                }
                let must_stop = {
                    let r = self.service(id);
                    r.desired_state == ServiceState::Stopped || r.force_stop
                };
                if must_stop {
                    self.do_stop(id);
                    self.process_queues();
                }
            }
        }
        if self.service(id).pinned_stopped {
            self.rec(id).pinned_stopped = false;
            if self.service(id).state() == ServiceState::Stopped
                && self.service(id).target_state() == ServiceState::Started
            {
                let rec = self.rec(id);
                rec.prop_require = true;
                rec.prop_start = true;
                self.add_prop_queue(id);
                self.process_queues();
            }
        }
    }

    /// Forbid leaving the started state. Ignored if the opposite pin is set.
    pub fn pin_start(&mut self, id: ServiceId) {
        if self.service(id).pinned_stopped {
            log::warn!(
                "Ignoring start pin on {}: already pinned stopped",
                self.service(id).name()
            );
            return;
        }
        self.rec(id).pinned_started = true;
    }

    /// Forbid leaving the stopped state. Ignored if the opposite pin is set.
    pub fn pin_stop(&mut self, id: ServiceId) {
        if self.service(id).pinned_started {
            log::warn!(
                "Ignoring stop pin on {}: already pinned started",
                self.service(id).name()
            );
            return;
        }
        self.rec(id).pinned_stopped = true;
    }

    /// Consume this record's pending propagation bits, in fixed priority:
    /// require, release, failure, start, stop.
    pub(crate) fn do_propagation(&mut self, id: ServiceId) {
        if self.service(id).prop_require {
            // Acquire all our dependencies.
            let deps = self.service(id).depends_on.clone();
            for eid in deps {
                let to = self.edge(eid).to();
                self.require(to);
                self.edge_mut(eid).holding_acq = true;
            }
            self.rec(id).prop_require = false;
        }

        if self.service(id).prop_release {
            self.release_dependencies(id);
            self.rec(id).prop_release = false;
        }

        if self.service(id).prop_failure {
            self.rec(id).prop_failure = false;
            self.rec(id).stop_reason = StopReason::DepFailed;
            self.failed_to_start(id, true, true);
        }

        if self.service(id).prop_start {
            self.rec(id).prop_start = false;
            self.do_start(id);
        }

        if self.service(id).prop_stop {
            self.rec(id).prop_stop = false;
            self.do_stop(id);
        }
    }

    /// Run one transition step: a starting service whose dependencies may
    /// all be up, or a stopping one whose dependents may all be down.
    /// A started service with `restarting` set is in smooth recovery and is
    /// treated like a starting one.
    pub(crate) fn execute_transition(&mut self, id: ServiceId) {
        let (state, restarting) = {
            let r = self.service(id);
            (r.service_state, r.restarting)
        };

        if state == ServiceState::Starting
            || (state == ServiceState::Started && restarting)
        {
            if self.check_deps_started(id) {
                self.all_deps_started(id);
            }
        } else if state == ServiceState::Stopping && self.stop_check_dependents(id) {
            self.rec(id).waiting_for_deps = false;

            // A service that actually stops has its explicit activation
            // released, unless it will restart.
            let release_explicit = {
                let r = self.service(id);
                r.start_explicit && !r.auto_restart && !r.restarting
            };
            if release_explicit {
                self.rec(id).start_explicit = false;
                self.release(id, false);
            }

            self.bring_down(id);
        }
    }

    pub(crate) fn do_start(&mut self, id: ServiceId) {
        let was_active = self.service(id).state() != ServiceState::Stopped;
        self.rec(id).desired_state = ServiceState::Started;

        if self.service(id).pinned_stopped {
            if !was_active {
                self.rec(id).start_skipped = true;
                self.failed_to_start(id, false, false);
            }
            return;
        }

        if was_active {
            // Already starting or started, or stopping and we need to wait
            // for that to complete first.
            if self.service(id).state() != ServiceState::Stopping {
                return;
            }

            if !self.runner().can_interrupt_stop(id) {
                self.rec(id).restarting = true;
                return;
            }

            // Stopping, and that can be interrupted. Stopping dependencies
            // are waiting on us, so they too return to starting instantly.
            self.notify_listeners(id, ServiceEvent::StopCancelled);
        } else {
            self.service_active();
            let queue = {
                let rec = self.rec(id);
                // A pending release means our acquisitions are still in
                // place; no require needs to go out.
                rec.prop_require = !rec.prop_release;
                rec.prop_release = false;
                rec.prop_require
            };
            if queue {
                self.add_prop_queue(id);
            }
        }

        self.initiate_start(id);
    }

    fn initiate_start(&mut self, id: ServiceId) {
        {
            let rec = self.rec(id);
            rec.start_failed = false;
            rec.start_skipped = false;
            rec.service_state = ServiceState::Starting;
            rec.waiting_for_deps = true;
        }
        if self.start_check_dependencies(id) {
            self.add_transition_queue(id);
        }
    }

    /// Walk outgoing edges, flag the ones not yet started as waited-on and
    /// prompt idle dependencies to start. True if everything is already up.
    fn start_check_dependencies(&mut self, id: ServiceId) -> bool {
        let mut all_started = true;
        let deps = self.service(id).depends_on.clone();
        for eid in deps {
            let to = self.edge(eid).to();
            let to_state = self.service(to).state();
            if to_state != ServiceState::Started {
                if to_state != ServiceState::Starting {
                    self.rec(to).prop_start = true;
                    self.add_prop_queue(to);
                }
                self.edge_mut(eid).waiting_on = true;
                all_started = false;
            }
        }
        all_started
    }

    /// True when no outgoing edge is still waited on.
    pub(crate) fn check_deps_started(&self, id: ServiceId) -> bool {
        self.service(id)
            .depends_on
            .iter()
            .all(|&eid| !self.edge(eid).waiting_on)
    }

    /// All dependencies are up: acquire the console if needed, then bring
    /// the service up and re-attach soft dependents.
    pub(crate) fn all_deps_started(&mut self, id: ServiceId) {
        {
            let r = self.service(id);
            if r.flags.starts_on_console && !r.have_console {
                self.queue_for_console(id);
                return;
            }
        }

        self.rec(id).waiting_for_deps = false;

        if !self.runner().can_proceed_to_start(id) {
            self.rec(id).waiting_for_deps = true;
            return;
        }

        let success = self.bring_up(id);
        self.rec(id).restarting = false;
        if success {
            // Re-attach milestone and soft dependents, now that we have
            // started again.
            let dependents = self.service(id).dependents.clone();
            for eid in dependents {
                if self.edge(eid).dep_type() == DepType::Regular || self.edge(eid).holding_acq {
                    continue;
                }
                let from_state = self.service(self.edge(eid).from()).state();
                if from_state == ServiceState::Started || from_state == ServiceState::Starting {
                    self.edge_mut(eid).holding_acq = true;
                    self.rec(id).required_by += 1;
                }
            }
        } else {
            self.failed_to_start(id, false, true);
        }
    }

    fn bring_up(&mut self, id: ServiceId) -> bool {
        match self.runner_bring_up(id) {
            BringUp::Complete => {
                self.started(id);
                true
            }
            BringUp::Pending => true,
            BringUp::Failed => false,
        }
    }

    fn bring_down(&mut self, id: ServiceId) {
        self.rec(id).waiting_for_deps = false;
        match self.runner_bring_down(id) {
            BringDown::Complete => self.stopped(id),
            BringDown::Pending => {}
        }
    }

    /// The service is up: reported by the runner, or immediately for
    /// services with no underlying work.
    pub fn started(&mut self, id: ServiceId) {
        // If we started on the console but don't keep it, hand it back.
        {
            let r = self.service(id);
            if r.have_console && !r.flags.runs_on_console {
                self.restore_terminal_pgrp();
                self.release_console(id);
            }
        }

        log::info!("Service {} started", self.service(id).name());
        self.rec(id).service_state = ServiceState::Started;
        self.notify_listeners(id, ServiceEvent::Started);

        if self.service(id).flags.rw_ready {
            self.rootfs_is_rw();
        }
        if self.service(id).flags.log_ready {
            self.setup_external_log();
        }

        {
            let r = self.service(id);
            if r.force_stop || r.desired_state == ServiceState::Stopped {
                // We must stop now after all.
                self.do_stop(id);
                return;
            }
        }

        // Notify dependents that were waiting on us.
        let dependents = self.service(id).dependents.clone();
        for eid in dependents {
            let from = self.edge(eid).from();
            self.dependency_started(from);
            self.edge_mut(eid).waiting_on = false;
        }
    }

    /// The start attempt failed: reported by the runner.
    pub fn start_failed(&mut self, id: ServiceId) {
        self.failed_to_start(id, false, true);
    }

    pub(crate) fn failed_to_start(&mut self, id: ServiceId, depfailed: bool, immediate_stop: bool) {
        if self.service(id).waiting_for_console {
            self.unqueue_console(id);
            self.rec(id).waiting_for_console = false;
        }

        if self.service(id).start_explicit {
            self.rec(id).start_explicit = false;
            self.release(id, false);
        }

        // Cancel start of dependents.
        let dependents = self.service(id).dependents.clone();
        for eid in dependents {
            let from = self.edge(eid).from();
            if self.edge(eid).is_hard() {
                // A started hard dependent already succeeded independently;
                // only those still starting are cancelled.
                if self.service(from).state() == ServiceState::Starting {
                    self.rec(from).prop_failure = true;
                    self.add_prop_queue(from);
                }
            } else if self.edge(eid).waiting_on {
                // Soft dependents are released as if we had started.
                self.edge_mut(eid).waiting_on = false;
                self.dependency_started(from);
            }

            // Always release now, so our desired state is stopped before
            // stopped() below; otherwise it may decide to restart us.
            if self.edge(eid).holding_acq {
                self.edge_mut(eid).holding_acq = false;
                self.release(id, false);
            }
        }

        self.rec(id).start_failed = true;
        if depfailed {
            log::error!(
                "Service {} did not start: a dependency failed",
                self.service(id).name()
            );
        } else if self.service(id).start_skipped {
            log::warn!(
                "Service {} start skipped: pinned stopped",
                self.service(id).name()
            );
        } else {
            log::error!("Service {} failed to start", self.service(id).name());
        }
        self.notify_listeners(id, ServiceEvent::FailedStart);

        if immediate_stop {
            self.stopped(id);
        }
    }

    /// The service is down: reported by the runner when bring-down
    /// completes, or immediately for services with no underlying work.
    /// Dependents have already stopped unless this is an unexpected
    /// process termination.
    pub fn stopped(&mut self, id: ServiceId) {
        if self.service(id).have_console {
            self.restore_terminal_pgrp();
            self.release_console(id);
        }

        self.rec(id).force_stop = false;

        // If we are to restart, restarting was set and the desired state is
        // still started. (A restart can be cancelled by a separately issued
        // stop, including a shutdown.)
        let will_restart = {
            let r = self.service(id);
            r.desired_state == ServiceState::Started && !r.pinned_stopped
        };
        self.rec(id).restarting = false;

        if !will_restart {
            // Not coming back: break milestone and soft incoming edges now.
            let dependents = self.service(id).dependents.clone();
            for eid in dependents {
                if self.edge(eid).dep_type() == DepType::Regular {
                    continue;
                }
                if self.edge(eid).waiting_on {
                    self.edge_mut(eid).waiting_on = false;
                    let from = self.edge(eid).from();
                    self.dependency_started(from);
                }
                if self.edge(eid).holding_acq {
                    // Release without issuing a stop; we are already
                    // stopped or stopping.
                    self.edge_mut(eid).holding_acq = false;
                    self.release(id, false);
                }
            }
        }

        // Signal dependencies in case they are waiting for us to stop.
        let deps = self.service(id).depends_on.clone();
        for eid in deps {
            let to = self.edge(eid).to();
            self.dependent_stopped(to);
        }

        self.rec(id).service_state = ServiceState::Stopped;

        if will_restart {
            self.rec(id).restarting = true;
            self.initiate_start(id);
        } else {
            self.service_inactive();
            if self.service(id).start_explicit {
                self.rec(id).start_explicit = false;
                self.release(id, false);
            }
        }

        // Start failure was logged already; only log other stops.
        if !self.service(id).start_failed {
            log::info!("Service {} stopped", self.service(id).name());

            // Chain-start: if this service self-terminated successfully and
            // won't restart, start the chained service now.
            let chain_to = {
                let r = self.service(id);
                if r.kind.did_finish(r.stop_reason)
                    && r.exit_status == Some(0)
                    && !will_restart
                    && !self.is_shutting_down()
                {
                    r.start_on_completion.clone()
                } else {
                    None
                }
            };
            if let Some(chain_name) = chain_to {
                match self.load_service(&chain_name) {
                    Ok(chain_id) => self.start(chain_id),
                    Err(err) => log::error!(
                        "Couldn't chain to service {}: couldn't load {}: {}",
                        chain_name,
                        err.service_name(),
                        err
                    ),
                }
            }
        }

        self.notify_listeners(id, ServiceEvent::Stopped);
    }

    /// The underlying process terminated on its own: reported by the
    /// runner with the exit status.
    pub fn process_terminated(&mut self, id: ServiceId, exit_status: i32) {
        self.rec(id).exit_status = Some(exit_status);

        match self.service(id).state() {
            ServiceState::Stopping => self.stopped(id),
            ServiceState::Started => {
                let smooth = {
                    let r = self.service(id);
                    r.smooth_recovery
                        && r.auto_restart
                        && !r.force_stop
                        && r.desired_state == ServiceState::Started
                };
                if smooth {
                    // Smooth recovery: respawn in place without leaving
                    // the started state or disturbing activation.
                    self.rec(id).restarting = true;
                    self.add_transition_queue(id);
                    self.process_queues();
                } else {
                    self.rec(id).stop_reason = StopReason::Terminated;
                    self.forced_stop(id);
                    self.process_queues();
                    if self.service(id).state() == ServiceState::Stopping {
                        // The process is already gone; don't wait for
                        // dependents before recording the stop.
                        self.stopped(id);
                        self.process_queues();
                    }
                }
            }
            ServiceState::Starting => {
                self.rec(id).stop_reason = StopReason::Failed;
                self.failed_to_start(id, false, true);
                self.process_queues();
            }
            ServiceState::Stopped => {}
        }
    }

    /// A dependency reached started; re-check our wait if we have one.
    /// Started state is included for smooth recovery while pinned.
    pub(crate) fn dependency_started(&mut self, id: ServiceId) {
        let r = self.service(id);
        if (r.service_state == ServiceState::Starting
            || r.service_state == ServiceState::Started)
            && r.waiting_for_deps
        {
            self.add_transition_queue(id);
        }
    }

    fn dependent_stopped(&mut self, id: ServiceId) {
        let r = self.service(id);
        if r.service_state == ServiceState::Stopping && r.waiting_for_deps {
            self.add_transition_queue(id);
        }
    }

    pub(crate) fn do_stop(&mut self, id: ServiceId) {
        if self.service(id).pinned_started {
            return;
        }

        let all_deps_stopped = self.stop_dependents(id);

        let state = self.service(id).state();
        if state != ServiceState::Started {
            if state == ServiceState::Starting {
                let (waiting_deps, waiting_console) = {
                    let r = self.service(id);
                    (r.waiting_for_deps, r.waiting_for_console)
                };
                if !waiting_deps && !waiting_console {
                    // Start is past its waits; the runner decides whether
                    // it can still be abandoned.
                    if !self.runner().can_interrupt_start(id) {
                        // We have to continue starting; we can stop once
                        // the started state is reached.
                        return;
                    }
                    if !self.runner().interrupt_start(id) {
                        // Interruption completes asynchronously.
                        self.notify_listeners(id, ServiceEvent::StartCancelled);
                        return;
                    }
                } else if waiting_console {
                    self.unqueue_console(id);
                    self.rec(id).waiting_for_console = false;
                }

                self.notify_listeners(id, ServiceEvent::StartCancelled);
                // Starting interruptibly: stop now by falling through.
            } else {
                // Already stopping or stopped; nothing to do.
                return;
            }
        }

        self.rec(id).service_state = ServiceState::Stopping;
        self.rec(id).waiting_for_deps = true;
        if all_deps_stopped {
            self.add_transition_queue(id);
        }
    }

    /// True when no regular dependent still holds an acquisition on us.
    /// Milestone holds don't outlive our stop, so they never block it.
    fn stop_check_dependents(&self, id: ServiceId) -> bool {
        self.service(id).dependents.iter().all(|&eid| {
            let e = self.edge(eid);
            !(e.dep_type() == DepType::Regular && e.holding_acq)
        })
    }

    /// Issue stops to holding regular dependents and break (or retain,
    /// when restarting) the rest. True if all regular dependents are
    /// already stopped.
    fn stop_dependents(&mut self, id: ServiceId) -> bool {
        let mut all_deps_stopped = true;
        let (force, retain_soft) = {
            let r = self.service(id);
            (r.force_stop, r.auto_restart || r.restarting)
        };

        let dependents = self.service(id).dependents.clone();
        for eid in dependents {
            let (holding, waiting, dep_type, from) = {
                let e = self.edge(eid);
                (e.holding_acq, e.waiting_on, e.dep_type(), e.from())
            };
            if !holding {
                continue;
            }

            if dep_type == DepType::Regular {
                if !self.service(from).is_stopped() {
                    // The dependent will notify us when it stops, which
                    // re-runs the dependents check.
                    all_deps_stopped = false;
                }
                if force {
                    // A forced stop extends to the dependents that must
                    // come down with us.
                    self.forced_stop(from);
                }
                self.rec(from).prop_stop = true;
                self.add_prop_queue(from);
            } else if !retain_soft {
                // Milestone and soft holds are retained over a restart,
                // but otherwise broken: the dependency has been reached
                // once and the dependent keeps running without it.
                if waiting {
                    if dep_type == DepType::Milestone {
                        // A milestone not yet reached cancels the
                        // dependent's start.
                        self.rec(from).prop_stop = true;
                        self.add_prop_queue(from);
                    } else {
                        self.edge_mut(eid).waiting_on = false;
                        self.dependency_started(from);
                        self.edge_mut(eid).holding_acq = false;
                        self.release(id, false);
                    }
                } else {
                    self.edge_mut(eid).holding_acq = false;
                    self.release(id, false);
                }
            }
        }

        all_deps_stopped
    }

    pub(crate) fn notify_listeners(&mut self, id: ServiceId, event: ServiceEvent) {
        let listeners = self.service(id).listeners.clone();
        if listeners.is_empty() {
            return;
        }
        let rec = &self.records()[id.0];
        for listener in &listeners {
            listener.service_event(rec, event);
        }
    }
}
