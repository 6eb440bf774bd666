//! Console arbitration
//!
//! The controlling terminal is a single-holder resource. Services that
//! start on the console queue here FIFO; the head of the queue is granted
//! the console as soon as the previous holder releases it. On release the
//! terminal foreground process group is handed back to the supervisor's own
//! group (when terminal control is enabled).

use std::os::fd::AsFd;

use crate::services::ServiceState;

use super::record::ServiceId;
use super::ServiceSet;

impl ServiceSet {
    /// Place a service on the console queue; grants immediately if the
    /// console is free.
    pub(crate) fn queue_for_console(&mut self, id: ServiceId) {
        self.rec(id).waiting_for_console = true;
        self.append_console_queue(id);
    }

    pub(crate) fn append_console_queue(&mut self, id: ServiceId) {
        if self.console_holder() == Some(id) || self.console_queue_ref().contains(&id) {
            return;
        }
        self.console_queue().push_back(id);
        if self.console_holder().is_none() {
            self.pull_console_queue();
        }
    }

    /// Grant the console to the head of the queue, if it is free.
    pub(crate) fn pull_console_queue(&mut self) {
        if self.console_holder().is_some() {
            return;
        }
        if let Some(next) = self.console_queue().pop_front() {
            self.set_console_holder(Some(next));
            self.acquired_console(next);
        }
    }

    /// Remove a service from the console queue without granting.
    pub(crate) fn unqueue_console(&mut self, id: ServiceId) {
        self.console_queue().retain(|&queued| queued != id);
    }

    /// Give the console up and pass it to the next waiter.
    pub(crate) fn release_console(&mut self, id: ServiceId) {
        self.rec(id).have_console = false;
        if self.console_holder() == Some(id) {
            self.set_console_holder(None);
            self.pull_console_queue();
        }
    }

    /// Callback from the arbiter: `id` now holds the console.
    pub(crate) fn acquired_console(&mut self, id: ServiceId) {
        let rec = self.rec(id);
        rec.waiting_for_console = false;
        rec.have_console = true;

        if rec.service_state != ServiceState::Starting {
            // We got the console but no longer want it.
            self.release_console(id);
        } else if self.check_deps_started(id) {
            self.all_deps_started(id);
        } else {
            // Can't use it yet; requeue happens when dependencies are up.
            self.release_console(id);
        }
    }

    pub fn is_queued_for_console(&self, id: ServiceId) -> bool {
        self.console_queue_ref().contains(&id)
    }

    pub fn is_console_queue_empty(&self) -> bool {
        self.console_queue_ref().is_empty()
    }

    pub fn console_holder_service(&self) -> Option<ServiceId> {
        self.console_holder()
    }

    /// Return the terminal foreground process group to the supervisor.
    pub(crate) fn restore_terminal_pgrp(&mut self) {
        if !self.terminal_control() {
            return;
        }
        let stdin = std::io::stdin();
        if let Err(err) = nix::unistd::tcsetpgrp(stdin.as_fd(), nix::unistd::getpgrp()) {
            log::debug!("Failed to reclaim terminal foreground group: {}", err);
        }
    }
}
