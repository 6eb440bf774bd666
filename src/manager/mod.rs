//! The service set and its propagation engine
//!
//! Owns every service record, the dependency-edge arena and the work
//! queues. External events (operator commands, runner callbacks, console
//! grants) mutate record state and enqueue follow-up work; a single
//! [`ServiceSet::process_queues`] call then drains to quiescence. All of it
//! runs on one thread; nothing here blocks.

mod console;
mod edge;
mod lifecycle;
mod record;
mod runner;

pub use edge::{DepEdge, EdgeId};
pub use record::{ServiceId, ServiceListener, ServiceRecord};
pub use runner::{BringDown, BringUp, DefaultRunner, ProcessRunner};

use std::collections::{HashMap, HashSet, VecDeque};
use std::rc::Rc;

use crate::services::{DepType, LoadError, NullLoader, ServiceLoader, ServiceParams};

/// All supervised services and the machinery that keeps them consistent.
pub struct ServiceSet {
    records: Vec<ServiceRecord>,
    edges: Vec<DepEdge>,
    by_name: HashMap<String, ServiceId>,

    /// Services with one or more prop_* bits pending.
    prop_queue: VecDeque<ServiceId>,
    /// Services whose dependency wait may have become satisfiable.
    transition_queue: VecDeque<ServiceId>,

    /// FIFO of services waiting for the console, and the current holder.
    console_queue: VecDeque<ServiceId>,
    console_holder: Option<ServiceId>,
    /// Reassign the terminal foreground process group on console release.
    /// Off by default so embedding tests never touch the tty.
    take_terminal_control: bool,

    active_services: usize,
    shutting_down: bool,

    /// Set by started services carrying the corresponding onstart flags.
    rootfs_rw: bool,
    external_log_ready: bool,

    runner: Box<dyn ProcessRunner>,
    loader: Box<dyn ServiceLoader>,
    /// Names currently being loaded, for description-cycle detection.
    loading: HashSet<String>,
}

impl ServiceSet {
    pub fn new() -> Self {
        Self::with_runner(Box::new(DefaultRunner))
    }

    pub fn with_runner(runner: Box<dyn ProcessRunner>) -> Self {
        Self {
            records: Vec::new(),
            edges: Vec::new(),
            by_name: HashMap::new(),
            prop_queue: VecDeque::new(),
            transition_queue: VecDeque::new(),
            console_queue: VecDeque::new(),
            console_holder: None,
            take_terminal_control: false,
            active_services: 0,
            shutting_down: false,
            rootfs_rw: false,
            external_log_ready: false,
            runner,
            loader: Box::new(NullLoader),
            loading: HashSet::new(),
        }
    }

    /// Install the description loader consulted by [`Self::load_service`].
    pub fn set_loader(&mut self, loader: Box<dyn ServiceLoader>) {
        self.loader = loader;
    }

    /// Enable terminal foreground-group reassignment on console release.
    pub fn set_terminal_control(&mut self, enabled: bool) {
        self.take_terminal_control = enabled;
    }

    /// Add a service with already-resolved dependencies, in declaration
    /// order. Returns the new record's id.
    pub fn add_service(&mut self, params: ServiceParams, deps: &[(ServiceId, DepType)]) -> ServiceId {
        let id = ServiceId(self.records.len());
        let record = ServiceRecord::new(
            params.name,
            params.kind,
            params.flags,
            params.auto_restart,
            params.smooth_recovery,
            params.start_on_completion,
        );
        self.by_name.insert(record.name.clone(), id);
        self.records.push(record);

        for &(to, dep_type) in deps {
            let edge_id = EdgeId(self.edges.len());
            self.edges.push(DepEdge::new(id, to, dep_type));
            self.records[id.0].depends_on.push(edge_id);
            self.records[to.0].dependents.push(edge_id);
        }
        id
    }

    pub fn find_service(&self, name: &str) -> Option<ServiceId> {
        self.by_name.get(name).copied()
    }

    pub fn service(&self, id: ServiceId) -> &ServiceRecord {
        &self.records[id.0]
    }

    pub fn edge(&self, id: EdgeId) -> &DepEdge {
        &self.edges[id.0]
    }

    /// Iterate over all services in load order.
    pub fn services(&self) -> impl Iterator<Item = (ServiceId, &ServiceRecord)> {
        self.records
            .iter()
            .enumerate()
            .map(|(i, r)| (ServiceId(i), r))
    }

    /// Load a service (and, recursively, its dependencies) through the
    /// description loader. Already-present services are returned as-is.
    pub fn load_service(&mut self, name: &str) -> Result<ServiceId, LoadError> {
        if let Some(id) = self.find_service(name) {
            return Ok(id);
        }
        if !self.loading.insert(name.to_string()) {
            return Err(LoadError::DependencyCycle {
                name: name.to_string(),
            });
        }
        let result = self.load_service_deps(name);
        self.loading.remove(name);
        result
    }

    fn load_service_deps(&mut self, name: &str) -> Result<ServiceId, LoadError> {
        let desc = self.loader.load(name)?;
        let mut deps = Vec::with_capacity(desc.depends.len());
        for (dep_name, dep_type) in &desc.depends {
            deps.push((self.load_service(dep_name)?, *dep_type));
        }
        Ok(self.add_service(desc.params, &deps))
    }

    /// Attach a lifecycle listener to a service.
    pub fn add_listener(&mut self, id: ServiceId, listener: Rc<dyn ServiceListener>) {
        self.records[id.0].listeners.push(listener);
    }

    pub fn remove_listener(&mut self, id: ServiceId, listener: &Rc<dyn ServiceListener>) {
        self.records[id.0]
            .listeners
            .retain(|l| !Rc::ptr_eq(l, listener));
    }

    /// Start a service (recording an explicit user hold) and drain queues.
    pub fn start_service(&mut self, id: ServiceId) {
        self.start(id);
        self.process_queues();
    }

    /// Stop a service, bringing it down, and drain queues.
    pub fn stop_service(&mut self, id: ServiceId) {
        self.stop(id, true);
        self.process_queues();
    }

    /// Begin shutdown: stop everything, forcibly, and drain queues.
    /// Suppresses chain-starts from this point on.
    pub fn stop_all_services(&mut self) {
        self.shutting_down = true;
        for i in 0..self.records.len() {
            let id = ServiceId(i);
            self.stop(id, true);
            self.forced_stop(id);
        }
        self.process_queues();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down
    }

    pub fn count_active_services(&self) -> usize {
        self.active_services
    }

    /// Drain the propagation queue, then the transition queue, repeating
    /// until both are empty. Propagation bits are consumed in the fixed
    /// order require, release, failure, start, stop. Transitions only run
    /// while propagation is quiescent: a transition that enqueues new
    /// propagation work yields back to the propagation drain first.
    pub fn process_queues(&mut self) {
        while !self.prop_queue.is_empty() || !self.transition_queue.is_empty() {
            while let Some(id) = self.prop_queue.pop_front() {
                self.records[id.0].queued_prop = false;
                self.do_propagation(id);
            }
            while self.prop_queue.is_empty() {
                let Some(id) = self.transition_queue.pop_front() else {
                    break;
                };
                self.records[id.0].queued_transition = false;
                self.execute_transition(id);
            }
        }
    }

    pub(crate) fn add_prop_queue(&mut self, id: ServiceId) {
        let rec = &mut self.records[id.0];
        if !rec.queued_prop {
            rec.queued_prop = true;
            self.prop_queue.push_back(id);
        }
    }

    pub(crate) fn add_transition_queue(&mut self, id: ServiceId) {
        let rec = &mut self.records[id.0];
        if !rec.queued_transition {
            rec.queued_transition = true;
            self.transition_queue.push_back(id);
        }
    }

    pub(crate) fn service_active(&mut self) {
        self.active_services += 1;
    }

    pub(crate) fn service_inactive(&mut self) {
        self.active_services -= 1;
    }

    pub(crate) fn rec(&mut self, id: ServiceId) -> &mut ServiceRecord {
        &mut self.records[id.0]
    }

    pub(crate) fn records(&self) -> &[ServiceRecord] {
        &self.records
    }

    pub(crate) fn edge_mut(&mut self, id: EdgeId) -> &mut DepEdge {
        &mut self.edges[id.0]
    }

    pub(crate) fn runner_bring_up(&mut self, id: ServiceId) -> BringUp {
        let Self { records, runner, .. } = self;
        let rec = &records[id.0];
        runner.bring_up(id, &rec.name, rec.kind)
    }

    pub(crate) fn runner_bring_down(&mut self, id: ServiceId) -> BringDown {
        let Self { records, runner, .. } = self;
        let rec = &records[id.0];
        runner.bring_down(id, &rec.name, rec.kind)
    }

    pub(crate) fn runner(&mut self) -> &mut dyn ProcessRunner {
        &mut *self.runner
    }

    /// Once-only global hook: the root filesystem became writable.
    pub(crate) fn rootfs_is_rw(&mut self) {
        if !self.rootfs_rw {
            self.rootfs_rw = true;
            log::info!("Root filesystem is now read-write");
        }
    }

    /// Once-only global hook: the external log daemon is available.
    pub(crate) fn setup_external_log(&mut self) {
        if !self.external_log_ready {
            self.external_log_ready = true;
            log::info!("External logging is now available");
        }
    }

    pub fn is_rootfs_rw(&self) -> bool {
        self.rootfs_rw
    }

    pub fn is_external_log_ready(&self) -> bool {
        self.external_log_ready
    }

    pub(crate) fn console_queue(&mut self) -> &mut VecDeque<ServiceId> {
        &mut self.console_queue
    }

    pub(crate) fn console_queue_ref(&self) -> &VecDeque<ServiceId> {
        &self.console_queue
    }

    pub(crate) fn console_holder(&self) -> Option<ServiceId> {
        self.console_holder
    }

    pub(crate) fn set_console_holder(&mut self, holder: Option<ServiceId>) {
        self.console_holder = holder;
    }

    pub(crate) fn terminal_control(&self) -> bool {
        self.take_terminal_control
    }
}

impl Default for ServiceSet {
    fn default() -> Self {
        Self::new()
    }
}
