//! svcd - Service supervision core
//!
//! The state-machine and dependency-propagation engine of a service
//! supervisor: decides when each service in a graph of interdependent
//! services starts, stops, restarts or fails, and keeps the graph
//! consistent under asynchronous events.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │                     svcd                         │
//! ├───────────────┬─────────────────┬───────────────┤
//! │ Descriptions  │   Service set   │    Console    │
//! │ (services::)  │   + lifecycle   │    arbiter    │
//! ├───────────────┴─────────────────┴───────────────┤
//! │        ProcessRunner collaborator (trait)        │
//! └─────────────────────────────────────────────────┘
//! ```
//!
//! The engine is single-threaded and synchronous: external events (operator
//! commands, child exits, console grants) call into [`manager::ServiceSet`],
//! which mutates record state and enqueues propagation work; the caller then
//! drains to quiescence with [`manager::ServiceSet::process_queues`].
//! Process launching, description parsing and the event loop live outside
//! this crate, behind the [`manager::ProcessRunner`] and
//! [`services::ServiceLoader`] contracts.

pub mod manager;
pub mod services;

pub use manager::{ServiceId, ServiceListener, ServiceRecord, ServiceSet};
pub use services::{
    DepType, LoadError, OnstartFlags, ServiceEvent, ServiceKind, ServiceParams, ServiceState,
    StopReason,
};
