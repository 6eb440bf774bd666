//! Service description and lifecycle type definitions

mod desc;
mod state;

pub use desc::{
    DepType, LoadError, NullLoader, OnstartFlags, ServiceDescription, ServiceKind, ServiceLoader,
    ServiceParams,
};
pub use state::{ServiceEvent, ServiceState, StopReason};
