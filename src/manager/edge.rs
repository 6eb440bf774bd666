//! Dependency edges
//!
//! A directed link from a dependent service (`from`) to one of its
//! dependencies (`to`). Edges live in an arena on the service set; the
//! dependent's `depends_on` list is the owning side and the dependency's
//! `dependents` list holds back-references to the same indices.

use crate::services::DepType;

use super::record::ServiceId;

/// Stable index of an edge in the service set's edge arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EdgeId(pub(crate) usize);

/// One dependency link.
#[derive(Debug)]
pub struct DepEdge {
    pub(crate) from: ServiceId,
    pub(crate) to: ServiceId,
    pub(crate) dep_type: DepType,
    /// The dependent is blocked waiting for `to` to reach Started.
    pub(crate) waiting_on: bool,
    /// The dependent currently contributes one hold to `to.required_by`.
    pub(crate) holding_acq: bool,
}

impl DepEdge {
    pub(crate) fn new(from: ServiceId, to: ServiceId, dep_type: DepType) -> Self {
        Self {
            from,
            to,
            dep_type,
            waiting_on: false,
            holding_acq: false,
        }
    }

    pub fn from(&self) -> ServiceId {
        self.from
    }

    pub fn to(&self) -> ServiceId {
        self.to
    }

    pub fn dep_type(&self) -> DepType {
        self.dep_type
    }

    pub fn is_hard(&self) -> bool {
        self.dep_type.is_hard()
    }

    /// Whether the dependent is blocked waiting for the dependency to start.
    pub fn is_waiting(&self) -> bool {
        self.waiting_on
    }

    /// Whether the dependent currently holds the dependency active.
    pub fn is_holding(&self) -> bool {
        self.holding_acq
    }
}
