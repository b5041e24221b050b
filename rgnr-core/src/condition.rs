// vim: tw=80
//! Monitor conditions and lifecycle state
//!
//! An external cooperative scheduler calls the monitor once per tick.  The
//! engine asks to be run again by leaving a condition set, and stops being
//! run by clearing it.

use std::collections::BTreeSet;

use serde_derive::{Deserialize, Serialize};

/// Work the monitor has been asked to perform.
///
/// Declaration order is priority order: the monitor always services the
/// first set condition.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Condition {
    /// Rebuild the chunk bookkeeping from scratch
    ReconstructPaged,
    /// Compare edge state against the rebuild-logging mask
    EvalRebuildLogging,
    /// Mark rejoining positions as needing rebuild
    EvalMarkNr,
    /// Advance the rebuild checkpoint
    Rebuild,
    /// Drive the in-flight EMEH request
    EmehRequest,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub enum LifecycleState {
    /// Persisted state not yet loaded
    #[default]
    Specialize,
    /// Demoted while bookkeeping is re-derived
    Activate,
    Ready,
    /// Broken.  Needs operator action.
    Fail,
}

/// What a monitor tick tells its scheduler
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TickStatus {
    /// No work remains until some external event
    Done,
    /// Waiting on the peer or on an outstanding request
    Pending,
    /// More work is ready; run again soon
    Reschedule,
}

#[derive(Clone, Debug, Default)]
pub struct Conditions {
    set: BTreeSet<Condition>,
    current: Option<Condition>,
}

impl Conditions {
    pub fn set_condition(&mut self, cond: Condition) {
        if self.set.insert(cond) {
            tracing::trace!(?cond, "set condition");
        }
    }

    pub fn clear_condition(&mut self, cond: Condition) {
        self.set.remove(&cond);
    }

    /// Clear the condition most recently returned by `next`
    pub fn clear_current_condition(&mut self) {
        if let Some(cond) = self.current.take() {
            tracing::trace!(?cond, "clear condition");
            self.set.remove(&cond);
        }
    }

    pub fn is_set(&self, cond: Condition) -> bool {
        self.set.contains(&cond)
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
    }

    /// Highest priority set condition, which becomes the current one
    pub fn next(&mut self) -> Option<Condition> {
        self.current = self.set.iter().next().copied();
        self.current
    }

    pub fn iter(&self) -> impl Iterator<Item=Condition> + '_ {
        self.set.iter().copied()
    }
}

// LCOV_EXCL_STOP
