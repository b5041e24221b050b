// vim: tw=80
//! Structured event-log records for field diagnosis
//!
//! Writes are fire-and-forget.  The engine never retries or waits on them.

use std::sync::{Mutex, PoisonError};

#[cfg(test)] use mockall::automock;
use serde_derive::{Deserialize, Serialize};

use crate::types::*;

#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub enum EventId {
    RebuildLoggingStarted,
    RebuildLoggingStopped,
    RebuildStarted,
    RebuildCompleted,
    RaidGroupBroken,
    PagedMetadataReconstructed,
    RaidGroupErrorThresholdsDisabled,
    ProactiveSpareErrorThresholdsDisabled,
    RaidGroupErrorThresholdsIncreased,
    RaidGroupErrorThresholdsRestored,
    ProactiveSpareErrorThresholdsRestored,
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Event {
    pub id: EventId,
    pub raid_group: RaidGroupId,
    /// Positions the event applies to
    pub positions: PositionBitmask,
    /// Event-specific datum: an LBA, a percentage, or zero
    pub data: u64,
}

impl Event {
    pub fn new(id: EventId, raid_group: RaidGroupId,
               positions: PositionBitmask) -> Self
    {
        Event { id, raid_group, positions, data: 0 }
    }

    pub fn with_data(mut self, data: u64) -> Self {
        self.data = data;
        self
    }
}

#[cfg_attr(test, automock)]
pub trait EventLog: Send + Sync {
    fn write(&self, event: Event);
}

/// Emits every record as a `tracing` event
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingEventLog;

impl EventLog for TracingEventLog {
    fn write(&self, event: Event) {
        tracing::info!(
            id = ?event.id,
            rg = event.raid_group.number,
            object_id = event.raid_group.object_id,
            positions = %event.positions,
            data = event.data,
            "event log"
        );
    }
}

/// Keeps every record in memory
#[derive(Debug, Default)]
pub struct MemEventLog {
    events: Mutex<Vec<Event>>
}

impl MemEventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Records with the given id, oldest first
    pub fn find(&self, id: EventId) -> Vec<Event> {
        self.events().into_iter().filter(|e| e.id == id).collect()
    }
}

impl EventLog for MemEventLog {
    fn write(&self, event: Event) {
        self.events.lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}

// LCOV_EXCL_STOP
