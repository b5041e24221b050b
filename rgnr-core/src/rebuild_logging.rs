// vim: tw=80
//! Rebuild-logging state
//!
//! A rebuild-logging position is skipped by writes.  Setting it restarts the
//! position's checkpoint at zero; clearing it releases the position's
//! checkpoint slot.  Both are single non-paged writes covering every position
//! of the request.

use std::time::Duration;

use tokio::time::Instant;

use crate::{
    checkpoint::create_checkpoint_data,
    edge::Edges,
    geometry::Geometry,
    metadata::{NonPagedInfo, NonPagedStore},
    types::*,
};

/// Start rebuild logging `positions` in `np`
pub fn set_rebuild_logging_in(np: &mut NonPagedInfo,
                              positions: PositionBitmask) -> Result<()>
{
    *np = create_checkpoint_data(np, 0, positions)?;
    np.rebuild_logging |= positions;
    Ok(())
}

/// Stop rebuild logging `positions` in `np`, releasing the checkpoint slots of
/// those that are fully rebuilt.
pub fn clear_rebuild_logging_in(np: &mut NonPagedInfo,
                                positions: PositionBitmask)
{
    np.rebuild_logging = np.rebuild_logging.difference(positions);
    for p in positions.iter() {
        if np.checkpoints.checkpoint(p) == Some(END_MARKER) {
            np.checkpoints.free(p);
        }
    }
}

#[tracing::instrument(skip(store))]
pub async fn set_rebuild_logging(store: &NonPagedStore,
                                 positions: PositionBitmask)
    -> Result<NonPagedInfo>
{
    store.update(|np| set_rebuild_logging_in(np, positions)).await
}

#[tracing::instrument(skip(store))]
pub async fn clear_rebuild_logging(store: &NonPagedStore,
                                   positions: PositionBitmask)
    -> Result<NonPagedInfo>
{
    store.update(|np| {
        clear_rebuild_logging_in(np, positions);
        Ok(())
    }).await
}

/// Would the raid group be broken with these failures?
///
/// Only parity raid groups are ever considered to be going broken.
pub fn is_going_broken(geometry: &Geometry, edges: &Edges,
                       failed_io: PositionBitmask) -> bool
{
    if !geometry.raid_type().is_parity() {
        return false;
    }
    let redundancy = geometry.redundancy();
    let union = edges.failed_positions() | failed_io;
    edges.down_count() > redundancy ||
        failed_io.count() > redundancy ||
        union.count() > redundancy
}

/// Outcome of [`BrokenRaidGroupGuard::check`]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RlDecision {
    Proceed,
    Wait,
}

/// Defers rebuild logging that would break a raid group, in case the
/// failures are transient.  Never defers for longer than `wait`.
///
/// Once the window expires it stays expired until the raid group is no longer
/// going broken.
#[derive(Clone, Copy, Debug)]
pub struct BrokenRaidGroupGuard {
    wait: Duration,
    since: Option<Instant>,
    expired: bool,
}

impl BrokenRaidGroupGuard {
    pub fn new(wait: Duration) -> Self {
        BrokenRaidGroupGuard { wait, since: None, expired: false }
    }

    pub fn check(&mut self, going_broken: bool, now: Instant) -> RlDecision {
        if !going_broken {
            self.since = None;
            self.expired = false;
            return RlDecision::Proceed;
        }
        match self.since {
            None => {
                tracing::info!(wait = ?self.wait,
                    "deferring rebuild logging; raid group going broken");
                self.since = Some(now);
                RlDecision::Wait
            }
            Some(since) if now.duration_since(since) >= self.wait => {
                if !self.expired {
                    tracing::warn!("raid group still going broken; proceeding");
                    self.expired = true;
                }
                RlDecision::Proceed
            }
            Some(_) => RlDecision::Wait
        }
    }
}

// LCOV_EXCL_STOP
