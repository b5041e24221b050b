// vim: tw=80
//! The rebuild scheduler
//!
//! Each step finds the positions that need attention, then either retires
//! fully rebuilt positions or reconstructs the next marked chunks and moves
//! the checkpoint past them.  Checkpoints only ever move forward.

#[cfg(test)] use mockall::automock;

use crate::{
    edge::{PathAttributes, UpstreamEdge, VirtualDriveMode},
    event_log::{Event, EventId, EventLog},
    geometry::Geometry,
    metadata::{NonPagedInfo, NonPagedStore},
    needs_rebuild::NeedsRebuild,
    rebuild_logging::clear_rebuild_logging,
    types::*,
};

/// Must `position` still be rebuilt?
pub fn determine_if_rebuild_needed(np: &NonPagedInfo, position: Position)
    -> bool
{
    np.rebuild_logging.contains(position) &&
        np.checkpoints.checkpoint(position).map_or(true, |c| c < END_MARKER)
}

/// Everything one scan of the non-paged state found
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct DiskAction {
    /// Every rebuild-logging position
    pub degraded: PositionBitmask,
    /// Positions whose rebuild can make progress now
    pub to_be_rebuilt: PositionBitmask,
    /// Rebuilt positions ready to leave rebuild logging
    pub complete: PositionBitmask,
    /// Lowest checkpoint among `to_be_rebuilt`, or `END_MARKER` if none
    pub checkpoint: LbaT,
    /// Positions whose checkpoint bookkeeping is inconsistent
    pub needs_reset: PositionBitmask,
}

/// Classify every rebuild-logging position in a single pass.
///
/// Only positions in `rebuildable` may be rebuilt or completed; the others
/// are merely degraded.
pub fn find_disk_needing_action(np: &NonPagedInfo, geometry: &Geometry,
                                rebuildable: PositionBitmask) -> DiskAction
{
    let capacity = geometry.disk_capacity();
    let mut action = DiskAction {
        degraded: np.rebuild_logging,
        to_be_rebuilt: PositionBitmask::empty(),
        complete: PositionBitmask::empty(),
        checkpoint: END_MARKER,
        needs_reset: PositionBitmask::empty(),
    };
    for p in np.rebuild_logging.iter() {
        match np.checkpoints.checkpoint(p) {
            None => action.needs_reset.insert(p),
            Some(c) if c > capacity && c != END_MARKER => {
                tracing::error!(position = p, checkpoint = c, capacity,
                    "checkpoint beyond capacity");
                action.needs_reset.insert(p);
            }
            _ if !rebuildable.contains(p) => (),
            Some(c) if c == capacity || c == END_MARKER =>
                action.complete.insert(p),
            Some(c) => {
                action.to_be_rebuilt.insert(p);
                action.checkpoint = action.checkpoint.min(c);
            }
        }
    }
    action
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum RebuildState {
    #[default]
    Idle,
    PrereadMetadata,
    PermitRequest,
    RebuildIo,
    ClearRl,
}

/// Answer to a rebuild permit request
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Permit {
    Granted,
    /// Try again on a later tick
    Deferred,
}

/// The I/O path, as seen by the rebuild scheduler
#[cfg_attr(test, automock)]
pub trait RebuildIo: Send + Sync {
    /// Ask whether a rebuild of this range may run now
    fn request_permit(&self, lba: LbaT, blocks: BlockCountT) -> BoxFut<Permit>;

    /// Reconstruct `[lba, lba + blocks)` of `positions` from the others
    fn rebuild(&self, positions: PositionBitmask, lba: LbaT,
               blocks: BlockCountT) -> BoxFut<()>;
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StepOutcome {
    /// Nothing to rebuild
    Idle,
    /// `positions`' checkpoint moved to `checkpoint`
    Progress { positions: PositionBitmask, checkpoint: LbaT },
    /// The I/O path deferred the rebuild
    Deferred,
    /// These positions finished and left rebuild logging
    Completed(PositionBitmask),
    /// These positions' bookkeeping must be reset
    NeedsReset(PositionBitmask),
}

pub struct RebuildContext<'a> {
    pub rg: RaidGroupId,
    pub store: &'a NonPagedStore,
    pub nr: &'a NeedsRebuild,
    pub io: &'a dyn RebuildIo,
    pub events: &'a dyn EventLog,
    /// Rebuild-logging positions whose edges are usable and whose extents
    /// have been marked
    pub rebuildable: PositionBitmask,
    /// Most chunks to rebuild per I/O
    pub chunks_per_io: u32,
}

#[derive(Debug, Default)]
pub struct RebuildDriver {
    state: RebuildState,
    /// Positions whose RebuildStarted event was logged
    announced: PositionBitmask,
}

impl RebuildDriver {
    pub fn state(&self) -> RebuildState {
        self.state
    }

    async fn set_checkpoints(ctx: &RebuildContext<'_>,
                             positions: PositionBitmask, checkpoint: LbaT,
                             blocks_rebuilt: BlockCountT)
        -> Result<NonPagedInfo>
    {
        ctx.store.update(|np| {
            for p in positions.iter() {
                let old = np.checkpoints.checkpoint(p).ok_or(Error::ENOENT)?;
                if checkpoint > old {
                    np.checkpoints.set_checkpoint(p, checkpoint)?;
                }
                np.checkpoints.add_blocks_rebuilt(p, blocks_rebuilt);
            }
            Ok(())
        }).await
    }

    /// Retire positions whose rebuild is finished
    async fn complete(&mut self, ctx: &RebuildContext<'_>,
                      positions: PositionBitmask) -> Result<StepOutcome>
    {
        self.state = RebuildState::ClearRl;
        let np = Self::set_checkpoints(ctx, positions, END_MARKER, 0).await?;
        let blocks: Vec<u64> = positions.iter()
            .map(|p| np.checkpoints.blocks_rebuilt(p).unwrap_or(0))
            .collect();
        clear_rebuild_logging(ctx.store, positions).await?;
        for (p, b) in positions.iter().zip(blocks) {
            tracing::info!(position = p, blocks_rebuilt = b,
                           "rebuild complete");
            ctx.events.write(Event::new(EventId::RebuildCompleted, ctx.rg,
                PositionBitmask::single(p)).with_data(b));
        }
        self.announced = self.announced.difference(positions);
        self.state = RebuildState::Idle;
        Ok(StepOutcome::Completed(positions))
    }

    /// Make one step of progress
    #[tracing::instrument(skip(self, ctx))]
    pub async fn step(&mut self, ctx: &RebuildContext<'_>)
        -> Result<StepOutcome>
    {
        let geometry = ctx.nr.geometry();
        let capacity = geometry.disk_capacity();
        self.state = RebuildState::Idle;
        let np = ctx.store.get();
        let action = find_disk_needing_action(&np, geometry, ctx.rebuildable);
        if !action.needs_reset.is_empty() {
            return Ok(StepOutcome::NeedsReset(action.needs_reset));
        }
        if !action.complete.is_empty() {
            return self.complete(ctx, action.complete).await;
        }
        if action.to_be_rebuilt.is_empty() {
            return Ok(StepOutcome::Idle);
        }
        let checkpoint = action.checkpoint;
        // Positions behind others catch up before they rebuild together
        let positions: PositionBitmask = action.to_be_rebuilt.iter()
            .filter(|p| np.checkpoints.checkpoint(*p) == Some(checkpoint))
            .collect();
        let fresh = positions.difference(self.announced);
        if !fresh.is_empty() {
            ctx.events.write(Event::new(EventId::RebuildStarted, ctx.rg, fresh)
                             .with_data(checkpoint));
            self.announced |= fresh;
        }

        self.state = RebuildState::PrereadMetadata;
        let run = match ctx.nr.next_marked(checkpoint, positions).await? {
            None => {
                // Nothing left marked
                tracing::debug!(%positions, checkpoint, "no marked chunks");
                Self::set_checkpoints(ctx, positions, capacity, 0).await?;
                self.state = RebuildState::Idle;
                return Ok(StepOutcome::Progress {
                    positions,
                    checkpoint: capacity
                });
            }
            Some(run) => run
        };
        let lba = geometry.chunk_lba(run.start_chunk);
        if lba > checkpoint {
            // Skip the clean chunks
            Self::set_checkpoints(ctx, positions, lba, 0).await?;
            self.state = RebuildState::Idle;
            return Ok(StepOutcome::Progress { positions, checkpoint: lba });
        }
        let chunks = run.chunk_count.min(u64::from(ctx.chunks_per_io.max(1)));
        let blocks = (chunks * geometry.chunk_size()).min(capacity - lba);

        self.state = RebuildState::PermitRequest;
        if ctx.io.request_permit(lba, blocks).await? == Permit::Deferred {
            tracing::debug!(lba, blocks, "rebuild permit deferred");
            self.state = RebuildState::Idle;
            return Ok(StepOutcome::Deferred);
        }

        self.state = RebuildState::RebuildIo;
        ctx.io.rebuild(run.positions, lba, blocks).await?;
        let still_logging = np.rebuild_logging.difference(positions);
        ctx.nr.clear_nr_for_range(lba, blocks, still_logging).await?;
        let next = lba + blocks;
        Self::set_checkpoints(ctx, positions, next, blocks).await?;
        self.state = RebuildState::Idle;
        Ok(StepOutcome::Progress { positions, checkpoint: next })
    }
}

/// What a virtual drive should do while one of its positions needs rebuild
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum HandOff {
    /// The parent raid group is rebuilding through us.  Stay degraded.
    ContinueDegraded,
    /// Nobody will rebuild this position
    Broken,
}

/// A pass-through virtual drive can't rebuild itself; its parent must.  Check
/// that the parent really is doing so.
///
/// `nr_marked` is the set of positions whose extents have been marked.
pub fn evaluate_virtual_drive_hand_off(upstream: &dyn UpstreamEdge,
                                       np: &NonPagedInfo,
                                       nr_marked: PositionBitmask)
    -> HandOff
{
    let config = match upstream.get_configuration() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(?e, "cannot get virtual drive configuration");
            return HandOff::Broken;
        }
    };
    if config.job_in_progress {
        tracing::info!("job in progress; not continuing degraded");
        return HandOff::Broken;
    }
    let position = match config.mode {
        VirtualDriveMode::PassThruFirstEdge |
            VirtualDriveMode::PassThruSecondEdge =>
        {
            // Pass-through modes always name a position
            config.mode.pass_thru_position().unwrap_or(0)
        }
        mode => {
            tracing::info!(?mode, "not pass-through; not continuing degraded");
            return HandOff::Broken;
        }
    };
    let checkpoint = np.checkpoints.checkpoint(position);
    if !nr_marked.contains(position) || checkpoint == Some(END_MARKER) {
        // Racing with the parent's completion
        tracing::warn!(position, ?checkpoint, %nr_marked,
            "pass-through position already rebuilt");
        return HandOff::ContinueDegraded;
    }
    if !upstream.path_attributes()
        .contains(PathAttributes::DEGRADED_NEEDS_REBUILD)
    {
        tracing::error!(position, ?checkpoint,
            "degraded needs rebuild not set upstream");
        return HandOff::Broken;
    }
    HandOff::ContinueDegraded
}

// LCOV_EXCL_STOP
