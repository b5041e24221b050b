// vim: tw=80
//! The Needs-Rebuild engine
//!
//! Marks chunk ranges as needing reconstruction for some positions, and clears
//! those marks once the range has been rebuilt.  A range that crosses the
//! exported capacity has its records in two regions, so it is updated with
//! two writes, user data first.  If the first fails, the second is never
//! issued, and the whole request must be retried.

use std::collections::VecDeque;

use crate::{
    geometry::Geometry,
    metadata::{ChunkAccessor, ChunkPatch, MarkedRange, VERIFY_ALL},
    types::*,
    util::intersect,
};

/// One single-region piece of a range update
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RegionWrite {
    pub start_lba: LbaT,
    pub blocks: BlockCountT,
    pub use_nonpaged: bool,
}

/// Split `[start_lba, start_lba + blocks)` into the writes needed to update
/// its chunk records, in issue order.
///
/// The range is first truncated to the per-member capacity.  Anything at or
/// beyond it needs no write.
pub fn plan_region_writes(geometry: &Geometry, start_lba: LbaT,
                          blocks: BlockCountT) -> Vec<RegionWrite>
{
    let end = start_lba.saturating_add(blocks)
        .min(geometry.disk_capacity());
    if start_lba >= end {
        return Vec::new();
    }
    if !geometry.has_paged_metadata() {
        return vec![RegionWrite {
            start_lba,
            blocks: end - start_lba,
            use_nonpaged: true
        }];
    }
    let boundary = geometry.exported_capacity();
    [(0..boundary, false), (boundary..LbaT::MAX, true)].into_iter()
        .map(|(region, use_nonpaged)| {
            let r = intersect(start_lba..end, region);
            RegionWrite {
                start_lba: r.start,
                blocks: r.end - r.start,
                use_nonpaged
            }
        }).filter(|w| w.blocks > 0)
        .collect()
}

/// Progress of one range update
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MarkState {
    ComputingBoundary,
    WritingUserData,
    WritingMetadataRegion,
    Done,
}

#[derive(Debug)]
struct RangeUpdate {
    writes: VecDeque<RegionWrite>,
    state: MarkState,
}

impl RangeUpdate {
    fn new() -> Self {
        RangeUpdate {
            writes: VecDeque::new(),
            state: MarkState::ComputingBoundary
        }
    }

    fn plan(&mut self, geometry: &Geometry, start_lba: LbaT,
            blocks: BlockCountT)
    {
        debug_assert_eq!(self.state, MarkState::ComputingBoundary);
        self.writes = plan_region_writes(geometry, start_lba, blocks).into();
    }

    fn next_write(&mut self) -> Option<RegionWrite> {
        let w = self.writes.pop_front();
        self.state = match w {
            Some(RegionWrite{use_nonpaged: false, ..}) =>
                MarkState::WritingUserData,
            Some(RegionWrite{use_nonpaged: true, ..}) =>
                MarkState::WritingMetadataRegion,
            None => MarkState::Done
        };
        w
    }
}

pub struct NeedsRebuild {
    chunks: ChunkAccessor,
}

impl NeedsRebuild {
    pub fn new(chunks: ChunkAccessor) -> Self {
        NeedsRebuild { chunks }
    }

    pub fn chunks(&self) -> &ChunkAccessor {
        &self.chunks
    }

    pub fn geometry(&self) -> &Geometry {
        self.chunks.geometry()
    }

    async fn update_range(&self, start_lba: LbaT, blocks: BlockCountT,
                          patch: ChunkPatch) -> Result<()>
    {
        let geometry = self.chunks.geometry();
        let mut update = RangeUpdate::new();
        update.plan(geometry, start_lba, blocks);
        while let Some(w) = update.next_write() {
            let chunks = geometry.chunk_range(w.start_lba, w.blocks);
            tracing::trace!(state = ?update.state, ?w, "chunk update");
            self.chunks.write_chunk_range(chunks.start,
                chunks.end - chunks.start, patch, w.use_nonpaged)
                .await
                .map_err(|e| {
                    tracing::warn!(?w, ?e, "chunk metadata write failed");
                    e
                })?;
        }
        debug_assert_eq!(update.state, MarkState::Done);
        Ok(())
    }

    /// Mark `[start_lba, start_lba + blocks)` as needing rebuild for
    /// `position`.  Marking an already marked range changes nothing.
    #[tracing::instrument(skip(self))]
    pub async fn mark_nr(&self, position: Position, start_lba: LbaT,
                         blocks: BlockCountT) -> Result<()>
    {
        self.mark_nr_for_positions(PositionBitmask::single(position),
                                   start_lba, blocks).await
    }

    /// Like [`mark_nr`](Self::mark_nr), for several positions at once
    pub async fn mark_nr_for_positions(&self, positions: PositionBitmask,
                                       start_lba: LbaT, blocks: BlockCountT)
        -> Result<()>
    {
        if positions.is_empty() {
            return Ok(());
        }
        self.update_range(start_lba, blocks, ChunkPatch::mark_nr(positions))
            .await
    }

    /// Clear the needs-rebuild marks of a rebuilt range, together with its
    /// verify marks.
    ///
    /// Positions in `rebuild_logging` were not written by the rebuild, so
    /// their marks stay.
    #[tracing::instrument(skip(self))]
    pub async fn clear_nr_for_range(&self, start_lba: LbaT,
                                    blocks: BlockCountT,
                                    rebuild_logging: PositionBitmask)
        -> Result<()>
    {
        let clear = self.geometry().all_positions().difference(rebuild_logging);
        self.update_range(start_lba, blocks,
                          ChunkPatch::clear_nr(clear, VERIFY_ALL)).await
    }

    /// First marked run for any of `positions` at or after `start_lba`
    pub async fn next_marked(&self, start_lba: LbaT,
                             positions: PositionBitmask)
        -> Result<Option<MarkedRange>>
    {
        let geometry = self.geometry();
        if start_lba >= geometry.disk_capacity() {
            return Ok(None);
        }
        let start = geometry.chunk_index_for_lba(start_lba);
        self.chunks.get_next_marked_chunk(start,
            geometry.total_chunks() - start, positions).await
    }

    /// Is any chunk of `position` still marked?
    pub async fn is_marked(&self, position: Position) -> Result<bool> {
        self.next_marked(0, PositionBitmask::single(position)).await
            .map(|r| r.is_some())
    }
}

// LCOV_EXCL_STOP
