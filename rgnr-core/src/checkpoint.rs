// vim: tw=80
//! The Rebuild-Checkpoint Table
//!
//! A fixed number of slots, each owned by at most one degraded position and
//! recording how far that position's reconstruction has progressed.  Slots are
//! found by owner, or allocated first-free, independent of position order.

use serde_derive::{Deserialize, Serialize};

use crate::{
    metadata::NonPagedInfo,
    types::*,
};

/// Number of positions that may be degraded at once
pub const MAX_REBUILD_POSITIONS: usize = 2;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct CheckpointEntry {
    pub position: Position,
    /// Everything below this LBA has been rebuilt
    pub checkpoint: LbaT,
}

/// Persisted form of one slot.  Field order is part of the on-disk format.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub(crate) struct RawCheckpointEntry {
    pub checkpoint: u64,
    pub position: u32,
}

impl RawCheckpointEntry {
    const UNUSED: Self = RawCheckpointEntry {
        checkpoint: END_MARKER,
        position: INVALID_POSITION
    };
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CheckpointTable {
    slots: [Option<CheckpointEntry>; MAX_REBUILD_POSITIONS],
    /// Progress counters, parallel to `slots`
    blocks_rebuilt: [u64; MAX_REBUILD_POSITIONS],
}

impl CheckpointTable {
    /// Slot currently owned by `position`, if any
    pub fn find_entry_for_position(&self, position: Position)
        -> Option<usize>
    {
        self.slots.iter()
            .position(|s| matches!(s, Some(e) if e.position == position))
    }

    /// First unowned slot at or after `start_index`
    pub fn find_next_free_entry(&self, start_index: usize) -> Option<usize> {
        self.slots.iter()
            .enumerate()
            .skip(start_index)
            .find(|(_, s)| s.is_none())
            .map(|(i, _)| i)
    }

    pub fn entry(&self, index: usize) -> Option<&CheckpointEntry> {
        self.slots.get(index).and_then(Option::as_ref)
    }

    pub fn iter(&self) -> impl Iterator<Item=&CheckpointEntry> {
        self.slots.iter().flatten()
    }

    /// Positions owning a slot
    pub fn positions(&self) -> PositionBitmask {
        self.iter().map(|e| e.position).collect()
    }

    pub fn checkpoint(&self, position: Position) -> Option<LbaT> {
        self.find_entry_for_position(position)
            .and_then(|i| self.slots[i])
            .map(|e| e.checkpoint)
    }

    pub fn blocks_rebuilt(&self, position: Position) -> Option<u64> {
        self.find_entry_for_position(position)
            .map(|i| self.blocks_rebuilt[i])
    }

    /// Move `position`'s checkpoint, which must already exist.
    pub fn set_checkpoint(&mut self, position: Position, checkpoint: LbaT)
        -> Result<()>
    {
        let i = self.find_entry_for_position(position)
            .ok_or(Error::ENOENT)?;
        if let Some(e) = self.slots[i].as_mut() {
            e.checkpoint = checkpoint;
        }
        Ok(())
    }

    pub fn add_blocks_rebuilt(&mut self, position: Position, blocks: u64) {
        if let Some(i) = self.find_entry_for_position(position) {
            self.blocks_rebuilt[i] = self.blocks_rebuilt[i]
                .saturating_add(blocks);
        }
    }

    /// Release `position`'s slot.  Returns whether it owned one.
    pub fn free(&mut self, position: Position) -> bool {
        match self.find_entry_for_position(position) {
            Some(i) => {
                self.slots[i] = None;
                self.blocks_rebuilt[i] = 0;
                true
            }
            None => false
        }
    }

    /// Find or allocate a slot for every position in `positions`, and set its
    /// checkpoint.  The table is unchanged on failure.
    fn assign(&mut self, checkpoint: LbaT, positions: PositionBitmask)
        -> Result<()>
    {
        let mut table = self.clone();
        let mut start_index = 0;
        for position in positions.iter() {
            let i = match table.find_entry_for_position(position) {
                Some(i) => i,
                None => {
                    let i = table.find_next_free_entry(start_index)
                        .ok_or_else(|| {
                            tracing::error!(%positions, position,
                                "no free checkpoint slot");
                            Error::ETOOMANYDEAD
                        })?;
                    start_index = i + 1;
                    i
                }
            };
            table.slots[i] = Some(CheckpointEntry { position, checkpoint });
            table.blocks_rebuilt[i] = 0;
        }
        *self = table;
        Ok(())
    }

    pub(crate) fn to_raw(&self)
        -> ([RawCheckpointEntry; MAX_REBUILD_POSITIONS],
            [u64; MAX_REBUILD_POSITIONS])
    {
        let mut raw = [RawCheckpointEntry::UNUSED; MAX_REBUILD_POSITIONS];
        for (r, s) in raw.iter_mut().zip(self.slots.iter()) {
            if let Some(e) = s {
                *r = RawCheckpointEntry {
                    checkpoint: e.checkpoint,
                    position: e.position
                };
            }
        }
        (raw, self.blocks_rebuilt)
    }

    pub(crate) fn from_raw(raw: &[RawCheckpointEntry; MAX_REBUILD_POSITIONS],
                           blocks_rebuilt: [u64; MAX_REBUILD_POSITIONS])
        -> Result<Self>
    {
        let mut table = CheckpointTable {
            blocks_rebuilt,
            ..Default::default()
        };
        for (s, r) in table.slots.iter_mut().zip(raw.iter()) {
            if r.position == INVALID_POSITION {
                continue;
            }
            if r.position >= MAX_WIDTH {
                tracing::error!(position = r.position,
                                "corrupt checkpoint entry");
                return Err(Error::EINTEGRITY);
            }
            *s = Some(CheckpointEntry {
                position: r.position,
                checkpoint: r.checkpoint
            });
        }
        Ok(table)
    }
}

/// Build the non-paged structure that results from (re)starting every
/// position in `positions` at `checkpoint`.
///
/// Existing slots are reused; new positions take free slots.  Each affected
/// slot's progress counter is reset.  Fails with `ETOOMANYDEAD` if a position
/// cannot get a slot.
pub fn create_checkpoint_data(np: &NonPagedInfo, checkpoint: LbaT,
                              positions: PositionBitmask)
    -> Result<NonPagedInfo>
{
    let mut new = np.clone();
    new.checkpoints.assign(checkpoint, positions)?;
    Ok(new)
}

// LCOV_EXCL_STOP
