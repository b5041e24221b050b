// vim: tw=80
//! Static layout of a raid group, as far as rebuild tracking is concerned

use std::ops::Range;

use serde_derive::{Deserialize, Serialize};

use crate::types::*;

/// Redundancy scheme of a raid group
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum RaidType {
    Raid0,
    Raid1,
    Raid3,
    Raid5,
    Raid6,
    /// Striped mirrors.  Has no paged metadata of its own.
    Raid10,
}

impl RaidType {
    /// Does this scheme protect data with parity, rather than by mirroring?
    pub fn is_parity(self) -> bool {
        matches!(self, RaidType::Raid3 | RaidType::Raid5 | RaidType::Raid6)
    }
}

/// What kind of object embeds the engine
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum ObjectClass {
    RaidGroup,
    /// A sparing drive: a two-way mirror between the original and the spare
    VirtualDrive,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Geometry {
    width: u32,
    raid_type: RaidType,
    class: ObjectClass,
    /// Blocks per chunk
    chunk_size: BlockCountT,
    /// End of the user-data region, per member
    exported_capacity: LbaT,
    /// End of the member, including the metadata region
    disk_capacity: LbaT,
}

impl Geometry {
    /// Build a geometry, validating its arguments.
    ///
    /// Both capacities must be multiples of `chunk_size`.
    pub fn new(raid_type: RaidType, width: u32, chunk_size: BlockCountT,
               exported_capacity: LbaT, disk_capacity: LbaT) -> Result<Self>
    {
        let min_width = match raid_type {
            RaidType::Raid0 => 1,
            RaidType::Raid1 | RaidType::Raid10 => 2,
            RaidType::Raid3 | RaidType::Raid5 => 3,
            RaidType::Raid6 => 4,
        };
        if width < min_width || width > MAX_WIDTH || chunk_size == 0 ||
            exported_capacity > disk_capacity ||
            exported_capacity % chunk_size != 0 ||
            disk_capacity % chunk_size != 0
        {
            tracing::error!(?raid_type, width, chunk_size, exported_capacity,
                            disk_capacity, "invalid raid group geometry");
            return Err(Error::EINVAL);
        }
        Ok(Geometry {
            width,
            raid_type,
            class: ObjectClass::RaidGroup,
            chunk_size,
            exported_capacity,
            disk_capacity
        })
    }

    /// Geometry of a virtual drive: a two-way mirror
    pub fn virtual_drive(chunk_size: BlockCountT, exported_capacity: LbaT,
                         disk_capacity: LbaT) -> Result<Self>
    {
        let mut g = Geometry::new(RaidType::Raid1, 2, chunk_size,
                                  exported_capacity, disk_capacity)?;
        g.class = ObjectClass::VirtualDrive;
        Ok(g)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn raid_type(&self) -> RaidType {
        self.raid_type
    }

    pub fn class(&self) -> ObjectClass {
        self.class
    }

    pub fn chunk_size(&self) -> BlockCountT {
        self.chunk_size
    }

    pub fn exported_capacity(&self) -> LbaT {
        self.exported_capacity
    }

    pub fn disk_capacity(&self) -> LbaT {
        self.disk_capacity
    }

    /// How many positions may fail without losing data
    pub fn redundancy(&self) -> u32 {
        match self.raid_type {
            RaidType::Raid0 => 0,
            RaidType::Raid1 => self.width - 1,
            RaidType::Raid3 | RaidType::Raid5 | RaidType::Raid10 => 1,
            RaidType::Raid6 => 2,
        }
    }

    /// Does chunk metadata for the user-data region live in paged metadata?
    pub fn has_paged_metadata(&self) -> bool {
        self.raid_type != RaidType::Raid10
    }

    pub fn all_positions(&self) -> PositionBitmask {
        PositionBitmask::all(self.width)
    }

    pub fn chunk_index_for_lba(&self, lba: LbaT) -> ChunkT {
        debug_assert!(lba < self.disk_capacity,
            "lba {lba:#x} beyond disk capacity {:#x}", self.disk_capacity);
        lba / self.chunk_size
    }

    /// First LBA of a chunk
    pub fn chunk_lba(&self, chunk: ChunkT) -> LbaT {
        chunk * self.chunk_size
    }

    /// Chunks touched by the block range `[lba, lba + blocks)`.
    pub fn chunk_range(&self, lba: LbaT, blocks: BlockCountT) -> Range<ChunkT>
    {
        if blocks == 0 {
            let c = lba / self.chunk_size;
            return c..c;
        }
        let start = self.chunk_index_for_lba(lba);
        let end = self.chunk_index_for_lba(lba + blocks - 1) + 1;
        start..end
    }

    /// Chunks covering the user-data region
    pub fn user_chunks(&self) -> ChunkT {
        self.exported_capacity / self.chunk_size
    }

    /// Chunks covering the whole member
    pub fn total_chunks(&self) -> ChunkT {
        self.disk_capacity / self.chunk_size
    }

    /// Is this chunk's record kept in non-paged metadata?
    pub fn is_nonpaged_chunk(&self, chunk: ChunkT) -> bool {
        !self.has_paged_metadata() || chunk >= self.user_chunks()
    }
}

// LCOV_EXCL_STOP
