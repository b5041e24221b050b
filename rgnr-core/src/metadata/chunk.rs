// vim: tw=80
//! Per-chunk metadata records and the accessor that reads and patches them

use std::sync::Arc;

use byteorder::{ByteOrder, LittleEndian};
use bytes::{Bytes, BytesMut};

use crate::{
    geometry::Geometry,
    types::*,
};
use super::service::{MetadataService, Region};

/*
 * Chunk record format, little endian:
 *
 * verify_bits:         1 byte
 * reserved:            1 byte
 * needs_rebuild_bits:  2 bytes    one bit per position
 *
 * Paged region:        records of user-data chunks, starting at offset 0.
 * Non-paged region:    bookkeeping blob, then records of metadata-region
 *                      chunks starting at NONPAGED_CHUNK_BASE.  A raid group
 *                      without paged metadata keeps every record here.
 */
pub const CHUNK_INFO_SIZE: usize = 4;

/// Byte offset of the first chunk record in the non-paged region
pub const NONPAGED_CHUNK_BASE: u64 = 4096;

pub const VERIFY_USER_RW: u8 = 0x01;
pub const VERIFY_ERROR: u8 = 0x02;
pub const VERIFY_USER_RO: u8 = 0x04;
pub const VERIFY_INCOMPLETE_WRITE: u8 = 0x08;
pub const VERIFY_SYSTEM: u8 = 0x10;
pub const VERIFY_ALL: u8 = VERIFY_USER_RW | VERIFY_ERROR | VERIFY_USER_RO |
    VERIFY_INCOMPLETE_WRITE | VERIFY_SYSTEM;

/// Maximum number of records read by one metadata request while scanning
const SCAN_BATCH: ChunkT = 256;

/// Metadata of a single chunk
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ChunkInfo {
    pub verify_bits: u8,
    /// Positions whose copy of this chunk is stale
    pub needs_rebuild: PositionBitmask,
}

impl ChunkInfo {
    fn decode(buf: &[u8]) -> Self {
        ChunkInfo {
            verify_bits: buf[0],
            needs_rebuild: PositionBitmask::from_bits(
                LittleEndian::read_u16(&buf[2..4]))
        }
    }

    fn encode(&self, buf: &mut [u8]) {
        buf[0] = self.verify_bits;
        buf[1] = 0;
        LittleEndian::write_u16(&mut buf[2..4], self.needs_rebuild.bits());
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PatchOp {
    Set,
    Clear,
}

/// A partial chunk record, applied to every chunk of a range
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ChunkPatch {
    pub op: PatchOp,
    pub needs_rebuild: PositionBitmask,
    pub verify_bits: u8,
}

impl ChunkPatch {
    /// Mark `positions` as needing rebuild
    pub fn mark_nr(positions: PositionBitmask) -> Self {
        ChunkPatch {
            op: PatchOp::Set,
            needs_rebuild: positions,
            verify_bits: 0
        }
    }

    /// Clear needs-rebuild for `positions` along with `verify_bits`
    pub fn clear_nr(positions: PositionBitmask, verify_bits: u8) -> Self {
        ChunkPatch {
            op: PatchOp::Clear,
            needs_rebuild: positions,
            verify_bits
        }
    }

    pub fn apply(&self, info: &mut ChunkInfo) {
        match self.op {
            PatchOp::Set => {
                info.needs_rebuild |= self.needs_rebuild;
                info.verify_bits |= self.verify_bits;
            }
            PatchOp::Clear => {
                info.needs_rebuild =
                    info.needs_rebuild.difference(self.needs_rebuild);
                info.verify_bits &= !self.verify_bits;
            }
        }
    }
}

/// A run of consecutive chunks that need rebuilding
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct MarkedRange {
    pub start_chunk: ChunkT,
    pub chunk_count: ChunkT,
    /// Union of the positions marked anywhere in the run
    pub positions: PositionBitmask,
}

/// Maps LBAs to chunks and reads or patches their records.
pub struct ChunkAccessor {
    geometry: Geometry,
    md: Arc<dyn MetadataService>,
}

impl ChunkAccessor {
    pub fn new(geometry: Geometry, md: Arc<dyn MetadataService>) -> Self {
        ChunkAccessor { geometry, md }
    }

    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    pub fn chunk_index_for_lba(&self, lba: LbaT) -> ChunkT {
        self.geometry.chunk_index_for_lba(lba)
    }

    /// First chunk whose record lives in the non-paged region
    fn first_nonpaged_chunk(&self) -> ChunkT {
        if self.geometry.has_paged_metadata() {
            self.geometry.user_chunks()
        } else {
            0
        }
    }

    /// Locate the records of `[start, start + count)` in one region.
    fn location(&self, start: ChunkT, count: ChunkT, use_nonpaged: bool)
        -> Result<(Region, u64)>
    {
        let end = start.checked_add(count).ok_or(Error::EINVAL)?;
        let first_np = self.first_nonpaged_chunk();
        if end > self.geometry.total_chunks() {
            return Err(Error::EINVAL);
        }
        if use_nonpaged {
            if start < first_np {
                return Err(Error::EINVAL);
            }
            let offset = NONPAGED_CHUNK_BASE +
                (start - first_np) * CHUNK_INFO_SIZE as u64;
            Ok((Region::NonPaged, offset))
        } else {
            if end > first_np {
                return Err(Error::EINVAL);
            }
            Ok((Region::Paged, start * CHUNK_INFO_SIZE as u64))
        }
    }

    /// Read the records of `[start_chunk, start_chunk + count)`, which must
    /// lie entirely within one region.
    pub async fn read_chunk_range(&self, start_chunk: ChunkT, count: ChunkT,
                                  use_nonpaged: bool)
        -> Result<Vec<ChunkInfo>>
    {
        let (region, offset) = self.location(start_chunk, count,
                                             use_nonpaged)?;
        let len = count as usize * CHUNK_INFO_SIZE;
        let buf = self.md.read(region, offset, len).await?;
        if buf.len() < len {
            return Err(Error::EIO);
        }
        Ok(buf.chunks_exact(CHUNK_INFO_SIZE)
            .map(ChunkInfo::decode)
            .collect())
    }

    /// Apply `patch` to every chunk of `[start_chunk, start_chunk + count)`
    /// with a single metadata write.
    ///
    /// The range must lie entirely within one region; callers split ranges
    /// that cross the exported capacity.  Errors from the metadata service
    /// are returned unmodified.
    #[tracing::instrument(skip(self))]
    pub async fn write_chunk_range(&self, start_chunk: ChunkT, count: ChunkT,
                                   patch: ChunkPatch, use_nonpaged: bool)
        -> Result<()>
    {
        if count == 0 {
            return Ok(());
        }
        let (region, offset) = self.location(start_chunk, count,
                                             use_nonpaged)?;
        let len = count as usize * CHUNK_INFO_SIZE;
        let old = self.md.read(region, offset, len).await?;
        if old.len() < len {
            return Err(Error::EIO);
        }
        let mut new = BytesMut::zeroed(len);
        for (src, dst) in old.chunks_exact(CHUNK_INFO_SIZE)
            .zip(new.chunks_exact_mut(CHUNK_INFO_SIZE))
        {
            let mut info = ChunkInfo::decode(src);
            patch.apply(&mut info);
            info.encode(dst);
        }
        let buf: Bytes = new.freeze();
        self.md.write(region, offset, buf).await
    }

    /// Find the first run of chunks in `[start_chunk, start_chunk +
    /// chunk_count)` that needs rebuilding for any of `positions`.
    ///
    /// The returned run extends as far as consecutive chunks stay marked, and
    /// its `positions` is the union of `positions`' bits found along it.
    pub async fn get_next_marked_chunk(&self, start_chunk: ChunkT,
                                       chunk_count: ChunkT,
                                       positions: PositionBitmask)
        -> Result<Option<MarkedRange>>
    {
        let end = start_chunk.saturating_add(chunk_count)
            .min(self.geometry.total_chunks());
        let first_np = self.first_nonpaged_chunk();
        let mut found: Option<MarkedRange> = None;
        let mut chunk = start_chunk;
        while chunk < end {
            let nonpaged = chunk >= first_np;
            let region_end = if nonpaged { end } else { end.min(first_np) };
            let batch_end = region_end.min(chunk + SCAN_BATCH);
            let infos = self.read_chunk_range(chunk, batch_end - chunk,
                                              nonpaged).await?;
            for (i, info) in infos.iter().enumerate() {
                let marked = info.needs_rebuild & positions;
                match found.as_mut() {
                    None if marked.is_empty() => (),
                    None => {
                        found = Some(MarkedRange {
                            start_chunk: chunk + i as ChunkT,
                            chunk_count: 1,
                            positions: marked
                        });
                    }
                    Some(run) if !marked.is_empty() => {
                        run.chunk_count += 1;
                        run.positions |= marked;
                    }
                    Some(_) => return Ok(found)
                }
            }
            chunk = batch_end;
        }
        Ok(found)
    }
}

// LCOV_EXCL_STOP
