// vim: tw=80
//! The non-paged bookkeeping blob and the lock that serializes its updates

use std::sync::{Arc, PoisonError, RwLock};

use byteorder::{BigEndian, ByteOrder};
use bytes::{BufMut, Bytes, BytesMut};
use futures_locks::Mutex;
use serde_derive::{Deserialize, Serialize};

use crate::{
    checkpoint::{CheckpointTable, RawCheckpointEntry, MAX_REBUILD_POSITIONS},
    emeh::EmehParams,
    types::*,
    util::checksum_buf,
};
use super::{
    chunk::NONPAGED_CHUNK_BASE,
    service::{MetadataService, Region},
};

/*
 * Non-paged blob format, at offset 0 of the non-paged region:
 *
 * Magic:       16 bytes
 * Checksum:    8 bytes     MetroHash64, big endian.  Covers Length and Body.
 * Length:      8 bytes     Length of Body in bytes, big endian
 * Body:        46 bytes    bincode, packed little endian:
 *   rebuild_logging_bitmask    u16
 *   rebuild_checkpoint_info    2 x { checkpoint: u64, position: u32 }
 *   blocks_rebuilt             2 x u64
 *   emeh_params                u32     mode in bits 0-15, option in 16-31
 * Pad:         0-filled up to NONPAGED_BLOB_SIZE
 *
 * An all-zero blob is a freshly bound raid group.
 */
const MAGIC: &[u8; MAGIC_LEN] = b"RGNR NonPaged\0\0\0";
const MAGIC_LEN: usize = 16;
const CHECKSUM_LEN: usize = 8;
const LENGTH_LEN: usize = 8;
const HEADER_LEN: usize = MAGIC_LEN + CHECKSUM_LEN + LENGTH_LEN;

/// Space reserved for the blob at the start of the non-paged region
pub const NONPAGED_BLOB_SIZE: usize = NONPAGED_CHUNK_BASE as usize;

#[derive(Deserialize, Serialize)]
struct RawNonPaged {
    rebuild_logging_bitmask: u16,
    rebuild_checkpoint_info: [RawCheckpointEntry; MAX_REBUILD_POSITIONS],
    blocks_rebuilt: [u64; MAX_REBUILD_POSITIONS],
    emeh_params: u32,
}

/// Everything the engine keeps in the non-paged blob
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct NonPagedInfo {
    /// Positions currently skipped on write
    pub rebuild_logging: PositionBitmask,
    pub checkpoints: CheckpointTable,
    /// The raid group's own EMEH settings
    pub emeh: EmehParams,
}

impl NonPagedInfo {
    /// Encode into a full-size blob, header included.
    pub fn encode(&self) -> Result<Bytes> {
        let (rebuild_checkpoint_info, blocks_rebuilt) =
            self.checkpoints.to_raw();
        let raw = RawNonPaged {
            rebuild_logging_bitmask: self.rebuild_logging.bits(),
            rebuild_checkpoint_info,
            blocks_rebuilt,
            emeh_params: self.emeh.to_bits(),
        };
        let body = bincode::serialize(&raw)?;
        let mut header = [0u8; CHECKSUM_LEN + LENGTH_LEN];
        BigEndian::write_u64(&mut header[..CHECKSUM_LEN], checksum_buf(&body));
        BigEndian::write_u64(&mut header[CHECKSUM_LEN..], body.len() as u64);
        let mut buf = BytesMut::with_capacity(NONPAGED_BLOB_SIZE);
        buf.put_slice(&MAGIC[..]);
        buf.put_slice(&header[..]);
        buf.put_slice(&body[..]);
        buf.resize(NONPAGED_BLOB_SIZE, 0);
        Ok(buf.freeze())
    }

    /// Decode a blob as read from the non-paged region
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_LEN {
            return Err(Error::EINVAL);
        }
        if buf[..HEADER_LEN].iter().all(|b| *b == 0) {
            return Ok(NonPagedInfo::default());
        }
        if MAGIC[..] != buf[..MAGIC_LEN] {
            tracing::error!("bad non-paged magic");
            return Err(Error::EINVAL);
        }
        let checksum = BigEndian::read_u64(
            &buf[MAGIC_LEN..MAGIC_LEN + CHECKSUM_LEN]);
        let len = BigEndian::read_u64(
            &buf[MAGIC_LEN + CHECKSUM_LEN..HEADER_LEN]) as usize;
        let body = buf.get(HEADER_LEN..HEADER_LEN + len)
            .ok_or(Error::EINTEGRITY)?;
        if checksum != checksum_buf(body) {
            tracing::error!("non-paged checksum mismatch");
            return Err(Error::EINTEGRITY);
        }
        let raw: RawNonPaged = bincode::deserialize(body)?;
        Ok(NonPagedInfo {
            rebuild_logging:
                PositionBitmask::from_bits(raw.rebuild_logging_bitmask),
            checkpoints: CheckpointTable::from_raw(
                &raw.rebuild_checkpoint_info, raw.blocks_rebuilt)?,
            emeh: EmehParams::from_bits(raw.emeh_params),
        })
    }
}

/// Cached copy of the non-paged blob, plus the NP lock.
///
/// Every read-modify-write of the blob happens under the NP lock.  The lock
/// is held only across the metadata write, and is dropped on every exit path.
pub struct NonPagedStore {
    md: Arc<dyn MetadataService>,
    cache: RwLock<NonPagedInfo>,
    np_lock: Mutex<()>,
}

impl NonPagedStore {
    pub fn new(md: Arc<dyn MetadataService>) -> Self {
        NonPagedStore {
            md,
            cache: RwLock::new(NonPagedInfo::default()),
            np_lock: Mutex::new(()),
        }
    }

    /// The most recently loaded or persisted contents
    pub fn get(&self) -> NonPagedInfo {
        self.cache.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Refresh the cache from persistent storage
    #[tracing::instrument(skip(self))]
    pub async fn load(&self) -> Result<NonPagedInfo> {
        let _guard = self.np_lock.lock().await;
        let buf = self.md.read(Region::NonPaged, 0, NONPAGED_BLOB_SIZE).await?;
        let np = NonPagedInfo::decode(&buf[..])?;
        *self.cache.write().unwrap_or_else(PoisonError::into_inner) =
            np.clone();
        Ok(np)
    }

    /// Modify the blob with `f` and persist it in one write.
    ///
    /// If either `f` or the write fails, neither the cache nor storage
    /// changes.  Returns the new contents.
    pub async fn update<F>(&self, f: F) -> Result<NonPagedInfo>
        where F: FnOnce(&mut NonPagedInfo) -> Result<()>
    {
        let _guard = self.np_lock.lock().await;
        let mut np = self.get();
        f(&mut np)?;
        let buf = np.encode()?;
        self.md.write(Region::NonPaged, 0, buf).await?;
        *self.cache.write().unwrap_or_else(PoisonError::into_inner) =
            np.clone();
        Ok(np)
    }

    /// Replace the blob wholesale
    pub async fn store(&self, np: NonPagedInfo) -> Result<NonPagedInfo> {
        self.update(move |old| {
            *old = np;
            Ok(())
        }).await
    }
}

// LCOV_EXCL_STOP
