// vim: tw=80

use std::{
    collections::VecDeque,
    sync::{Mutex, MutexGuard, PoisonError},
};

use bytes::Bytes;
use futures::{FutureExt, future};
#[cfg(test)] use mockall::automock;

use crate::types::*;

pub type BoxMdFut<T> = BoxFut<T>;

/// Which metadata tier an access targets
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Region {
    /// One record per user-data chunk
    Paged,
    /// Engine bookkeeping plus one record per metadata-region chunk
    NonPaged,
}

/// Persistent storage for rebuild metadata.
///
/// Each `write` call is atomic: either all of `buf` lands or none of it does.
/// Reads of never-written ranges return zeros.
#[cfg_attr(test, automock)]
pub trait MetadataService: Send + Sync {
    /// Read `len` bytes starting at byte `offset` of `region`.
    fn read(&self, region: Region, offset: u64, len: usize) -> BoxMdFut<Bytes>;

    /// Write `buf` starting at byte `offset` of `region`.
    fn write(&self, region: Region, offset: u64, buf: Bytes) -> BoxMdFut<()>;
}

/// A write that an in-memory service accepted
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct WriteRecord {
    pub region: Region,
    pub offset: u64,
    pub len: usize,
}

#[derive(Debug, Default)]
struct Inner {
    paged: Vec<u8>,
    nonpaged: Vec<u8>,
    /// Errors to return from upcoming writes, per region, in order
    injected: VecDeque<(Region, Error)>,
    log: Vec<WriteRecord>,
}

impl Inner {
    fn region(&mut self, region: Region) -> &mut Vec<u8> {
        match region {
            Region::Paged => &mut self.paged,
            Region::NonPaged => &mut self.nonpaged,
        }
    }
}

/// A `MetadataService` kept entirely in memory.
///
/// Useful for embedders that mirror metadata elsewhere, and for tests.  It can
/// be told to fail upcoming writes.
#[derive(Debug, Default)]
pub struct MemMetadata {
    inner: Mutex<Inner>
}

impl MemMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fail the next write to `region` with `error`, leaving it unapplied.
    pub fn fail_next_write(&self, region: Region, error: Error) {
        self.lock().injected.push_back((region, error));
    }

    /// Every write accepted so far, oldest first
    pub fn writes(&self) -> Vec<WriteRecord> {
        self.lock().log.clone()
    }

    pub fn clear_writes(&self) {
        self.lock().log.clear();
    }

    fn read_sync(&self, region: Region, offset: u64, len: usize) -> Bytes {
        let mut inner = self.lock();
        let data = inner.region(region);
        let start = (offset as usize).min(data.len());
        let end = (offset as usize + len).min(data.len());
        let mut v = data[start..end].to_vec();
        v.resize(len, 0);
        Bytes::from(v)
    }

    fn write_sync(&self, region: Region, offset: u64, buf: &[u8])
        -> Result<()>
    {
        let mut inner = self.lock();
        let pos = inner.injected.iter().position(|(r, _)| *r == region);
        if let Some(i) = pos {
            if let Some((_, e)) = inner.injected.remove(i) {
                return Err(e);
            }
        }
        let data = inner.region(region);
        let end = offset as usize + buf.len();
        if data.len() < end {
            data.resize(end, 0);
        }
        data[offset as usize..end].copy_from_slice(buf);
        inner.log.push(WriteRecord{region, offset, len: buf.len()});
        Ok(())
    }
}

impl MetadataService for MemMetadata {
    fn read(&self, region: Region, offset: u64, len: usize) -> BoxMdFut<Bytes>
    {
        future::ok(self.read_sync(region, offset, len)).boxed()
    }

    fn write(&self, region: Region, offset: u64, buf: Bytes) -> BoxMdFut<()> {
        future::ready(self.write_sync(region, offset, &buf[..])).boxed()
    }
}

// LCOV_EXCL_STOP
