// vim: tw=80
//! Persisted rebuild-tracking metadata
//!
//! Two tiers are stored through an external [`MetadataService`]: the paged
//! tier holds one record per user-data chunk; the non-paged tier holds the
//! engine's bookkeeping blob plus the records of metadata-region chunks.

mod chunk;
mod nonpaged;
mod service;

pub use self::chunk::{
    ChunkAccessor,
    ChunkInfo,
    ChunkPatch,
    MarkedRange,
    PatchOp,
    CHUNK_INFO_SIZE,
    NONPAGED_CHUNK_BASE,
    VERIFY_ALL,
    VERIFY_ERROR,
    VERIFY_INCOMPLETE_WRITE,
    VERIFY_SYSTEM,
    VERIFY_USER_RO,
    VERIFY_USER_RW,
};
pub use self::nonpaged::{NonPagedInfo, NonPagedStore, NONPAGED_BLOB_SIZE};
pub use self::service::{BoxMdFut, MemMetadata, MetadataService, Region,
                        WriteRecord};
#[cfg(test)] pub use self::service::MockMetadataService;
