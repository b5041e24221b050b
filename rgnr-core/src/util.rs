// vim: tw=80
//! Common utility functions used throughout the engine

use std::{
    hash::{Hash, Hasher},
    ops::Range,
};

use metrohash::MetroHash64;

/// Checksum a length-prefixed buffer the way all persisted blobs are summed.
///
/// The length is hashed first, big-endian.
pub fn checksum_buf(buf: &[u8]) -> u64 {
    let mut hasher = MetroHash64::new();
    (buf.len() as u64).to_be().hash(&mut hasher);
    hasher.write(buf);
    hasher.finish()
}

/// Intersect two half-open ranges.  Returns an empty range at `a.start` if
/// they do not overlap.
pub fn intersect<T: Ord + Copy>(a: Range<T>, b: Range<T>) -> Range<T> {
    let start = a.start.max(b.start);
    let end = a.end.min(b.end);
    if start < end {
        start..end
    } else {
        a.start..a.start
    }
}

// LCOV_EXCL_STOP
