// vim: tw=80
//! Common type definitions used throughout the rebuild engine

use enum_primitive_derive::Primitive;
use itertools::Itertools;
use num_traits::{FromPrimitive, ToPrimitive};
use serde_derive::{Deserialize, Serialize};
use thiserror::Error;
use std::{
    fmt::{self, Display, Formatter},
    future::Future,
    io,
    ops::{BitAnd, BitOr, BitOrAssign},
    pin::Pin,
};

/// Indexes an LBA within a single member's address space.
pub type LbaT = u64;

/// A count of blocks.
pub type BlockCountT = u64;

/// Indexes a chunk within a single member's address space.
pub type ChunkT = u64;

/// Identifies one member of a raid group, in the range `[0, width)`.
pub type Position = u32;

/// Checkpoint value meaning "fully rebuilt".
///
/// It is greater than any per-disk capacity.
pub const END_MARKER: LbaT = LbaT::MAX;

/// Position value stored in unused checkpoint slots.
pub const INVALID_POSITION: Position = Position::MAX;

/// Widest raid group that a [`PositionBitmask`] can describe.
pub const MAX_WIDTH: u32 = u16::BITS;

/// The engine's error type.  Basically just an errno
#[derive(Clone, Copy, Debug, Deserialize, Error, Eq, PartialEq, Primitive, Serialize)]
pub enum Error {
    // Standard errnos
    #[error("Operation not permitted")]
    EPERM           = libc::EPERM as isize,
    #[error("No such file or directory")]
    ENOENT          = libc::ENOENT as isize,
    #[error("Input/output error")]
    EIO             = libc::EIO as isize,
    #[error("Device not configured")]
    ENXIO           = libc::ENXIO as isize,
    #[error("Device busy")]
    EBUSY           = libc::EBUSY as isize,
    #[error("Operation not supported by device")]
    ENODEV          = libc::ENODEV as isize,
    #[error("Invalid argument")]
    EINVAL          = libc::EINVAL as isize,
    #[error("Resource temporarily unavailable")]
    EAGAIN          = libc::EAGAIN as isize,
    #[error("Operation now in progress")]
    EINPROGRESS     = libc::EINPROGRESS as isize,
    #[error("Operation timed out")]
    ETIMEDOUT       = libc::ETIMEDOUT as isize,
    #[error("Operation canceled")]
    ECANCELED       = libc::ECANCELED as isize,
    #[error("Operation not supported")]
    EOPNOTSUPP      = libc::EOPNOTSUPP as isize,

    // Engine-specific errors
    #[error("Unknown error")]
    EUNKNOWN        = 256,
    /// More positions are dead than the checkpoint table can track
    #[error("Too many dead positions")]
    ETOOMANYDEAD    = 257,
    /// Persisted metadata failed its checksum
    #[error("Integrity check failed")]
    EINTEGRITY      = 258,
}

impl Error {
    /// Could the same operation succeed if retried by a later monitor cycle?
    pub fn is_retryable(self) -> bool {
        matches!(self, Error::EAGAIN | Error::EBUSY | Error::EIO |
                 Error::ENXIO | Error::ETIMEDOUT | Error::EINPROGRESS)
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        e.raw_os_error()
            .and_then(Error::from_i32)
            .unwrap_or(Error::EUNKNOWN)
    }
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        match *e {
            bincode::ErrorKind::Io(e) => e.into(),
            _ => Error::EINTEGRITY
        }
    }
}

impl From<Error> for i32 {
    fn from(e: Error) -> Self {
        e.to_i32().unwrap_or(libc::EIO)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Future returned by the engine's external collaborators
pub type BoxFut<T> = Pin<Box<dyn Future<Output=Result<T>> + Send>>;

/// Identifies a raid group in event-log records
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq,
         Serialize)]
pub struct RaidGroupId {
    /// User-visible raid group number
    pub number: u32,
    pub object_id: u32,
}

/// A set of raid group positions.
///
/// Persisted as a `u16`, one bit per position.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq,
         Serialize)]
#[serde(transparent)]
pub struct PositionBitmask(u16);

impl PositionBitmask {
    pub const fn empty() -> Self {
        PositionBitmask(0)
    }

    pub const fn from_bits(bits: u16) -> Self {
        PositionBitmask(bits)
    }

    pub const fn bits(self) -> u16 {
        self.0
    }

    /// Every position of a `width`-wide raid group
    pub fn all(width: u32) -> Self {
        assert!(width <= MAX_WIDTH, "raid group too wide");
        if width == MAX_WIDTH {
            PositionBitmask(u16::MAX)
        } else {
            PositionBitmask((1u16 << width) - 1)
        }
    }

    pub fn single(position: Position) -> Self {
        let mut mask = Self::empty();
        mask.insert(position);
        mask
    }

    pub fn contains(self, position: Position) -> bool {
        position < MAX_WIDTH && self.0 & (1 << position) != 0
    }

    pub fn insert(&mut self, position: Position) {
        assert!(position < MAX_WIDTH, "position {position} out of range");
        self.0 |= 1 << position;
    }

    pub fn remove(&mut self, position: Position) {
        if position < MAX_WIDTH {
            self.0 &= !(1 << position);
        }
    }

    pub fn union(self, other: Self) -> Self {
        PositionBitmask(self.0 | other.0)
    }

    pub fn intersection(self, other: Self) -> Self {
        PositionBitmask(self.0 & other.0)
    }

    /// Positions in `self` but not in `other`
    pub fn difference(self, other: Self) -> Self {
        PositionBitmask(self.0 & !other.0)
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn count(self) -> u32 {
        self.0.count_ones()
    }

    /// Lowest position in the set
    pub fn first(self) -> Option<Position> {
        if self.0 == 0 {
            None
        } else {
            Some(self.0.trailing_zeros())
        }
    }

    /// Iterate over positions in ascending order
    pub fn iter(self) -> impl Iterator<Item=Position> {
        (0..MAX_WIDTH).filter(move |p| self.contains(*p))
    }
}

impl BitAnd for PositionBitmask {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        self.intersection(rhs)
    }
}

impl BitOr for PositionBitmask {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

impl BitOrAssign for PositionBitmask {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl Display for PositionBitmask {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "{:#06x} [{}]", self.0, self.iter().format(","))
    }
}

impl FromIterator<Position> for PositionBitmask {
    fn from_iter<I: IntoIterator<Item=Position>>(iter: I) -> Self {
        let mut mask = Self::empty();
        for p in iter {
            mask.insert(p);
        }
        mask
    }
}

// LCOV_EXCL_STOP
