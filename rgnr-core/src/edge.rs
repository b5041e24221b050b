// vim: tw=80
//! The engine's view of the block-transport edges to its members, and of the
//! single edge to the object above it.
//!
//! The engine never owns a transport.  It is told about state changes and
//! reads the resulting state.

#[cfg(test)] use mockall::automock;
use serde_derive::{Deserialize, Serialize};

use crate::types::*;

/// State of one block-transport path
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub enum PathState {
    #[default]
    Enabled,
    /// Temporarily unavailable, typically while the drive is being reset
    Disabled,
    Broken,
    Gone,
    Invalid,
    /// Drive is spun down.  Not a failure.
    Slumber,
}

/// Attribute bits carried by a path alongside its state
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(transparent)]
pub struct PathAttributes(u32);

impl PathAttributes {
    /// The drive is timing out I/O
    pub const TIMEOUT_ERRORS: Self = PathAttributes(0x0001);
    /// The object above is degraded and needs this object rebuilt
    pub const DEGRADED_NEEDS_REBUILD: Self = PathAttributes(0x0002);
    pub const KEYS_REQUIRED: Self = PathAttributes(0x0004);
    pub const DOWNLOAD_REQUESTED: Self = PathAttributes(0x0008);
    pub const DOWNLOAD_GRANTED: Self = PathAttributes(0x0010);

    pub const fn empty() -> Self {
        PathAttributes(0)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }

    pub const fn with(self, other: Self) -> Self {
        PathAttributes(self.0 | other.0)
    }
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct Edge {
    pub state: PathState,
    pub attributes: PathAttributes,
}

impl Edge {
    pub fn new(state: PathState, attributes: PathAttributes) -> Self {
        Edge { state, attributes }
    }

    /// Should writes to this position be skipped?
    pub fn is_failed(&self) -> bool {
        matches!(self.state, PathState::Disabled | PathState::Broken |
                 PathState::Gone | PathState::Invalid) ||
            self.attributes.contains(PathAttributes::TIMEOUT_ERRORS)
    }

    /// Can this position accept rebuild I/O and have rebuild logging cleared?
    pub fn is_usable(&self) -> bool {
        self.state == PathState::Enabled &&
            !self.attributes.contains(PathAttributes::TIMEOUT_ERRORS)
    }
}

/// Downstream edges, indexed by position
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Edges(Vec<Edge>);

impl Edges {
    /// All edges start out enabled
    pub fn new(width: u32) -> Self {
        Edges(vec![Edge::default(); width as usize])
    }

    pub fn width(&self) -> u32 {
        self.0.len() as u32
    }

    pub fn get(&self, position: Position) -> Option<&Edge> {
        self.0.get(position as usize)
    }

    /// Record a state change.  Returns the previous edge.
    pub fn set(&mut self, position: Position, edge: Edge) -> Result<Edge> {
        let slot = self.0.get_mut(position as usize).ok_or(Error::EINVAL)?;
        Ok(std::mem::replace(slot, edge))
    }

    fn positions_where<F>(&self, f: F) -> PositionBitmask
        where F: Fn(&Edge) -> bool
    {
        self.0.iter()
            .enumerate()
            .filter(|(_, e)| f(e))
            .map(|(i, _)| i as Position)
            .collect()
    }

    pub fn failed_positions(&self) -> PositionBitmask {
        self.positions_where(Edge::is_failed)
    }

    pub fn usable_positions(&self) -> PositionBitmask {
        self.positions_where(Edge::is_usable)
    }

    /// Number of edges that are down, as opposed to merely timing out
    pub fn down_count(&self) -> u32 {
        self.positions_where(|e| matches!(e.state,
            PathState::Disabled | PathState::Broken | PathState::Invalid)
        ).count()
    }
}

/// Sparing mode of a virtual drive
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum VirtualDriveMode {
    PassThruFirstEdge,
    PassThruSecondEdge,
    MirrorFirstEdge,
    MirrorSecondEdge,
    Unknown,
}

impl VirtualDriveMode {
    /// Position a pass-through virtual drive is serving, if any
    pub fn pass_thru_position(self) -> Option<Position> {
        match self {
            VirtualDriveMode::PassThruFirstEdge => Some(0),
            VirtualDriveMode::PassThruSecondEdge => Some(1),
            _ => None
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct VirtualDriveConfig {
    pub mode: VirtualDriveMode,
    /// A sparing job is currently changing the configuration
    pub job_in_progress: bool,
}

/// The edge to the object above a virtual drive
///
/// Both methods are synchronous: the object above is in memory.
#[cfg_attr(test, automock)]
pub trait UpstreamEdge: Send + Sync {
    fn path_attributes(&self) -> PathAttributes;

    fn get_configuration(&self) -> Result<VirtualDriveConfig>;
}

// LCOV_EXCL_STOP
