// vim: tw=80
//! Extended Media Error Handling
//!
//! While a raid group is degraded, or is proactively copying a suspect drive,
//! its surviving drives are the only copy of some data.  EMEH relaxes their
//! drive-level error thresholds (DIEH) during that window so that a few media
//! errors don't fail a drive that redundancy depends on.  Every change is
//! agreed with the peer SP through the cluster handshake.

use std::sync::Arc;

use bitfield::bitfield;
use futures::future;
#[cfg(test)] use mockall::automock;
use num_enum::{FromPrimitive, IntoPrimitive};
use serde_derive::{Deserialize, Serialize};

use crate::{
    cluster::{ClusterFlags, ClusterOp, HandshakeState, PeerLink, PeerMessage,
              SpRole},
    condition::TickStatus,
    config::RaidGroupClassConfig,
    event_log::{Event, EventId, EventLog},
    geometry::{Geometry, ObjectClass, RaidType},
    types::*,
};

/// Threshold increase used when none is configured
pub const DEFAULT_INCREASE: u16 = 100;

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, FromPrimitive,
         Hash, IntoPrimitive, PartialEq, Serialize)]
#[repr(u16)]
pub enum EmehMode {
    #[default]
    Invalid = 0,
    EnabledNormal = 1,
    /// Thresholds disabled because the raid group is degraded
    DegradedHa = 2,
    /// Thresholds disabled because a proactive copy is running
    PacoHa = 3,
    ThresholdsIncreased = 4,
    Disabled = 5,
}

impl EmehMode {
    /// May a raid group be configured to this mode?
    pub fn is_configurable(self) -> bool {
        matches!(self, EmehMode::EnabledNormal | EmehMode::Disabled)
    }
}

/// How far to raise thresholds for an increase request
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq,
         Serialize)]
pub enum ThresholdIncrease {
    #[default]
    UseDefault,
    Percent(u16),
}

impl ThresholdIncrease {
    pub fn percent_or(self, default: u16) -> u16 {
        match self {
            ThresholdIncrease::UseDefault => default,
            ThresholdIncrease::Percent(p) => p,
        }
    }
}

impl From<u16> for ThresholdIncrease {
    fn from(raw: u16) -> Self {
        match raw {
            0 => ThresholdIncrease::UseDefault,
            p => ThresholdIncrease::Percent(p)
        }
    }
}

impl From<ThresholdIncrease> for u16 {
    fn from(ti: ThresholdIncrease) -> Self {
        ti.percent_or(0)
    }
}

bitfield! {
    /// Persisted form of [`EmehParams`]
    #[derive(Clone, Copy, Eq, PartialEq)]
    struct EmehParamsBits(u32);
    impl Debug;
    u16;
    mode, set_mode: 15, 0;
    option, set_option: 31, 16;
}

/// A mode together with its threshold-increase option
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq,
         Serialize)]
pub struct EmehParams {
    pub mode: EmehMode,
    pub increase: ThresholdIncrease,
}

impl EmehParams {
    pub fn to_bits(self) -> u32 {
        let mut bits = EmehParamsBits(0);
        bits.set_mode(self.mode.into());
        bits.set_option(self.increase.into());
        bits.0
    }

    pub fn from_bits(raw: u32) -> Self {
        let bits = EmehParamsBits(raw);
        EmehParams {
            mode: EmehMode::from(bits.mode()),
            increase: ThresholdIncrease::from(bits.option()),
        }
    }
}

/// The four coordinated EMEH requests
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub enum EmehRequest {
    RaidGroupDegraded,
    PacoStarted,
    IncreaseThresholds,
    RestoreNormalMode,
}

impl EmehRequest {
    pub fn cluster_op(self) -> ClusterOp {
        match self {
            EmehRequest::RaidGroupDegraded => ClusterOp::EmehDegraded,
            EmehRequest::PacoStarted => ClusterOp::EmehPaco,
            EmehRequest::IncreaseThresholds => ClusterOp::EmehIncrease,
            EmehRequest::RestoreNormalMode => ClusterOp::EmehRestore,
        }
    }

    pub fn from_cluster_op(op: ClusterOp) -> Option<Self> {
        match op {
            ClusterOp::EmehDegraded => Some(EmehRequest::RaidGroupDegraded),
            ClusterOp::EmehPaco => Some(EmehRequest::PacoStarted),
            ClusterOp::EmehIncrease => Some(EmehRequest::IncreaseThresholds),
            ClusterOp::EmehRestore => Some(EmehRequest::RestoreNormalMode),
            ClusterOp::Quiesce => None
        }
    }

    const ALL: [EmehRequest; 4] = [
        EmehRequest::RaidGroupDegraded,
        EmehRequest::PacoStarted,
        EmehRequest::IncreaseThresholds,
        EmehRequest::RestoreNormalMode,
    ];
}

/// Administrative EMEH commands for one raid group
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum EmehControl {
    Enable,
    Disable,
    /// Raise thresholds.  `None` uses the configured percentage.
    IncreaseThresholds(Option<u16>),
    RestoreNormalMode,
}

/// Threshold commands understood by a drive
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum DiehCommand {
    Disable,
    Increase(u16),
    RestoreDefaults,
}

/// A drive's opinion of its own health
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub enum DriveReliability {
    #[default]
    Unknown,
    VeryHigh,
    High,
    Normal,
    Low,
    VeryLow,
}

/// Reliability of a raid group's drives taken together
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub enum EmehReliability {
    #[default]
    Unknown,
    VeryHigh,
    Low,
}

impl EmehReliability {
    /// Fold one more drive's reliability in.  Any low drive makes the whole
    /// group low.
    pub fn fold(self, drive: DriveReliability) -> Self {
        match drive {
            DriveReliability::Unknown => self,
            DriveReliability::VeryHigh | DriveReliability::High |
                DriveReliability::Normal =>
            {
                if self == EmehReliability::Low {
                    EmehReliability::Low
                } else {
                    EmehReliability::VeryHigh
                }
            }
            DriveReliability::Low | DriveReliability::VeryLow =>
                EmehReliability::Low
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct DiehInfo {
    pub reliability: DriveReliability,
    /// Position being proactively copied, as the drive sees it
    pub paco_position: Option<Position>,
}

/// Threshold control of the drives below a raid group
#[cfg_attr(test, automock)]
pub trait DriveUsurper: Send + Sync {
    fn set_dieh_threshold(&self, position: Position, cmd: DiehCommand)
        -> BoxFut<()>;

    fn get_dieh_info(&self, position: Position) -> BoxFut<DiehInfo>;
}

/// Collaborators that an EMEH step needs
pub struct EmehContext<'a> {
    pub rg: RaidGroupId,
    pub geometry: &'a Geometry,
    pub role: SpRole,
    /// Current rebuild-logging positions
    pub rebuild_logging: PositionBitmask,
    pub usurper: &'a dyn DriveUsurper,
    pub events: &'a dyn EventLog,
    pub peer: &'a dyn PeerLink,
    pub flags: &'a mut ClusterFlags,
}

/// Per raid group EMEH state
#[derive(Debug)]
pub struct Emeh {
    class: Arc<RaidGroupClassConfig>,
    capable: bool,
    /// Mode the raid group returns to when no request is in effect
    enabled_mode: EmehMode,
    current_mode: EmehMode,
    request: Option<EmehRequest>,
    /// Set once the in-flight request has been carried out locally
    executed: bool,
    paco_position: Option<Position>,
    reliability: EmehReliability,
    /// Persisted per-group increase
    increase: ThresholdIncrease,
    /// Increase given with the in-flight request, if any
    requested_increase: Option<u16>,
}

impl Emeh {
    /// Is EMEH supported at all for this geometry?
    pub fn is_capable(geometry: &Geometry) -> bool {
        geometry.class() == ObjectClass::RaidGroup &&
            geometry.raid_type() != RaidType::Raid10
    }

    pub fn new(class: Arc<RaidGroupClassConfig>, persisted: EmehParams,
               geometry: &Geometry) -> Self
    {
        let capable = Self::is_capable(geometry);
        let enabled_mode = if !capable {
            EmehMode::Disabled
        } else if persisted.mode.is_configurable() {
            persisted.mode
        } else {
            class.default_mode()
        };
        let mut emeh = Emeh {
            class,
            capable,
            enabled_mode,
            current_mode: enabled_mode,
            request: None,
            executed: false,
            paco_position: None,
            reliability: EmehReliability::Unknown,
            increase: persisted.increase,
            requested_increase: None,
        };
        emeh.apply_class_override();
        emeh
    }

    /// Let a changed class-wide mode override this group's enabled mode.
    ///
    /// Never disturbs a mode that a request put in effect.
    pub fn apply_class_override(&mut self) {
        if !self.capable {
            return;
        }
        let class_mode = self.class.current_mode();
        if class_mode == self.enabled_mode ||
            class_mode == self.class.default_mode() ||
            !class_mode.is_configurable() ||
            !self.enabled_mode.is_configurable()
        {
            return;
        }
        tracing::debug!(from = ?self.enabled_mode, to = ?class_mode,
            "class EMEH mode override");
        self.enabled_mode = class_mode;
        if self.current_mode.is_configurable() && self.request.is_none() {
            self.current_mode = class_mode;
        }
    }

    pub fn is_enabled(&self) -> bool {
        !matches!(self.enabled_mode, EmehMode::Invalid | EmehMode::Disabled)
    }

    pub fn enabled_mode(&self) -> EmehMode {
        self.enabled_mode
    }

    pub fn current_mode(&self) -> EmehMode {
        self.current_mode
    }

    pub fn request_in_flight(&self) -> Option<EmehRequest> {
        self.request
    }

    pub fn paco_position(&self) -> Option<Position> {
        self.paco_position
    }

    pub fn reliability(&self) -> EmehReliability {
        self.reliability
    }

    /// What should be persisted for this group
    pub fn params(&self) -> EmehParams {
        EmehParams { mode: self.enabled_mode, increase: self.increase }
    }

    /// Change the group's configured mode, as for an administrative
    /// Enable or Disable.
    pub fn set_enabled_mode(&mut self, mode: EmehMode) -> Result<()> {
        if !mode.is_configurable() {
            return Err(Error::EINVAL);
        }
        if !self.capable {
            return Err(Error::EOPNOTSUPP);
        }
        self.enabled_mode = mode;
        if self.current_mode.is_configurable() && self.request.is_none() {
            self.current_mode = mode;
        }
        Ok(())
    }

    pub fn set_increase(&mut self, increase: ThresholdIncrease) {
        self.increase = increase;
    }

    /// Ask for `req`.  Only one request may be in flight; a second is
    /// ignored.  Returns whether the request was accepted.
    pub fn request(&mut self, req: EmehRequest, paco_position: Option<Position>,
                   increase: Option<u16>) -> bool
    {
        if let Some(busy) = self.request {
            tracing::info!(?req, ?busy, "EMEH request already in flight");
            return false;
        }
        if !self.capable ||
            (req != EmehRequest::RestoreNormalMode && !self.is_enabled())
        {
            tracing::debug!(?req, "EMEH not enabled");
            return false;
        }
        tracing::debug!(?req, ?paco_position, "EMEH request");
        self.request = Some(req);
        self.executed = false;
        self.requested_increase = increase;
        if req == EmehRequest::PacoStarted {
            self.paco_position = paco_position;
        }
        true
    }

    /// Join requests that the peer started.
    ///
    /// If both sides started different requests, the Active side's wins: the
    /// Passive side abandons its own and adopts the peer's.
    pub fn check_peer_requests(&mut self, role: SpRole, peer: &dyn PeerLink,
                               flags: &mut ClusterFlags)
    {
        for req in EmehRequest::ALL {
            let op = req.cluster_op();
            if !flags.get(op).peer_requested() {
                continue;
            }
            match self.request {
                Some(mine) if mine == req => (),
                None => {
                    tracing::debug!(?req, "peer requested EMEH");
                    self.request = Some(req);
                    self.executed = false;
                    self.requested_increase = None;
                }
                Some(mine) if role == SpRole::Passive => {
                    tracing::error!(?mine, peer = ?req,
                        "EMEH request mismatch; yielding to peer");
                    let f = flags.get_mut(mine.cluster_op()).abandon();
                    peer.send(PeerMessage::Flags {
                        op: mine.cluster_op(),
                        flags: f
                    });
                    self.request = Some(req);
                    self.executed = false;
                    self.requested_increase = None;
                }
                Some(mine) => {
                    tracing::error!(?mine, peer = ?req,
                        "EMEH request mismatch; waiting for peer to yield");
                }
            }
        }
    }

    fn increase_percent(&self) -> u16 {
        self.requested_increase
            .filter(|p| *p != 0)
            .unwrap_or_else(|| {
                self.increase.percent_or(self.class.increase_percent())
            })
    }

    /// Query every drive's reliability, and pick the positions for a Paco
    /// request.
    async fn paco_positions(&mut self, ctx: &EmehContext<'_>)
        -> PositionBitmask
    {
        let all = ctx.geometry.all_positions();
        let infos = future::join_all(all.iter()
            .map(|p| ctx.usurper.get_dieh_info(p))
        ).await;
        let mut reliability = EmehReliability::Unknown;
        for (p, r) in all.iter().zip(infos) {
            match r {
                Ok(info) => {
                    reliability = reliability.fold(info.reliability);
                    if self.paco_position.is_none() {
                        // Joined the peer's request without a position
                        self.paco_position = info.paco_position;
                    }
                }
                Err(e) => {
                    tracing::warn!(position = p, ?e, "get_dieh_info failed");
                    reliability = EmehReliability::Low;
                }
            }
        }
        if reliability == EmehReliability::Unknown {
            reliability = EmehReliability::Low;
        }
        self.reliability = reliability;
        match (reliability, self.paco_position) {
            (EmehReliability::VeryHigh, Some(paco)) => {
                let mut positions = all;
                positions.remove(paco);
                positions
            }
            _ => all
        }
    }

    /// Carry out the in-flight request on this SP's drives
    async fn execute(&mut self, req: EmehRequest, ctx: &EmehContext<'_>)
    {
        let not_rl = ctx.geometry.all_positions()
            .difference(ctx.rebuild_logging);
        let (positions, cmd, event, mode) = match req {
            EmehRequest::RaidGroupDegraded => {
                let positions = if ctx.rebuild_logging.count() >
                    ctx.geometry.redundancy()
                {
                    // Broken.  Nothing to protect.
                    PositionBitmask::empty()
                } else {
                    not_rl
                };
                (positions, DiehCommand::Disable,
                 Event::new(EventId::RaidGroupErrorThresholdsDisabled, ctx.rg,
                            positions),
                 EmehMode::DegradedHa)
            }
            EmehRequest::PacoStarted => {
                let positions = self.paco_positions(ctx).await;
                let data = self.paco_position
                    .map(u64::from)
                    .unwrap_or(u64::from(INVALID_POSITION));
                (positions, DiehCommand::Disable,
                 Event::new(EventId::ProactiveSpareErrorThresholdsDisabled,
                            ctx.rg, positions).with_data(data),
                 EmehMode::PacoHa)
            }
            EmehRequest::IncreaseThresholds => {
                let pct = self.increase_percent();
                (not_rl, DiehCommand::Increase(pct),
                 Event::new(EventId::RaidGroupErrorThresholdsIncreased, ctx.rg,
                            not_rl).with_data(u64::from(pct)),
                 EmehMode::ThresholdsIncreased)
            }
            EmehRequest::RestoreNormalMode => {
                let id = if self.paco_position.is_some() {
                    EventId::ProactiveSpareErrorThresholdsRestored
                } else {
                    EventId::RaidGroupErrorThresholdsRestored
                };
                (not_rl, DiehCommand::RestoreDefaults,
                 Event::new(id, ctx.rg, not_rl), self.enabled_mode)
            }
        };
        let results = future::join_all(positions.iter()
            .map(|p| ctx.usurper.set_dieh_threshold(p, cmd))
        ).await;
        for (p, r) in positions.iter().zip(results) {
            if let Err(e) = r {
                // The drive keeps its old thresholds.  Not worth failing the
                // request over.
                tracing::warn!(position = p, ?cmd, ?e,
                    "set_dieh_threshold failed");
            }
        }
        ctx.events.write(event);
        tracing::debug!(?req, %positions, ?mode, "EMEH mode change");
        self.current_mode = mode;
    }

    /// Drive the in-flight request one step through the handshake
    #[tracing::instrument(skip(self, ctx))]
    pub async fn tick(&mut self, ctx: &mut EmehContext<'_>)
        -> Result<TickStatus>
    {
        let req = match self.request {
            None => return Ok(TickStatus::Done),
            Some(req) => req
        };
        let op = req.cluster_op();
        if !self.executed {
            self.execute(req, ctx).await;
            self.executed = true;
            let f = ctx.flags.get_mut(op).start();
            ctx.peer.send(PeerMessage::Flags { op, flags: f });
        }
        let (state, send) = ctx.flags.get_mut(op)
            .advance(ctx.role, ctx.peer.is_present());
        if let Some(flags) = send {
            ctx.peer.send(PeerMessage::Flags { op, flags });
        }
        if state == HandshakeState::Cleared {
            tracing::debug!(?req, "EMEH request complete");
            if req == EmehRequest::RestoreNormalMode {
                self.paco_position = None;
            }
            self.request = None;
            self.executed = false;
            self.requested_increase = None;
            Ok(TickStatus::Done)
        } else {
            Ok(TickStatus::Pending)
        }
    }
}

// LCOV_EXCL_STOP
