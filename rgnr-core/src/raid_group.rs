// vim: tw=80
//! A raid group's consistency-tracking engine
//!
//! [`RaidGroup`] owns the non-paged bookkeeping and the chunk records of one
//! raid group, and is stepped by an external scheduler through
//! [`RaidGroup::monitor_tick`].  Only the Active SP writes non-paged metadata.
//! The Passive SP reports its view of failed positions, joins handshakes, and
//! reloads the bookkeeping whenever the Active SP says it changed.

use std::sync::Arc;

use tokio::time::Instant;

use crate::{
    checkpoint::MAX_REBUILD_POSITIONS,
    cluster::{ClusterFlags, ClusterOp, HandshakeState, PeerLink, PeerMessage,
              SpRole},
    condition::{Condition, Conditions, LifecycleState, TickStatus},
    config::{EngineConfig, RaidGroupClassConfig},
    edge::{Edge, Edges, UpstreamEdge},
    emeh::{DriveUsurper, Emeh, EmehContext, EmehControl, EmehMode,
           EmehRequest},
    event_log::{Event, EventId, EventLog},
    geometry::{Geometry, ObjectClass},
    metadata::{ChunkAccessor, MetadataService, NonPagedInfo, NonPagedStore},
    needs_rebuild::NeedsRebuild,
    rebuild::{
        HandOff,
        RebuildContext,
        RebuildDriver,
        RebuildIo,
        StepOutcome,
        determine_if_rebuild_needed,
        evaluate_virtual_drive_hand_off,
    },
    rebuild_logging::{
        BrokenRaidGroupGuard,
        RlDecision,
        is_going_broken,
        set_rebuild_logging,
        set_rebuild_logging_in,
    },
    status::PacketStatus,
    types::*,
};

/// Everything needed to construct a [`RaidGroup`]
pub struct RaidGroupParams {
    pub id: RaidGroupId,
    pub geometry: Geometry,
    pub role: SpRole,
    pub config: EngineConfig,
    pub class: Arc<RaidGroupClassConfig>,
    pub metadata: Arc<dyn MetadataService>,
    pub io: Arc<dyn RebuildIo>,
    pub usurper: Arc<dyn DriveUsurper>,
    pub events: Arc<dyn EventLog>,
    pub peer: Arc<dyn PeerLink>,
    /// The edge above, for a virtual drive
    pub upstream: Option<Arc<dyn UpstreamEdge>>,
}

/// Result of one monitor tick
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TickOutcome {
    pub status: TickStatus,
    pub packet: PacketStatus,
}

pub struct RaidGroup {
    id: RaidGroupId,
    role: SpRole,
    config: EngineConfig,
    class: Arc<RaidGroupClassConfig>,
    store: NonPagedStore,
    nr: NeedsRebuild,
    edges: Edges,
    io: Arc<dyn RebuildIo>,
    usurper: Arc<dyn DriveUsurper>,
    events: Arc<dyn EventLog>,
    peer: Arc<dyn PeerLink>,
    upstream: Option<Arc<dyn UpstreamEdge>>,
    flags: ClusterFlags,
    conditions: Conditions,
    lifecycle: LifecycleState,
    broken_guard: BrokenRaidGroupGuard,
    /// Bounds how long to wait for the peer to agree on failed positions
    peer_guard: BrokenRaidGroupGuard,
    emeh: Emeh,
    /// Rebuild-logging positions whose remaining extent has been marked since
    /// their edge came back
    nr_marked: PositionBitmask,
    /// Positions that failed I/O without their edge going down
    failed_io: PositionBitmask,
    /// The peer's most recent view of failed positions
    peer_failed: PositionBitmask,
    quiesced: bool,
    driver: RebuildDriver,
}

impl RaidGroup {
    pub fn new(params: RaidGroupParams) -> Self {
        let geometry = params.geometry;
        let store = NonPagedStore::new(params.metadata.clone());
        let nr = NeedsRebuild::new(ChunkAccessor::new(geometry,
                                                      params.metadata));
        let emeh = Emeh::new(params.class.clone(), Default::default(),
                             &geometry);
        let wait = params.config.broken_wait();
        RaidGroup {
            id: params.id,
            role: params.role,
            config: params.config,
            class: params.class,
            store,
            edges: Edges::new(geometry.width()),
            nr,
            io: params.io,
            usurper: params.usurper,
            events: params.events,
            peer: params.peer,
            upstream: params.upstream,
            flags: ClusterFlags::default(),
            conditions: Conditions::default(),
            lifecycle: LifecycleState::Specialize,
            broken_guard: BrokenRaidGroupGuard::new(wait),
            peer_guard: BrokenRaidGroupGuard::new(wait),
            emeh,
            nr_marked: PositionBitmask::empty(),
            failed_io: PositionBitmask::empty(),
            peer_failed: PositionBitmask::empty(),
            quiesced: false,
            driver: RebuildDriver::default(),
        }
    }

    pub fn id(&self) -> RaidGroupId {
        self.id
    }

    pub fn geometry(&self) -> &Geometry {
        self.nr.geometry()
    }

    pub fn role(&self) -> SpRole {
        self.role
    }

    /// Take over as Active, as when the peer SP fails
    pub fn set_role(&mut self, role: SpRole) {
        tracing::info!(rg = self.id.number, ?role, "role change");
        self.role = role;
        if role == SpRole::Active {
            self.conditions.set_condition(Condition::EvalRebuildLogging);
            self.conditions.set_condition(Condition::EvalMarkNr);
        }
    }

    pub fn lifecycle(&self) -> LifecycleState {
        self.lifecycle
    }

    pub fn nonpaged(&self) -> NonPagedInfo {
        self.store.get()
    }

    pub fn rebuild_logging(&self) -> PositionBitmask {
        self.store.get().rebuild_logging
    }

    pub fn checkpoint(&self, position: Position) -> Option<LbaT> {
        self.store.get().checkpoints.checkpoint(position)
    }

    pub fn needs_rebuild(&self) -> &NeedsRebuild {
        &self.nr
    }

    pub fn edges(&self) -> &Edges {
        &self.edges
    }

    pub fn emeh(&self) -> &Emeh {
        &self.emeh
    }

    pub fn emeh_mode(&self) -> EmehMode {
        self.emeh.current_mode()
    }

    pub fn conditions(&self) -> &Conditions {
        &self.conditions
    }

    pub fn is_quiesced(&self) -> bool {
        self.quiesced
    }

    /// Ask for another monitor tick to service `cond`
    pub fn set_condition(&mut self, cond: Condition) {
        self.conditions.set_condition(cond);
    }

    /// Load persisted state and become Ready
    #[tracing::instrument(skip(self), fields(rg = self.id.number))]
    pub async fn load(&mut self) -> Result<()> {
        let np = self.store.load().await?;
        self.emeh = Emeh::new(self.class.clone(), np.emeh, self.geometry());
        self.lifecycle = LifecycleState::Ready;
        self.conditions.set_condition(Condition::EvalRebuildLogging);
        if !np.rebuild_logging.is_empty() {
            self.conditions.set_condition(Condition::EvalMarkNr);
        }
        tracing::debug!(rl = %np.rebuild_logging, "loaded");
        Ok(())
    }

    fn local_failed(&self) -> PositionBitmask {
        self.edges.failed_positions() | self.failed_io
    }

    fn send_failed_positions(&self) {
        self.peer.send(PeerMessage::FailedPositions(self.local_failed()));
    }

    /// React to a downstream edge changing state
    pub fn on_edge_state_change(&mut self, position: Position, edge: Edge)
        -> Result<()>
    {
        let old = self.edges.set(position, edge)?;
        tracing::debug!(position, ?old, new = ?edge, "edge state change");
        if edge.is_failed() {
            self.nr_marked.remove(position);
            self.conditions.set_condition(Condition::EvalRebuildLogging);
        } else if edge.is_usable() {
            self.failed_io.remove(position);
            // Never trust the edge alone: it may have come back before its
            // rebuild-logging write landed.
            self.conditions.set_condition(Condition::EvalRebuildLogging);
            self.conditions.set_condition(Condition::EvalMarkNr);
        }
        self.send_failed_positions();
        Ok(())
    }

    /// A position failed I/O, though its edge is still up
    pub fn report_failed_io(&mut self, position: Position) {
        if position < self.geometry().width() {
            self.failed_io.insert(position);
            self.nr_marked.remove(position);
            self.conditions.set_condition(Condition::EvalRebuildLogging);
            self.send_failed_positions();
        }
    }

    /// The checkpoint bookkeeping can't represent the dead positions.
    ///
    /// Rather than repair it incrementally, rebuild it from scratch while
    /// both SPs sit in Activate.
    pub fn handle_too_many_dead_positions(&mut self) {
        if !self.geometry().has_paged_metadata() {
            tracing::error!(rg = self.id.number,
                "too many dead positions; no recovery possible");
            self.go_broken();
            return;
        }
        tracing::warn!(rg = self.id.number,
            "too many dead positions; reconstructing paged metadata");
        self.lifecycle = LifecycleState::Activate;
        self.conditions.set_condition(Condition::ReconstructPaged);
        self.peer.send(PeerMessage::Lifecycle(LifecycleState::Activate));
    }

    fn go_broken(&mut self) {
        self.lifecycle = LifecycleState::Fail;
        self.events.write(Event::new(EventId::RaidGroupBroken, self.id,
                                     self.local_failed()));
        self.peer.send(PeerMessage::Lifecycle(LifecycleState::Fail));
    }

    /// Administrative EMEH control
    #[tracing::instrument(skip(self), fields(rg = self.id.number))]
    pub async fn set_emeh_control(&mut self, control: EmehControl)
        -> Result<()>
    {
        match control {
            EmehControl::Enable | EmehControl::Disable => {
                let mode = if control == EmehControl::Enable {
                    EmehMode::EnabledNormal
                } else {
                    EmehMode::Disabled
                };
                self.emeh.set_enabled_mode(mode)?;
                if self.role == SpRole::Active {
                    let params = self.emeh.params();
                    self.store.update(|np| {
                        np.emeh = params;
                        Ok(())
                    }).await?;
                    self.peer.send(PeerMessage::NonPagedChanged);
                }
            }
            EmehControl::IncreaseThresholds(pct) => {
                if self.emeh.request(EmehRequest::IncreaseThresholds, None,
                                     pct)
                {
                    self.conditions.set_condition(Condition::EmehRequest);
                }
            }
            EmehControl::RestoreNormalMode => {
                if self.emeh.request(EmehRequest::RestoreNormalMode, None,
                                     None)
                {
                    self.conditions.set_condition(Condition::EmehRequest);
                }
            }
        }
        Ok(())
    }

    /// A proactive copy of `position` has begun
    pub fn emeh_paco_started(&mut self, position: Position) {
        if self.emeh.request(EmehRequest::PacoStarted, Some(position), None) {
            self.conditions.set_condition(Condition::EmehRequest);
        }
    }

    /// Handle everything the peer has sent
    async fn process_peer_messages(&mut self) -> Result<()> {
        while let Some(msg) = self.peer.try_recv() {
            tracing::trace!(?msg, "from peer");
            match msg {
                PeerMessage::Flags { op: ClusterOp::Quiesce, flags } => {
                    self.flags.get_mut(ClusterOp::Quiesce).peer_update(flags);
                    self.peer_quiesce();
                }
                PeerMessage::Flags { op, flags } => {
                    self.flags.get_mut(op).peer_update(flags);
                    self.conditions.set_condition(Condition::EmehRequest);
                }
                PeerMessage::FailedPositions(mask) => {
                    self.peer_failed = mask;
                    self.conditions
                        .set_condition(Condition::EvalRebuildLogging);
                    if !self.nr_marked.is_empty() {
                        self.conditions.set_condition(Condition::Rebuild);
                    }
                }
                PeerMessage::NonPagedChanged => {
                    if self.role == SpRole::Passive {
                        self.store.load().await?;
                    }
                }
                PeerMessage::Unquiesce => {
                    self.quiesced = false;
                }
                PeerMessage::Lifecycle(state) => {
                    tracing::info!(?state, "peer lifecycle");
                    match state {
                        LifecycleState::Activate
                            if self.role == SpRole::Active =>
                        {
                            self.handle_too_many_dead_positions();
                        }
                        LifecycleState::Ready => {
                            self.lifecycle = state;
                            self.store.load().await?;
                        }
                        _ => self.lifecycle = state
                    }
                }
            }
        }
        Ok(())
    }

    /// Join a quiesce that the peer started, or finish one we joined
    fn peer_quiesce(&mut self) {
        let hs = self.flags.get_mut(ClusterOp::Quiesce);
        if hs.peer_requested() {
            self.quiesced = true;
            let f = hs.start();
            self.peer.send(PeerMessage::Flags {
                op: ClusterOp::Quiesce,
                flags: f
            });
        }
        let (_, send) = hs.advance(self.role, self.peer.is_present());
        if let Some(flags) = send {
            self.peer.send(PeerMessage::Flags {op: ClusterOp::Quiesce, flags});
        }
    }

    /// Stop I/O on both SPs.  Returns true once both are quiesced.
    fn quiesce_io_if_needed(&mut self) -> bool {
        let hs = self.flags.get_mut(ClusterOp::Quiesce);
        if self.quiesced && hs.state() == HandshakeState::Idle {
            return true;
        }
        if hs.state() == HandshakeState::Idle {
            tracing::debug!("quiesce");
            self.quiesced = true;
            let f = hs.start();
            self.peer.send(PeerMessage::Flags {
                op: ClusterOp::Quiesce,
                flags: f
            });
        }
        let (state, send) = hs.advance(self.role, self.peer.is_present());
        if let Some(flags) = send {
            self.peer.send(PeerMessage::Flags {op: ClusterOp::Quiesce, flags});
        }
        state == HandshakeState::Cleared
    }

    fn unquiesce(&mut self) {
        if self.quiesced {
            tracing::debug!("unquiesce");
            self.quiesced = false;
            self.peer.send(PeerMessage::Unquiesce);
        }
    }

    /// Start rebuild logging newly failed positions
    async fn eval_rebuild_logging(&mut self) -> Result<TickStatus> {
        if self.role == SpRole::Passive {
            self.conditions.clear_current_condition();
            return Ok(TickStatus::Done);
        }
        let np = self.store.get();
        let local_failed = self.local_failed();
        // A position that fails again mid-rebuild starts over
        let fresh: PositionBitmask = np.rebuild_logging.iter()
            .filter(|p| np.checkpoints.checkpoint(*p) == Some(0))
            .collect();
        let need_set = local_failed.difference(fresh);
        if need_set.is_empty() {
            self.broken_guard.check(false, Instant::now());
            self.peer_guard.check(false, Instant::now());
            self.conditions.clear_current_condition();
            return Ok(TickStatus::Done);
        }
        let disagree = self.peer.is_present() &&
            self.peer_failed != local_failed;
        if self.peer_guard.check(disagree, Instant::now()) == RlDecision::Wait
        {
            tracing::debug!(%local_failed, peer_failed = %self.peer_failed,
                "waiting for peer to agree on failed positions");
            return Ok(TickStatus::Pending);
        }
        let going_broken = is_going_broken(self.geometry(), &self.edges,
                                           self.failed_io);
        if self.broken_guard.check(going_broken, Instant::now()) ==
            RlDecision::Wait
        {
            return Ok(TickStatus::Pending);
        }
        if !self.quiesce_io_if_needed() {
            return Ok(TickStatus::Pending);
        }
        let r = set_rebuild_logging(&self.store, need_set).await;
        self.unquiesce();
        r?;
        tracing::info!(positions = %need_set, "rebuild logging started");
        self.events.write(Event::new(EventId::RebuildLoggingStarted, self.id,
                                     need_set));
        self.nr_marked = self.nr_marked.difference(need_set);
        self.peer.send(PeerMessage::NonPagedChanged);
        self.conditions.clear_current_condition();
        Ok(TickStatus::Done)
    }

    /// Mark the remaining extent of every returning position
    async fn eval_mark_nr(&mut self) -> Result<TickStatus> {
        if self.role == SpRole::Passive {
            self.conditions.clear_current_condition();
            return Ok(TickStatus::Done);
        }
        let np = self.store.get();
        let candidates = np.rebuild_logging
            .intersection(self.edges.usable_positions())
            .difference(self.failed_io)
            .difference(self.nr_marked);
        let capacity = self.geometry().disk_capacity();
        for p in candidates.iter() {
            if !determine_if_rebuild_needed(&np, p) {
                // Already rebuilt.  Just needs to leave rebuild logging.
                self.nr_marked.insert(p);
                continue;
            }
            let checkpoint = np.checkpoints.checkpoint(p).unwrap_or(0)
                .min(capacity);
            self.nr.mark_nr(p, checkpoint, capacity - checkpoint).await?;
            self.nr_marked.insert(p);
        }
        if !self.nr_marked.is_empty() {
            self.conditions.set_condition(Condition::Rebuild);
        }
        self.conditions.clear_current_condition();
        Ok(TickStatus::Done)
    }

    /// Is the parent of this pass-through virtual drive rebuilding it?
    fn check_virtual_drive_hand_off(&self) -> Option<HandOff> {
        if self.geometry().class() != ObjectClass::VirtualDrive {
            return None;
        }
        let upstream = self.upstream.as_ref()?;
        let pass_thru = upstream.get_configuration()
            .map(|c| c.mode.pass_thru_position().is_some())
            .unwrap_or(true);
        if !pass_thru {
            return None;
        }
        Some(evaluate_virtual_drive_hand_off(upstream.as_ref(),
                                             &self.store.get(),
                                             self.nr_marked))
    }

    async fn rebuild(&mut self) -> Result<TickStatus> {
        if self.role == SpRole::Passive {
            self.conditions.clear_current_condition();
            return Ok(TickStatus::Done);
        }
        match self.check_virtual_drive_hand_off() {
            Some(HandOff::ContinueDegraded) => {
                self.conditions.clear_current_condition();
                return Ok(TickStatus::Done);
            }
            Some(HandOff::Broken) => {
                self.go_broken();
                self.conditions.clear_current_condition();
                return Ok(TickStatus::Done);
            }
            None => ()
        }
        // Only rebuild positions that both SPs can reach
        let peer_failed = if self.peer.is_present() {
            self.peer_failed
        } else {
            PositionBitmask::empty()
        };
        let rebuildable = self.store.get().rebuild_logging
            .intersection(self.edges.usable_positions())
            .intersection(self.nr_marked)
            .difference(self.failed_io)
            .difference(peer_failed);
        let ctx = RebuildContext {
            rg: self.id,
            store: &self.store,
            nr: &self.nr,
            io: self.io.as_ref(),
            events: self.events.as_ref(),
            rebuildable,
            chunks_per_io: self.config.rebuild_chunks_per_io,
        };
        match self.driver.step(&ctx).await? {
            StepOutcome::Idle => {
                self.conditions.clear_current_condition();
                Ok(TickStatus::Done)
            }
            StepOutcome::Progress { .. } => {
                self.peer.send(PeerMessage::NonPagedChanged);
                Ok(TickStatus::Reschedule)
            }
            StepOutcome::Deferred => Ok(TickStatus::Pending),
            StepOutcome::Completed(positions) => {
                self.nr_marked = self.nr_marked.difference(positions);
                tracing::info!(%positions, "rebuild logging stopped");
                self.events.write(Event::new(EventId::RebuildLoggingStopped,
                                             self.id, positions));
                self.peer.send(PeerMessage::NonPagedChanged);
                Ok(TickStatus::Reschedule)
            }
            StepOutcome::NeedsReset(positions) => {
                tracing::warn!(%positions, "resetting rebuild checkpoints");
                set_rebuild_logging(&self.store, positions).await?;
                self.nr_marked = self.nr_marked.difference(positions);
                self.conditions.set_condition(Condition::EvalMarkNr);
                self.peer.send(PeerMessage::NonPagedChanged);
                Ok(TickStatus::Reschedule)
            }
        }
    }

    /// Rebuild the bookkeeping from scratch, then return to Ready
    #[tracing::instrument(skip(self), fields(rg = self.id.number))]
    async fn reconstruct_paged(&mut self) -> Result<TickStatus> {
        if self.role == SpRole::Passive {
            self.conditions.clear_current_condition();
            return Ok(TickStatus::Pending);
        }
        let old = self.store.get();
        let positions = self.local_failed() | old.rebuild_logging;
        let redundancy = self.geometry().redundancy();
        if positions.count() as usize > MAX_REBUILD_POSITIONS ||
            positions.count() > redundancy
        {
            tracing::error!(%positions, redundancy, "raid group broken");
            self.go_broken();
            self.conditions.clear_current_condition();
            return Ok(TickStatus::Done);
        }
        let mut np = NonPagedInfo {
            emeh: old.emeh,
            ..Default::default()
        };
        set_rebuild_logging_in(&mut np, positions)?;
        self.store.store(np).await?;
        let capacity = self.geometry().disk_capacity();
        self.nr.mark_nr_for_positions(positions, 0, capacity).await?;
        self.nr_marked = PositionBitmask::empty();
        self.events.write(Event::new(EventId::PagedMetadataReconstructed,
                                     self.id, positions));
        self.lifecycle = LifecycleState::Ready;
        self.peer.send(PeerMessage::NonPagedChanged);
        self.peer.send(PeerMessage::Lifecycle(LifecycleState::Ready));
        self.conditions.clear_current_condition();
        self.conditions.set_condition(Condition::EvalRebuildLogging);
        self.conditions.set_condition(Condition::EvalMarkNr);
        Ok(TickStatus::Reschedule)
    }

    async fn emeh_request(&mut self) -> Result<TickStatus> {
        let rebuild_logging = self.store.get().rebuild_logging;
        let geometry = self.nr.geometry();
        let mut ctx = EmehContext {
            rg: self.id,
            geometry,
            role: self.role,
            rebuild_logging,
            usurper: self.usurper.as_ref(),
            events: self.events.as_ref(),
            peer: self.peer.as_ref(),
            flags: &mut self.flags,
        };
        let status = self.emeh.tick(&mut ctx).await?;
        if status == TickStatus::Done {
            self.conditions.clear_current_condition();
        }
        Ok(status)
    }

    /// Request EMEH changes that follow from the degraded state
    fn evaluate_emeh_triggers(&mut self) {
        if self.emeh.request_in_flight().is_some() {
            self.conditions.set_condition(Condition::EmehRequest);
            return;
        }
        let rl = self.store.get().rebuild_logging;
        let req = match self.emeh.current_mode() {
            EmehMode::EnabledNormal if !rl.is_empty() =>
                EmehRequest::RaidGroupDegraded,
            EmehMode::DegradedHa if rl.is_empty() =>
                EmehRequest::RestoreNormalMode,
            _ => return
        };
        if self.emeh.request(req, None, None) {
            self.conditions.set_condition(Condition::EmehRequest);
        }
    }

    async fn run_condition(&mut self, cond: Condition) -> Result<TickStatus> {
        match cond {
            Condition::ReconstructPaged => self.reconstruct_paged().await,
            Condition::EvalRebuildLogging => self.eval_rebuild_logging().await,
            Condition::EvalMarkNr => self.eval_mark_nr().await,
            Condition::Rebuild => self.rebuild().await,
            Condition::EmehRequest => self.emeh_request().await,
        }
    }

    async fn tick_inner(&mut self) -> Result<TickStatus> {
        self.process_peer_messages().await?;
        match self.lifecycle {
            LifecycleState::Specialize | LifecycleState::Fail => {
                return Ok(TickStatus::Done);
            }
            LifecycleState::Activate
                if !self.conditions.is_set(Condition::ReconstructPaged) =>
            {
                // Waiting for the peer to finish reconstruction
                return Ok(TickStatus::Pending);
            }
            _ => ()
        }
        self.emeh.apply_class_override();
        self.emeh.check_peer_requests(self.role, self.peer.as_ref(),
                                      &mut self.flags);
        if self.lifecycle == LifecycleState::Ready {
            self.evaluate_emeh_triggers();
        }
        let status = match self.conditions.next() {
            None => return Ok(TickStatus::Done),
            Some(cond) => {
                tracing::trace!(?cond, "run condition");
                self.run_condition(cond).await?
            }
        };
        if status == TickStatus::Done && !self.conditions.is_empty() {
            Ok(TickStatus::Reschedule)
        } else {
            Ok(status)
        }
    }

    /// Run the highest priority condition once.
    ///
    /// Errors are translated here, and only here, into a packet status.  A
    /// failed condition stays set so that a later tick retries it.
    #[tracing::instrument(skip(self), fields(rg = self.id.number))]
    pub async fn monitor_tick(&mut self) -> TickOutcome {
        let r = self.tick_inner().await;
        let packet = PacketStatus::from(&r);
        let status = match r {
            Ok(status) => status,
            Err(Error::ETOOMANYDEAD) => {
                self.handle_too_many_dead_positions();
                TickStatus::Reschedule
            }
            Err(e) if e.is_retryable() => {
                tracing::warn!(?e, "monitor condition failed; will retry");
                TickStatus::Reschedule
            }
            Err(e) => {
                tracing::error!(?e, "monitor condition failed");
                TickStatus::Pending
            }
        };
        TickOutcome { status, packet }
    }
}

// LCOV_EXCL_STOP
