// vim: tw=80
//! Helpers shared by the functional and torture tests

use std::sync::{Arc, Mutex};

use futures::{FutureExt, future};

use rgnr_core::{
    BoxFut,
    Error,
    LbaT,
    BlockCountT,
    Position,
    PositionBitmask,
    RaidGroupId,
    cluster::{NoPeer, PeerLink, SpRole},
    condition::TickStatus,
    config::{EngineConfig, RaidGroupClassConfig},
    edge::{Edge, PathAttributes, PathState, UpstreamEdge, VirtualDriveConfig},
    emeh::{DiehCommand, DiehInfo, DriveUsurper},
    event_log::MemEventLog,
    geometry::{Geometry, RaidType},
    metadata::{ChunkInfo, MemMetadata},
    raid_group::{RaidGroup, RaidGroupParams},
    rebuild::{Permit, RebuildIo},
};

/// Small chunks, so a whole disk is only a handful of them
pub fn test_config() -> EngineConfig {
    EngineConfig { chunk_size: 16, ..Default::default() }
}

pub fn mask(bits: u16) -> PositionBitmask {
    PositionBitmask::from_bits(bits)
}

pub fn down() -> Edge {
    Edge::new(PathState::Broken, PathAttributes::empty())
}

pub fn up() -> Edge {
    Edge::new(PathState::Enabled, PathAttributes::empty())
}

/// A `RebuildIo` that records every request
#[derive(Debug, Default)]
pub struct RecordingIo {
    rebuilds: Mutex<Vec<(PositionBitmask, LbaT, BlockCountT)>>,
    /// Number of upcoming permit requests to defer
    defer: Mutex<u32>,
    /// Error for the next rebuild I/O
    fail: Mutex<Option<Error>>,
}

impl RecordingIo {
    pub fn rebuilds(&self) -> Vec<(PositionBitmask, LbaT, BlockCountT)> {
        self.rebuilds.lock().unwrap().clone()
    }

    pub fn defer_next(&self, n: u32) {
        *self.defer.lock().unwrap() = n;
    }

    pub fn fail_next(&self, e: Error) {
        *self.fail.lock().unwrap() = Some(e);
    }
}

impl RebuildIo for RecordingIo {
    fn request_permit(&self, _lba: LbaT, _blocks: BlockCountT)
        -> BoxFut<Permit>
    {
        let mut defer = self.defer.lock().unwrap();
        let permit = if *defer > 0 {
            *defer -= 1;
            Permit::Deferred
        } else {
            Permit::Granted
        };
        future::ok(permit).boxed()
    }

    fn rebuild(&self, positions: PositionBitmask, lba: LbaT,
               blocks: BlockCountT) -> BoxFut<()>
    {
        if let Some(e) = self.fail.lock().unwrap().take() {
            return future::err(e).boxed();
        }
        self.rebuilds.lock().unwrap().push((positions, lba, blocks));
        future::ok(()).boxed()
    }
}

/// A `DriveUsurper` that records every threshold command
#[derive(Debug, Default)]
pub struct RecordingUsurper {
    commands: Mutex<Vec<(Position, DiehCommand)>>,
    info: Mutex<DiehInfo>,
}

impl RecordingUsurper {
    pub fn commands(&self) -> Vec<(Position, DiehCommand)> {
        self.commands.lock().unwrap().clone()
    }

    /// Positions that received `cmd`
    pub fn positions_for(&self, cmd: DiehCommand) -> PositionBitmask {
        self.commands().into_iter()
            .filter(|(_, c)| *c == cmd)
            .map(|(p, _)| p)
            .collect()
    }

    pub fn set_info(&self, info: DiehInfo) {
        *self.info.lock().unwrap() = info;
    }
}

impl DriveUsurper for RecordingUsurper {
    fn set_dieh_threshold(&self, position: Position, cmd: DiehCommand)
        -> BoxFut<()>
    {
        self.commands.lock().unwrap().push((position, cmd));
        future::ok(()).boxed()
    }

    fn get_dieh_info(&self, _position: Position) -> BoxFut<DiehInfo> {
        future::ok(*self.info.lock().unwrap()).boxed()
    }
}

/// The object above a virtual drive
#[derive(Debug)]
pub struct StaticUpstream {
    pub attributes: Mutex<PathAttributes>,
    pub config: Mutex<Result<VirtualDriveConfig, Error>>,
}

impl UpstreamEdge for StaticUpstream {
    fn path_attributes(&self) -> PathAttributes {
        *self.attributes.lock().unwrap()
    }

    fn get_configuration(&self) -> Result<VirtualDriveConfig, Error> {
        *self.config.lock().unwrap()
    }
}

pub struct Harness {
    pub rg: RaidGroup,
    pub md: Arc<MemMetadata>,
    pub events: Arc<MemEventLog>,
    pub io: Arc<RecordingIo>,
    pub usurper: Arc<RecordingUsurper>,
}

impl Harness {
    pub async fn tick(&mut self) -> TickStatus {
        self.rg.monitor_tick().await.status
    }

    /// Tick until the raid group has nothing left to do
    pub async fn settle(&mut self) {
        for _ in 0..1000 {
            if self.tick().await == TickStatus::Done {
                return;
            }
        }
        panic!("raid group never settled: {:?}",
               self.rg.conditions().iter().collect::<Vec<_>>());
    }

    /// Record of one chunk
    pub async fn chunk(&self, chunk: u64) -> ChunkInfo {
        let chunks = self.rg.needs_rebuild().chunks();
        let nonpaged = chunks.geometry().is_nonpaged_chunk(chunk);
        chunks.read_chunk_range(chunk, 1, nonpaged).await.unwrap()[0]
    }

    /// Does the RL mask agree with the checkpoint table?
    pub fn assert_rl_invariant(&self) {
        let np = self.rg.nonpaged();
        for p in self.rg.geometry().all_positions().iter() {
            let active = np.checkpoints.checkpoint(p)
                .is_some_and(|c| c != rgnr_core::END_MARKER);
            assert_eq!(np.rebuild_logging.contains(p), active,
                       "position {p}: {np:?}");
        }
    }
}

pub struct HarnessBuilder {
    raid_type: RaidType,
    width: u32,
    geometry: Option<Geometry>,
    role: SpRole,
    config: EngineConfig,
    md: Option<Arc<MemMetadata>>,
    peer: Arc<dyn PeerLink>,
    upstream: Option<Arc<dyn UpstreamEdge>>,
}

impl Default for HarnessBuilder {
    fn default() -> Self {
        HarnessBuilder {
            raid_type: RaidType::Raid5,
            width: 4,
            geometry: None,
            role: SpRole::Active,
            config: test_config(),
            md: None,
            peer: Arc::new(NoPeer),
            upstream: None,
        }
    }
}

impl HarnessBuilder {
    pub fn raid_type(mut self, raid_type: RaidType, width: u32) -> Self {
        self.raid_type = raid_type;
        self.width = width;
        self
    }

    pub fn geometry(mut self, geometry: Geometry) -> Self {
        self.geometry = Some(geometry);
        self
    }

    pub fn role(mut self, role: SpRole) -> Self {
        self.role = role;
        self
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Share metadata with another SP's raid group
    pub fn metadata(mut self, md: Arc<MemMetadata>) -> Self {
        self.md = Some(md);
        self
    }

    pub fn peer(mut self, peer: Arc<dyn PeerLink>) -> Self {
        self.peer = peer;
        self
    }

    pub fn upstream(mut self, upstream: Arc<dyn UpstreamEdge>) -> Self {
        self.upstream = Some(upstream);
        self
    }

    /// 10 chunks per disk, the last 2 for metadata
    pub async fn build(self) -> Harness {
        let cs = self.config.chunk_size;
        let geometry = self.geometry.unwrap_or_else(|| {
            self.config.geometry(self.raid_type, self.width, 8 * cs, 10 * cs)
                .unwrap()
        });
        let md = self.md.unwrap_or_else(|| Arc::new(MemMetadata::new()));
        let events = Arc::new(MemEventLog::new());
        let io = Arc::new(RecordingIo::default());
        let usurper = Arc::new(RecordingUsurper::default());
        let class = Arc::new(RaidGroupClassConfig::new(&self.config.emeh));
        let mut rg = RaidGroup::new(RaidGroupParams {
            id: RaidGroupId { number: 7, object_id: 0x107 },
            geometry,
            role: self.role,
            config: self.config,
            class,
            metadata: md.clone(),
            io: io.clone(),
            usurper: usurper.clone(),
            events: events.clone(),
            peer: self.peer,
            upstream: self.upstream,
        });
        rg.load().await.unwrap();
        Harness { rg, md, events, io, usurper }
    }
}

/// Tick two SPs' raid groups in turn until neither has anything left to do
pub async fn settle_pair(a: &mut Harness, b: &mut Harness) {
    let mut quiet = 0;
    for _ in 0..1000 {
        let sa = a.tick().await;
        let sb = b.tick().await;
        if sa == TickStatus::Done && sb == TickStatus::Done {
            quiet += 1;
            if quiet >= 2 {
                return;
            }
        } else {
            quiet = 0;
        }
    }
    panic!("raid groups never settled");
}
