// vim: tw=80
//! Going broken, too many dead positions, virtual drives and failover

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use pretty_assertions::assert_eq;

use rgnr_core::{
    END_MARKER,
    checkpoint::create_checkpoint_data,
    cluster::{channel_pair, PeerLink, SpRole},
    condition::{LifecycleState, TickStatus},
    config::EngineConfig,
    edge::{PathAttributes, VirtualDriveConfig, VirtualDriveMode},
    event_log::EventId,
    geometry::{Geometry, RaidType},
    metadata::{MemMetadata, NonPagedInfo, NonPagedStore},
};

use crate::util::*;

/// Losing more positions than the redundancy waits out the broken window,
/// then gives up on the raid group.
#[test_log::test(tokio::test(start_paused = true))]
async fn too_many_dead_broken() {
    let mut h = HarnessBuilder::default().raid_type(RaidType::Raid6, 6)
        .build().await;
    h.rg.on_edge_state_change(0, down()).unwrap();
    h.rg.on_edge_state_change(1, down()).unwrap();
    h.settle().await;
    assert_eq!(h.rg.rebuild_logging(), mask(0b11));

    h.rg.on_edge_state_change(2, down()).unwrap();
    assert_eq!(h.tick().await, TickStatus::Pending);
    tokio::time::advance(Duration::from_secs(4)).await;
    assert_eq!(h.tick().await, TickStatus::Pending);
    assert_eq!(h.rg.rebuild_logging(), mask(0b11));

    tokio::time::advance(Duration::from_secs(1)).await;
    let outcome = h.rg.monitor_tick().await;
    assert!(!outcome.packet.is_success());
    assert_eq!(h.rg.lifecycle(), LifecycleState::Activate);
    h.settle().await;
    assert_eq!(h.rg.lifecycle(), LifecycleState::Fail);
    assert_eq!(h.events.find(EventId::RaidGroupBroken).len(), 1);
    assert!(h.events.find(EventId::PagedMetadataReconstructed).is_empty());
}

/// Leaked checkpoint slots leave no room for a newly failed position.  The
/// bookkeeping is rebuilt from scratch and the group carries on.
#[test_log::test(tokio::test)]
async fn too_many_dead_reconstruct() {
    let md = Arc::new(MemMetadata::new());
    let leaked = create_checkpoint_data(&NonPagedInfo::default(), END_MARKER,
                                        mask(0b1100)).unwrap();
    NonPagedStore::new(md.clone()).store(leaked).await.unwrap();
    let mut h = HarnessBuilder::default().metadata(md).build().await;

    h.rg.on_edge_state_change(0, down()).unwrap();
    let outcome = h.rg.monitor_tick().await;
    assert!(!outcome.packet.is_success());
    assert_eq!(h.rg.lifecycle(), LifecycleState::Activate);
    h.settle().await;

    assert_eq!(h.rg.lifecycle(), LifecycleState::Ready);
    assert_eq!(h.rg.rebuild_logging(), mask(0b0001));
    assert_eq!(h.rg.nonpaged().checkpoints.positions(), mask(0b0001));
    assert_eq!(h.rg.checkpoint(0), Some(0));
    assert!(h.rg.needs_rebuild().is_marked(0).await.unwrap());
    let ev = h.events.find(EventId::PagedMetadataReconstructed);
    assert_eq!(ev.len(), 1);
    assert_eq!(ev[0].positions, mask(0b0001));
    h.assert_rl_invariant();

    h.rg.on_edge_state_change(0, up()).unwrap();
    h.settle().await;
    assert!(h.rg.rebuild_logging().is_empty());
    assert!(h.rg.nonpaged().checkpoints.positions().is_empty());
}

/// Losing the last redundant position briefly doesn't break the group
#[test_log::test(tokio::test(start_paused = true))]
async fn transient_going_broken() {
    let config = EngineConfig { broken_wait_secs: 2, ..test_config() };
    let mut h = HarnessBuilder::default().config(config).build().await;
    h.rg.on_edge_state_change(0, down()).unwrap();
    h.rg.on_edge_state_change(1, down()).unwrap();
    assert_eq!(h.tick().await, TickStatus::Pending);
    tokio::time::advance(Duration::from_secs(1)).await;
    assert_eq!(h.tick().await, TickStatus::Pending);
    h.rg.on_edge_state_change(1, up()).unwrap();
    h.settle().await;
    assert_eq!(h.rg.rebuild_logging(), mask(0b0001));
    assert_eq!(h.rg.lifecycle(), LifecycleState::Ready);
}

/// The Active SP waits a while for the Passive SP to see the same failures
#[test_log::test(tokio::test(start_paused = true))]
async fn peer_disagrees() {
    let (a, b) = channel_pair();
    let md = Arc::new(MemMetadata::new());
    let mut active = HarnessBuilder::default()
        .metadata(md.clone())
        .peer(Arc::new(a))
        .build().await;
    let mut passive = HarnessBuilder::default()
        .role(SpRole::Passive)
        .metadata(md)
        .peer(Arc::new(b))
        .build().await;
    settle_pair(&mut active, &mut passive).await;

    // Only the Active SP lost its path to position 2
    active.rg.on_edge_state_change(2, down()).unwrap();
    for _ in 0..10 {
        active.tick().await;
        passive.tick().await;
    }
    assert!(active.rg.rebuild_logging().is_empty());
    tokio::time::advance(Duration::from_secs(5)).await;
    settle_pair(&mut active, &mut passive).await;
    assert_eq!(active.rg.rebuild_logging(), mask(0b0100));
    assert_eq!(passive.rg.rebuild_logging(), mask(0b0100));
}

/// The Passive SP takes over when its peer goes away
#[test_log::test(tokio::test)]
async fn failover() {
    let (a, b) = channel_pair();
    let md = Arc::new(MemMetadata::new());
    let a = Arc::new(a);
    let mut active = HarnessBuilder::default()
        .metadata(md.clone())
        .peer(a.clone())
        .build().await;
    let mut passive = HarnessBuilder::default()
        .role(SpRole::Passive)
        .metadata(md)
        .peer(Arc::new(b))
        .build().await;
    settle_pair(&mut active, &mut passive).await;
    drop(active);

    a.disconnect();
    assert!(!a.is_present());
    passive.rg.on_edge_state_change(1, down()).unwrap();
    passive.settle().await;
    assert!(passive.rg.rebuild_logging().is_empty());

    passive.rg.set_role(SpRole::Active);
    passive.settle().await;
    assert_eq!(passive.rg.rebuild_logging(), mask(0b0010));
    passive.rg.on_edge_state_change(1, up()).unwrap();
    passive.settle().await;
    assert!(passive.rg.rebuild_logging().is_empty());
    assert_eq!(passive.io.rebuilds().len(), 10);
}

mod virtual_drive {
    use super::*;
    use pretty_assertions::assert_eq;

    fn upstream(mode: VirtualDriveMode, attributes: PathAttributes)
        -> Arc<StaticUpstream>
    {
        Arc::new(StaticUpstream {
            attributes: Mutex::new(attributes),
            config: Mutex::new(Ok(VirtualDriveConfig {
                mode,
                job_in_progress: false
            })),
        })
    }

    async fn harness(upstream: Arc<StaticUpstream>) -> Harness {
        let geometry = Geometry::virtual_drive(16, 128, 160).unwrap();
        let mut h = HarnessBuilder::default()
            .geometry(geometry)
            .upstream(upstream)
            .build().await;
        h.rg.on_edge_state_change(0, down()).unwrap();
        h.settle().await;
        assert_eq!(h.rg.rebuild_logging(), mask(0b01));
        h.rg.on_edge_state_change(0, up()).unwrap();
        h.settle().await;
        h
    }

    /// The parent rebuilds a pass-through drive, so it stays degraded
    #[test_log::test(tokio::test)]
    async fn pass_thru() {
        let up = upstream(VirtualDriveMode::PassThruFirstEdge,
                          PathAttributes::DEGRADED_NEEDS_REBUILD);
        let h = harness(up).await;
        assert_eq!(h.rg.lifecycle(), LifecycleState::Ready);
        assert_eq!(h.rg.rebuild_logging(), mask(0b01));
        assert!(h.io.rebuilds().is_empty());
        assert!(h.rg.needs_rebuild().is_marked(0).await.unwrap());
    }

    /// Nobody upstream wants the position rebuilt
    #[test_log::test(tokio::test)]
    async fn pass_thru_not_needed_upstream() {
        let up = upstream(VirtualDriveMode::PassThruFirstEdge,
                          PathAttributes::empty());
        let h = harness(up).await;
        assert_eq!(h.rg.lifecycle(), LifecycleState::Fail);
        assert_eq!(h.events.find(EventId::RaidGroupBroken).len(), 1);
    }

    /// A sparing job is reconfiguring the drive
    #[test_log::test(tokio::test)]
    async fn job_in_progress() {
        let up = upstream(VirtualDriveMode::PassThruFirstEdge,
                          PathAttributes::DEGRADED_NEEDS_REBUILD);
        up.config.lock().unwrap().as_mut().unwrap().job_in_progress = true;
        let h = harness(up).await;
        assert_eq!(h.rg.lifecycle(), LifecycleState::Fail);
    }

    /// A mirroring virtual drive rebuilds itself
    #[test_log::test(tokio::test)]
    async fn mirror() {
        let up = upstream(VirtualDriveMode::MirrorFirstEdge,
                          PathAttributes::empty());
        let h = harness(up).await;
        assert_eq!(h.rg.lifecycle(), LifecycleState::Ready);
        assert!(h.rg.rebuild_logging().is_empty());
        assert_eq!(h.io.rebuilds().len(), 10);
    }
}
