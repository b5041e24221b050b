// vim: tw=80
//! Degrade and rebuild whole raid groups

use pretty_assertions::assert_eq;

use rgnr_core::{
    Error,
    END_MARKER,
    event_log::EventId,
    geometry::RaidType,
};

use crate::util::*;

/// One position drops, comes back, and is rebuilt chunk by chunk
#[test_log::test(tokio::test)]
async fn one_position() {
    let mut h = HarnessBuilder::default().build().await;
    h.rg.on_edge_state_change(2, down()).unwrap();
    h.settle().await;
    assert_eq!(h.rg.rebuild_logging(), mask(0b0100));
    assert_eq!(h.rg.checkpoint(2), Some(0));
    h.assert_rl_invariant();

    h.rg.on_edge_state_change(2, up()).unwrap();
    let mut seen = vec![h.rg.checkpoint(2)];
    while !h.rg.rebuild_logging().is_empty() {
        h.tick().await;
        let cp = h.rg.checkpoint(2);
        if seen.last() != Some(&cp) {
            seen.push(cp);
            if let Some(c) = cp {
                if c > 0 {
                    // The chunk just behind the checkpoint is clean
                    let info = h.chunk(c / 16 - 1).await;
                    assert!(!info.needs_rebuild.contains(2));
                    assert_eq!(info.verify_bits, 0);
                }
            }
        }
    }
    let mut expected = (0..=10).map(|i| Some(i * 16)).collect::<Vec<_>>();
    expected.push(None);
    assert_eq!(seen, expected);
    h.settle().await;

    assert!(h.rg.rebuild_logging().is_empty());
    assert!(h.rg.nonpaged().checkpoints.positions().is_empty());
    assert!(!h.rg.needs_rebuild().is_marked(2).await.unwrap());
    let rebuilds = h.io.rebuilds();
    assert_eq!(rebuilds.len(), 10);
    for (i, (positions, lba, blocks)) in rebuilds.into_iter().enumerate() {
        assert_eq!(positions, mask(0b0100));
        assert_eq!(lba, i as u64 * 16);
        assert_eq!(blocks, 16);
    }
    let started = h.events.find(EventId::RebuildStarted);
    assert_eq!(started.len(), 1);
    let completed = h.events.find(EventId::RebuildCompleted);
    assert_eq!(completed.len(), 1);
    assert_eq!(completed[0].positions, mask(0b0100));
    assert_eq!(completed[0].data, 160);
    assert_eq!(h.events.find(EventId::RebuildLoggingStopped).len(), 1);
}

/// Writes while degraded leave the RL position's marks alone
#[test_log::test(tokio::test)]
async fn clear_respects_rebuild_logging() {
    let mut h = HarnessBuilder::default().raid_type(RaidType::Raid6, 5)
        .build().await;
    h.rg.on_edge_state_change(0, down()).unwrap();
    h.settle().await;
    let nr = h.rg.needs_rebuild();
    nr.mark_nr_for_positions(mask(0b00011), 0, 32).await.unwrap();
    nr.clear_nr_for_range(0, 32, h.rg.rebuild_logging()).await.unwrap();
    for chunk in 0..2 {
        assert_eq!(h.chunk(chunk).await.needs_rebuild, mask(0b00001));
    }
}

/// The lagging position catches up before both rebuild together
#[test_log::test(tokio::test)]
async fn two_positions() {
    let mut h = HarnessBuilder::default().raid_type(RaidType::Raid6, 6)
        .build().await;
    h.rg.on_edge_state_change(1, down()).unwrap();
    h.settle().await;
    h.rg.on_edge_state_change(1, up()).unwrap();
    // Rebuild part of position 1
    while h.rg.checkpoint(1).unwrap() < 64 {
        h.tick().await;
    }
    h.rg.on_edge_state_change(4, down()).unwrap();
    while !h.rg.rebuild_logging().contains(4) {
        h.tick().await;
    }
    assert_eq!(h.rg.rebuild_logging(), mask(0b01_0010));
    assert_eq!(h.rg.checkpoint(1), Some(64));
    h.rg.on_edge_state_change(4, up()).unwrap();
    let mut last = [0, 0];
    while !h.rg.rebuild_logging().is_empty() {
        h.tick().await;
        h.assert_rl_invariant();
        for (i, p) in [1, 4].into_iter().enumerate() {
            let cp = h.rg.checkpoint(p).unwrap_or(END_MARKER);
            assert!(cp >= last[i], "checkpoint went backwards");
            last[i] = cp;
        }
    }
    let rebuilds = h.io.rebuilds();
    // Position 4 alone until it reaches position 1
    assert!(rebuilds.iter().any(|r| r.0 == mask(0b01_0000)));
    assert_eq!(rebuilds.last().unwrap().0, mask(0b01_0010));
    assert_eq!(h.events.find(EventId::RebuildCompleted).len(), 2);
}

/// A deferred permit leaves the checkpoint where it was
#[test_log::test(tokio::test)]
async fn permit_deferred() {
    let mut h = HarnessBuilder::default().build().await;
    h.rg.on_edge_state_change(3, down()).unwrap();
    h.settle().await;
    h.io.defer_next(3);
    h.rg.on_edge_state_change(3, up()).unwrap();
    for _ in 0..8 {
        h.tick().await;
    }
    assert_eq!(h.io.rebuilds().len(), 3);
    h.settle().await;
    assert!(h.rg.rebuild_logging().is_empty());
    assert_eq!(h.io.rebuilds().len(), 10);
}

/// A failed rebuild I/O is retried from the same checkpoint
#[test_log::test(tokio::test)]
async fn io_failure() {
    let mut h = HarnessBuilder::default().build().await;
    h.rg.on_edge_state_change(0, down()).unwrap();
    h.settle().await;
    h.rg.on_edge_state_change(0, up()).unwrap();
    while h.rg.checkpoint(0) != Some(32) {
        h.tick().await;
    }
    h.io.fail_next(Error::EIO);
    let outcome = h.rg.monitor_tick().await;
    assert!(!outcome.packet.is_success());
    assert_eq!(h.rg.checkpoint(0), Some(32));
    h.settle().await;
    assert!(h.rg.rebuild_logging().is_empty());
    assert!(h.io.rebuilds().iter().all(|r| r.0 == mask(0b0001)));
}

/// Dropping again mid-rebuild restarts the position from zero
#[test_log::test(tokio::test)]
async fn drop_mid_rebuild() {
    let mut h = HarnessBuilder::default().build().await;
    h.rg.on_edge_state_change(1, down()).unwrap();
    h.settle().await;
    h.rg.on_edge_state_change(1, up()).unwrap();
    while h.rg.checkpoint(1) != Some(80) {
        h.tick().await;
    }
    h.rg.on_edge_state_change(1, down()).unwrap();
    h.settle().await;
    assert_eq!(h.rg.checkpoint(1), Some(0));
    assert_eq!(h.rg.nonpaged().checkpoints.blocks_rebuilt(1), Some(0));
    h.assert_rl_invariant();
    h.rg.on_edge_state_change(1, up()).unwrap();
    h.settle().await;
    assert!(h.rg.rebuild_logging().is_empty());
    assert_eq!(h.io.rebuilds().len(), 15);
}

/// Failed I/O to a position whose edge stays up still starts rebuild logging
#[test_log::test(tokio::test)]
async fn failed_io() {
    let mut h = HarnessBuilder::default().build().await;
    h.rg.report_failed_io(2);
    h.settle().await;
    assert_eq!(h.rg.rebuild_logging(), mask(0b0100));
    // Nothing rebuilds until the position is known good again
    assert!(h.io.rebuilds().is_empty());
    h.rg.on_edge_state_change(2, up()).unwrap();
    h.settle().await;
    assert!(h.rg.rebuild_logging().is_empty());
}
