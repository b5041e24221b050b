// vim: tw=80
//! Raid groups configured from YAML files

use std::io::Write;

use pretty_assertions::assert_eq;
use tempfile::NamedTempFile;

use rgnr_core::{
    Error,
    config::EngineConfig,
    emeh::EmehMode,
};

use crate::util::*;

fn config_file(contents: &str) -> NamedTempFile {
    let mut f = NamedTempFile::new().unwrap();
    f.write_all(contents.as_bytes()).unwrap();
    f
}

#[test]
fn load() {
    let f = config_file("
chunk_size: 4096
rebuild_chunks_per_io: 4
emeh:
  mode: Disabled
  increase_percent: 200
");
    let config = EngineConfig::load(f.path()).unwrap();
    assert_eq!(config.chunk_size, 4096);
    assert_eq!(config.rebuild_chunks_per_io, 4);
    assert_eq!(config.broken_wait_secs, 5);
    assert_eq!(config.emeh.mode, EmehMode::Disabled);
    assert_eq!(config.emeh.increase_percent, 200);
}

#[test]
fn load_missing() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rgnr.yaml");
    assert_eq!(EngineConfig::load(path), Err(Error::ENOENT));
}

#[test]
fn load_garbage() {
    let f = config_file("chunk_size: [1, 2]");
    assert_eq!(EngineConfig::load(f.path()), Err(Error::EINVAL));
}

/// Rebuild I/Os cover several chunks each
#[test_log::test(tokio::test)]
async fn chunks_per_io() {
    let f = config_file("chunk_size: 16\nrebuild_chunks_per_io: 4");
    let config = EngineConfig::load(f.path()).unwrap();
    let mut h = HarnessBuilder::default().config(config).build().await;
    h.rg.on_edge_state_change(1, down()).unwrap();
    h.settle().await;
    h.rg.on_edge_state_change(1, up()).unwrap();
    h.settle().await;
    assert!(h.rg.rebuild_logging().is_empty());
    assert_eq!(h.io.rebuilds(), vec![
        (mask(0b0010), 0, 64),
        (mask(0b0010), 64, 64),
        (mask(0b0010), 128, 32),
    ]);
}

/// A raid group is chunked by the configured chunk size
#[test_log::test(tokio::test)]
async fn chunk_size() {
    let config = EngineConfig::from_yaml("chunk_size: 32").unwrap();
    let mut h = HarnessBuilder::default().config(config).build().await;
    let geometry = *h.rg.geometry();
    assert_eq!(geometry.chunk_size(), 32);
    assert_eq!(geometry.chunk_index_for_lba(100), 3);
    assert_eq!(geometry.disk_capacity(), 320);

    h.rg.on_edge_state_change(2, down()).unwrap();
    h.settle().await;
    h.rg.on_edge_state_change(2, up()).unwrap();
    h.settle().await;
    assert!(h.rg.rebuild_logging().is_empty());
    let rebuilds = h.io.rebuilds();
    assert_eq!(rebuilds.len(), 10);
    assert_eq!(rebuilds[0], (mask(0b0100), 0, 32));
    assert_eq!(rebuilds[9], (mask(0b0100), 288, 32));
}

/// The class-wide EMEH mode comes from the configuration
#[test_log::test(tokio::test)]
async fn emeh_class_disabled() {
    let f = config_file("chunk_size: 16\nemeh:\n  mode: Disabled");
    let config = EngineConfig::load(f.path()).unwrap();
    let mut h = HarnessBuilder::default().config(config).build().await;
    assert_eq!(h.rg.emeh_mode(), EmehMode::Disabled);
    h.rg.on_edge_state_change(2, down()).unwrap();
    h.settle().await;
    assert!(h.usurper.commands().is_empty());
}
