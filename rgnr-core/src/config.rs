// vim: tw=80
//! Engine configuration, and the class-wide settings shared by every raid
//! group

use std::{
    fs,
    path::Path,
    sync::atomic::{AtomicU32, Ordering},
    time::Duration,
};

use serde_derive::{Deserialize, Serialize};

use crate::{
    emeh::{EmehMode, EmehParams, ThresholdIncrease, DEFAULT_INCREASE},
    geometry::{Geometry, RaidType},
    types::*,
};

/// Default chunk size, in blocks
pub const DEFAULT_CHUNK_SIZE: u64 = 2048;

/// Default broken-raid-group deferral window, in seconds
pub const DEFAULT_BROKEN_WAIT_SECS: u64 = 5;

/// Class-wide EMEH defaults
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct EmehClassDefaults {
    pub mode: EmehMode,
    /// Percentage by which to raise thresholds.  0 means the built-in
    /// default.
    pub increase_percent: u16,
}

impl Default for EmehClassDefaults {
    fn default() -> Self {
        EmehClassDefaults {
            mode: EmehMode::EnabledNormal,
            increase_percent: DEFAULT_INCREASE
        }
    }
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Chunk size in blocks, for newly bound raid groups
    pub chunk_size: u64,
    /// How long to defer rebuild logging that would break a raid group
    pub broken_wait_secs: u64,
    /// How many chunks one rebuild I/O may cover
    pub rebuild_chunks_per_io: u32,
    pub emeh: EmehClassDefaults,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            chunk_size: DEFAULT_CHUNK_SIZE,
            broken_wait_secs: DEFAULT_BROKEN_WAIT_SECS,
            rebuild_chunks_per_io: 1,
            emeh: EmehClassDefaults::default(),
        }
    }
}

impl EngineConfig {
    pub fn from_yaml(s: &str) -> Result<Self> {
        let config: EngineConfig = serde_yaml_ng::from_str(s)
            .map_err(|e| {
                tracing::error!("invalid engine configuration: {e}");
                Error::EINVAL
            })?;
        config.validate()?;
        Ok(config)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let s = fs::read_to_string(path)?;
        Self::from_yaml(&s)
    }

    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml_ng::to_string(self).map_err(|_| Error::EINVAL)
    }

    fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 || self.rebuild_chunks_per_io == 0 {
            tracing::error!(chunk_size = self.chunk_size,
                rebuild_chunks_per_io = self.rebuild_chunks_per_io,
                "chunk sizes must be nonzero");
            return Err(Error::EINVAL);
        }
        if !self.emeh.mode.is_configurable() {
            tracing::error!(mode = ?self.emeh.mode,
                "EMEH class mode must be EnabledNormal or Disabled");
            return Err(Error::EINVAL);
        }
        Ok(())
    }

    pub fn broken_wait(&self) -> Duration {
        Duration::from_secs(self.broken_wait_secs)
    }

    /// Geometry of a newly bound raid group, divided into chunks of
    /// `chunk_size` blocks
    pub fn geometry(&self, raid_type: RaidType, width: u32,
                    exported_capacity: LbaT, disk_capacity: LbaT)
        -> Result<Geometry>
    {
        Geometry::new(raid_type, width, self.chunk_size, exported_capacity,
                      disk_capacity)
    }
}

/// Settings shared by every raid group of the class.
///
/// Loaded once at service start and changed only by administrative calls.
#[derive(Debug)]
pub struct RaidGroupClassConfig {
    default_mode: EmehMode,
    /// Current class-wide [`EmehParams`] in persisted form
    params: AtomicU32,
}

impl RaidGroupClassConfig {
    pub fn new(defaults: &EmehClassDefaults) -> Self {
        let params = EmehParams {
            mode: defaults.mode,
            increase: ThresholdIncrease::from(defaults.increase_percent)
        };
        RaidGroupClassConfig {
            default_mode: defaults.mode,
            params: AtomicU32::new(params.to_bits())
        }
    }

    pub fn default_mode(&self) -> EmehMode {
        self.default_mode
    }

    pub fn params(&self) -> EmehParams {
        EmehParams::from_bits(self.params.load(Ordering::Acquire))
    }

    fn modify<F: Fn(&mut EmehParams)>(&self, f: F) {
        let _ = self.params.fetch_update(Ordering::AcqRel, Ordering::Acquire,
            |bits| {
                let mut params = EmehParams::from_bits(bits);
                f(&mut params);
                Some(params.to_bits())
            });
    }

    pub fn current_mode(&self) -> EmehMode {
        self.params().mode
    }

    pub fn set_current_mode(&self, mode: EmehMode) -> Result<()> {
        if !mode.is_configurable() {
            return Err(Error::EINVAL);
        }
        tracing::debug!(?mode, "class EMEH mode");
        self.modify(|p| p.mode = mode);
        Ok(())
    }

    /// Effective class-wide threshold increase
    pub fn increase_percent(&self) -> u16 {
        self.params().increase.percent_or(DEFAULT_INCREASE)
    }

    pub fn set_increase_percent(&self, percent: u16) {
        self.modify(|p| p.increase = ThresholdIncrease::from(percent));
    }
}

impl Default for RaidGroupClassConfig {
    fn default() -> Self {
        Self::new(&EmehClassDefaults::default())
    }
}

// LCOV_EXCL_STOP
