use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};

/// Default part size: 64 KiB.
pub const DEFAULT_PART_SIZE: u64 = 64 * 1024;

/// Default number of cached files kept after a flush cycle.
pub const DEFAULT_CACHE_CAPACITY: usize = 256;

/// Default background flush period.
pub const DEFAULT_FLUSH_INTERVAL_MS: u64 = 5_000;

/// Configuration for a [`BlockStore`](crate::BlockStore).
///
/// The part size is fixed for the lifetime of a store; changing it requires
/// a fresh store over a fresh backend.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Bytes per part.
    pub part_size: u64,
    /// Clean cache entries beyond this count are evicted after each flush.
    pub cache_capacity: usize,
    pub flush: FlushConfig,
}

/// Background flush settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlushConfig {
    /// Run the periodic flusher. When false, dirty data is persisted only by
    /// an explicit flush or shutdown.
    pub enabled: bool,
    pub interval_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            part_size: DEFAULT_PART_SIZE,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            flush: FlushConfig::default(),
        }
    }
}

impl Default for FlushConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: DEFAULT_FLUSH_INTERVAL_MS,
        }
    }
}

impl StoreConfig {
    /// A config with the given part size and the background flusher off.
    pub fn manual_flush(part_size: u64) -> Self {
        Self {
            part_size,
            flush: FlushConfig {
                enabled: false,
                ..FlushConfig::default()
            },
            ..Self::default()
        }
    }

    pub fn from_toml_str(text: &str) -> StoreResult<Self> {
        let config: Self =
            toml::from_str(text).map_err(|e| StoreError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> StoreResult<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| StoreError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> StoreResult<()> {
        if self.part_size == 0 {
            return Err(StoreError::Config("part_size must be positive".into()));
        }
        if self.part_size > u64::from(u32::MAX) {
            return Err(StoreError::Config(format!(
                "part_size {} exceeds {}",
                self.part_size,
                u32::MAX
            )));
        }
        if self.flush.enabled && self.flush.interval_ms == 0 {
            return Err(StoreError::Config(
                "flush.interval_ms must be positive when flushing is enabled".into(),
            ));
        }
        Ok(())
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush.interval_ms)
    }
}
