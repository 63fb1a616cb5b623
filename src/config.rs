//! Engine configuration. Loading a TOML file into this struct is a
//! CLI/bootstrap concern and stays out of scope; the engine only consumes an
//! already-parsed value.

use serde::{Deserialize, Serialize};

/// Tier placement thresholds, page/extent geometry, and the handful of other
/// knobs the engine is constructed with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Files strictly smaller than this go to the hot tier.
    pub hot_limit_bytes: u64,
    /// Files strictly smaller than this (and not hot) go to the warm tier;
    /// the rest go cold.
    pub warm_limit_bytes: u64,
    /// Bytes per extent page.
    pub page_size: u32,
    /// Pages packed per extent before a flush is forced.
    pub pages_per_extent: u32,
    /// Cumulative symlink-expansion budget per top-level operation.
    pub symlink_budget: u32,
    /// Default `highWaterMark` for read/write streams, in bytes.
    pub default_high_water_mark: usize,
    /// Milliseconds a VFS lock acquisition waits before failing `BUSY`.
    pub vfs_lock_timeout_ms: u64,
    /// Whether CAS objects are zstd-compressed before storage.
    pub cas_compression: bool,
    /// Root directory for the hot-tier backend.
    pub hot_root: String,
    /// Root directory for the warm-tier backend.
    pub warm_root: String,
    /// Root directory for the cold-tier backend.
    pub cold_root: String,
    /// Root directory for CAS objects.
    pub cas_root: String,
    /// Root directory for extent storage.
    pub extent_root: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            hot_limit_bytes: 1024 * 1024,
            warm_limit_bytes: 100 * 1024 * 1024,
            page_size: 4096,
            pages_per_extent: 500,
            symlink_budget: crate::resolver::MAX_SYMLINK_EXPANSIONS,
            default_high_water_mark: 64 * 1024,
            vfs_lock_timeout_ms: 5_000,
            cas_compression: false,
            hot_root: "hot".to_string(),
            warm_root: "warm".to_string(),
            cold_root: "cold".to_string(),
            cas_root: "objects".to_string(),
            extent_root: "extents".to_string(),
        }
    }
}

impl EngineConfig {
    /// Parse an `EngineConfig` from a TOML document. The engine never reads
    /// this from disk itself; a host binary owns that bootstrap step.
    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    pub fn max_extent_bytes(&self) -> u64 {
        self.page_size as u64 * self.pages_per_extent as u64
    }
}
