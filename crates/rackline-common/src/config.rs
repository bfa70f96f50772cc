//! Configuration types for Rackline
//!
//! This module defines configuration structures used across components.

use crate::types::{Role, max_height};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Keep count assumed when retention is left unconfigured. Retention
/// eviction itself only runs when a keep count is configured, but the
/// snapshot and query window still need a height.
pub const DEFAULT_KEEP_COUNT: u64 = 3;

/// Root configuration for a Rackline node
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RacklineConfig {
    /// Node identity and role
    pub node: NodeConfig,
    /// Segmented log store tuning
    pub log: LogConfig,
    /// Replication configuration
    pub replica: ReplicaConfig,
    /// Background task intervals
    pub intervals: IntervalConfig,
}

impl Default for RacklineConfig {
    fn default() -> Self {
        Self {
            node: NodeConfig::default(),
            log: LogConfig::default(),
            replica: ReplicaConfig::default(),
            intervals: IntervalConfig::default(),
        }
    }
}

/// Node identity configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Node name (human-readable identifier)
    pub name: String,
    /// Data directory for the metadata database and segment files
    pub data_dir: PathBuf,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            name: "rackline-node".to_string(),
            data_dir: PathBuf::from("/var/lib/rackline"),
        }
    }
}

/// Segmented log store configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct LogConfig {
    /// Seal the live segment once it reaches this many records.
    /// Rotation is disabled when unset.
    pub rotate_max_len: Option<u64>,
    /// Number of most-recent segments to retain per log key.
    /// Retention eviction is disabled when unset.
    pub keep_count: Option<u64>,
}

impl LogConfig {
    /// Retention window height: `ceil(keep_count * 1.5)`
    #[must_use]
    pub fn max_height(&self) -> u64 {
        max_height(self.keep_count.unwrap_or(DEFAULT_KEEP_COUNT))
    }
}

/// Replication configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ReplicaConfig {
    /// Role of this node
    pub role: Role,
    /// Control-channel identity of the primary; a follower only
    /// refreshes its snapshot when this is set
    pub rpc_public_key: Option<String>,
    /// Rendezvous identifier this primary publishes in its snapshot
    pub discovery_key: Option<String>,
}

/// Background task intervals, in milliseconds
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IntervalConfig {
    /// Rotation sweep interval
    pub rotate_ms: u64,
    /// Cache refresh / retention eviction interval
    pub cache_refresh_ms: u64,
    /// Replica snapshot refresh interval (followers)
    pub replica_refresh_ms: u64,
}

impl Default for IntervalConfig {
    fn default() -> Self {
        Self {
            rotate_ms: 120_000,
            cache_refresh_ms: 60_000,
            replica_refresh_ms: 30_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_config_height_defaults() {
        let log = LogConfig::default();
        assert_eq!(log.max_height(), 5);

        let log = LogConfig {
            keep_count: Some(4),
            rotate_max_len: None,
        };
        assert_eq!(log.max_height(), 6);
    }

    #[test]
    fn test_config_serde_roundtrip() {
        let config = RacklineConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let back: RacklineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.intervals.rotate_ms, 120_000);
        assert_eq!(back.replica.role, Role::Primary);
    }
}
