//! Core type definitions for Rackline
//!
//! This module defines the fundamental types used throughout the system:
//! node roles, per-log metadata, segment identities and the replica
//! snapshot exchanged between primary and followers.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Reserved key under which a primary publishes its metadata database
/// identity inside a [`ReplicaSnapshot`].
pub const MAIN_DB_KEY: &str = "main-0";

/// Role of this node with respect to storage ownership.
///
/// A follower resolves reads through the primary's replica snapshot and
/// is forbidden from mutating metadata or rotating segments.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Primary,
    Follower,
}

impl Role {
    #[must_use]
    pub fn is_follower(self) -> bool {
        matches!(self, Self::Follower)
    }
}

impl Default for Role {
    fn default() -> Self {
        Self::Primary
    }
}

/// Per-log metadata: the index of the currently writable segment.
///
/// Created lazily on the first creating acquire of a log key and never
/// deleted afterwards.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogMeta {
    pub cur: u64,
}

/// Unique physical identity of a segment.
///
/// Generated once when the segment is created and stored inside it, so
/// the identity survives reopen and travels with replicated bytes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SegmentId([u8; 16]);

impl SegmentId {
    /// Generate a new random segment ID
    #[must_use]
    pub fn generate() -> Self {
        Self(*Uuid::new_v4().as_bytes())
    }

    /// Create from raw bytes
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// Get as bytes
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// Lowercase hex rendering, used as the physical key on the wire
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse a hex physical key back into an ID
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let mut bytes = [0u8; 16];
        hex::decode_to_slice(s, &mut bytes)?;
        Ok(Self(bytes))
    }
}

impl fmt::Debug for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SegmentId({})", self.to_hex())
    }
}

impl fmt::Display for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Snapshot mapping logical segment identity to physical key, published
/// by the primary and consumed read-only by followers.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaSnapshot {
    /// Rendezvous identifier for the shared replication swarm, if any
    pub discovery_key: Option<String>,
    /// `"<log_key>-<point>"` -> physical key hex
    pub segment_keys: HashMap<String, String>,
}

impl ReplicaSnapshot {
    /// Logical key under which a segment is published
    #[must_use]
    pub fn segment_key(log_key: &str, point: u64) -> String {
        format!("{log_key}-{point}")
    }

    /// Resolve a logical segment to its physical key, if mapped
    #[must_use]
    pub fn resolve(&self, log_key: &str, point: u64) -> Option<&str> {
        self.segment_keys
            .get(&Self::segment_key(log_key, point))
            .map(String::as_str)
    }
}

/// Retention window height for a given keep count: `ceil(keep * 1.5)`.
#[must_use]
pub fn max_height(keep_count: u64) -> u64 {
    (keep_count * 3).div_ceil(2)
}

/// Encode a millisecond timestamp as a fixed-width big-endian record key,
/// so lexicographic key order equals chronological order.
#[must_use]
pub fn encode_ts(ts: u64) -> [u8; 8] {
    ts.to_be_bytes()
}

/// Decode a big-endian record key back into a timestamp. Short keys
/// decode as zero rather than panicking.
#[must_use]
pub fn decode_ts(key: &[u8]) -> u64 {
    match <[u8; 8]>::try_from(key) {
        Ok(bytes) => u64::from_be_bytes(bytes),
        Err(_) => 0,
    }
}

/// Current wall-clock time in milliseconds since the Unix epoch.
#[must_use]
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}
