//! Rackline Common - Shared types and utilities
//!
//! This crate provides common types, error definitions, configuration
//! and scheduling utilities used across all Rackline components.

pub mod config;
pub mod error;
pub mod gate;
pub mod schedule;
pub mod types;

pub use config::{
    DEFAULT_KEEP_COUNT, IntervalConfig, LogConfig, NodeConfig, RacklineConfig, ReplicaConfig,
};
pub use error::{Error, Result};
pub use gate::TaskGate;
pub use schedule::Schedule;
pub use types::*;
