//! Aggregate statistics over traced requests, served by the demo server.

pub mod collector;
pub mod percentiles;
pub mod stream;

pub use collector::{AllocationStats, DistBucket, StatsSnapshot, TypeTotal};
pub use percentiles::PercentileSet;
