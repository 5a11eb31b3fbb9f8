//! Binpacking metrics collection
//!
//! This module provides the pull-model collector that turns the current
//! node and pod snapshots into Prometheus samples on every scrape, along
//! with the snapshot source contracts it reads from and the cache sync
//! status used for the cache age metric and readiness.

mod binpacking;
mod source;
mod sync_info;


pub use binpacking::{BinpackingCollector, BinpackingMetric, Sample};
pub use source::{CacheError, NodeSource, WorkloadSource};
pub use sync_info::{CacheKind, SyncInfo};
