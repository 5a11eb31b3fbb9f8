//! Binpacking library for the cluster binpacking exporter
//!
//! This crate provides the core functionality for:
//! - Effective request calculation and node/cluster aggregation
//! - Pull-model Prometheus collection from node and pod caches
//! - Kubernetes reflector caches
//! - Lease-based leader election
//! - Health checks and observability

pub mod binpacking;
pub mod cache;
pub mod collector;
pub mod duration;
pub mod health;
pub mod leader;
pub mod models;
pub mod observability;
pub mod quantity;

pub use collector::{BinpackingCollector, CacheError, CacheKind, SyncInfo};
pub use health::{LivenessResponse, ReadinessResponse, SyncStatusResponse};
pub use models::*;
pub use observability::{ExporterMetrics, StructuredLogger};
pub use quantity::{Quantity, QuantityError};
