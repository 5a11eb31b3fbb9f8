//! Cluster binpacking exporter service
//!
//! Configuration loading and the HTTP surface, shared by the binary and
//! its integration tests.

pub mod api;
pub mod config;
