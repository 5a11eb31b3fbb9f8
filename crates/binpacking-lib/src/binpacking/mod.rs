//! Binpacking efficiency computation
//!
//! Turns node and pod snapshots into allocated/allocatable figures per
//! node and for the whole cluster, honouring init container semantics.
//! Everything here is pure and leadership-agnostic.

mod aggregate;
mod request;


pub use aggregate::{aggregate, AggregateResult, ClusterAggregate, NodeAggregate};
pub use request::{effective_request, EffectiveRequest};
