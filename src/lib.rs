//! server-status - host metrics and endpoint reachability monitor.
//!
//! A background scheduler periodically collects host metrics and probes the
//! configured targets, then publishes the normalized result into a
//! [`cache::SnapshotCache`] that readers query without blocking.

pub mod cache;
pub mod config;
pub mod metrics;
pub mod model;
pub mod normalize;
pub mod probe;
pub mod scheduler;
pub mod web;
