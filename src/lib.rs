//! GPU compute job broker.
//!
//! Accepts job requests over HTTP, gates them on a busy probe, queues the
//! overflow, and provisions accepted jobs on an Akash-style marketplace by
//! driving the `provider-services` CLI: deployment, lease, manifest, service
//! URI, then a delayed teardown once the paid lifetime elapses.

pub mod admission;
pub mod api;
pub mod config;
pub mod error;
pub mod exec;
pub mod job;
pub mod manifest;
pub mod market;
pub mod notify;
pub mod orchestrator;
pub mod queue;
pub mod teardown;
pub mod testing;
pub mod worker;
