//! Relay engine mirroring ETH deposits and BASE burns onto the opposite chain.
//!
//! Two pipelines, one per source chain, poll their bridge contract for events,
//! relay each one through an idempotent ledger and advance a per-chain
//! checkpoint once every event in the window has been resolved.

pub mod adapters;
pub mod api;
pub mod checkpoint;
pub mod config;
pub mod contracts;
pub mod db;
pub mod error;
pub mod ledger;
pub mod metrics;
pub mod types;
pub mod watchers;
pub mod writers;

#[cfg(test)]
pub(crate) mod testing;
