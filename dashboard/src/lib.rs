//! Live poll dashboard backend
//!
//! This crate keeps a local view of a set of live polls consistent
//! across three asynchronous sources: the initial bulk fetch, the
//! per-poll vote-check fan-out, and pushed authoritative snapshots,
//! plus the optimistic mutation applied when the local user votes.

pub mod config;
pub mod error;
pub mod ledger;
pub mod merger;
pub mod session;
pub mod store;
pub mod subscriptions;
pub mod view;

mod integration_test;

pub use error::{DashboardError, Result};
pub use merger::UpdateMerger;
