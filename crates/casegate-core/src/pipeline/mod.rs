//! The durable stage pipeline.
//!
//! - [`stage`]: the `Stage` trait, its context/output types and `BoxStage`
//! - [`graph`]: the explicit `(state, guard) -> state` edge table
//! - [`qualification`], [`analysis`], [`review`]: the built-in stages
//! - [`ledger`]: the append-only decision ledger
//! - [`engine`]: drives runs one persisted step at a time

pub mod analysis;
pub mod engine;
pub mod graph;
pub mod ledger;
pub mod qualification;
pub mod review;
pub mod stage;
