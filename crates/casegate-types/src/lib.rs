//! Shared domain types for the casegate stage pipeline.
//!
//! Runs, their typed payload, decision ledger entries, HITL tickets, facility
//! profiles, engine configuration, and the storage error taxonomy.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod config;
pub mod error;
pub mod ledger;
pub mod run;
pub mod subject;
pub mod ticket;
