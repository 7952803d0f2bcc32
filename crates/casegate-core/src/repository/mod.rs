//! Repository trait definitions (ports).
//!
//! These traits define the storage interface that the infrastructure layer
//! (casegate-infra) implements. An in-memory implementation lives alongside
//! them for embedding and tests.

pub mod memory;
pub mod run;
pub mod subject;
