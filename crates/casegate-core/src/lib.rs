//! Stage-pipeline engine and repository trait definitions for casegate.
//!
//! This crate defines the "ports" (repository traits) that the infrastructure
//! layer implements, plus the engine that drives a run through qualification,
//! analysis and human review. It depends only on `casegate-types` -- never on
//! `casegate-infra` or any database/IO crate.

pub mod pipeline;
pub mod repository;
