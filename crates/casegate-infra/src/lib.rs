//! Infrastructure layer for casegate.
//!
//! Contains implementations of the repository traits defined in
//! `casegate-core` (SQLite storage) and the `config.toml` loader.

pub mod config;
pub mod sqlite;
