//! Observability setup for casegate.
//!
//! Library crates only emit `tracing` events; binaries call
//! [`tracing_setup::init_tracing`] once at startup.

pub mod tracing_setup;
