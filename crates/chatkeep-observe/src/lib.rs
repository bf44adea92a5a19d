//! Observability setup for chatkeep.

pub mod tracing_setup;
