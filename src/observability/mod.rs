//! Structured logging setup.
//!
//! Console output in pretty, compact or JSON form, filtered by the configured
//! level or `RUST_LOG`.

mod tracing_init;

pub use tracing_init::*;
