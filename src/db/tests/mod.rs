//! Shared database repository test infrastructure
//!
//! The same test logic runs against the SQLite, PostgreSQL and MySQL implementations:
//!
//! - **Unit tests (SQLite)**: Fast, in-memory tests that run with every `cargo test`
//! - **Integration tests (PostgreSQL, MySQL)**: Slower tests using testcontainers, run with `cargo test -- --ignored`
//!
//! # Running tests
//!
//! ```bash
//! cargo test                       # Run fast SQLite tests only
//! cargo test -- --ignored          # Run PostgreSQL and MySQL integration tests (requires Docker)
//! cargo test -- --include-ignored  # Run all tests
//! ```
