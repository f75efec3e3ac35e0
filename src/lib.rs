//! Paces archival-rule boundaries for an external archival worker.
//!
//! Each auto-archive table carries an `id < N` rule term. The pacer sets `N`
//! to the oldest archivable id once, then raises it by a fixed step per pass,
//! handing each pass to the worker over HTTP and waiting on the worker's
//! Redis lock in between.

pub mod archive;
pub mod config;
pub mod db;
pub mod lock;
pub mod models;
pub mod observability;
pub mod trigger;
