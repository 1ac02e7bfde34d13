//! presence-store: SQLite persistence for devices and presence sessions.
//!
//! This crate is the single mutation point for the session log. Every write
//! goes through `SessionStore::apply`, which runs the whole
//! read-reconcile-write sequence under one lock and one transaction.

pub mod client;
pub mod mutations;
pub mod queries;
pub mod schema;

pub use client::{SessionStore, StoreError};
pub use mutations::ApplyOutcome;
pub use queries::SessionFilter;
