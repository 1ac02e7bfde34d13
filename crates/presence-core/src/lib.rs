//! presence-core: Shared types and the session diff engine for the presence scanner.
//!
//! This crate provides the foundational pieces used by the store and the scanner:
//! - Device, Session, and Snapshot types
//! - The wall-clock timestamp format used for persisted times
//! - `reconcile`, the pure open/close/continue decision over a snapshot
//! - Common error types

pub mod error;
pub mod reconcile;
pub mod timestamp;
pub mod types;

pub use error::CoreError;
pub use reconcile::{reconcile, register_devices, Reconciliation, ReconcileSummary};
pub use types::{Device, DeviceId, NewSession, Observation, OpenSession, Session, Snapshot};
