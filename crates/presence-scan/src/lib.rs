//! presence-scan: Periodic presence scanner for a local network segment.
//!
//! Runs an ARP ping sweep through nmap, folds each snapshot into the
//! session store, and repeats on a fixed period until cancelled.

pub mod config;
pub mod error;
pub mod nmap_xml;
pub mod prober;
pub mod scheduler;
