//! Core domain types for presence tracking.
//!
//! Devices are the long-lived entities, sessions record contiguous presence,
//! and snapshots carry the result of a single probe between the scanner and
//! the store.

use std::collections::BTreeMap;
use std::fmt;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

// ── Device ────────────────────────────────────────────────────────

/// Stable hardware identifier of a device (normally a lowercase MAC address).
///
/// Ordering is plain string ordering; it drives placeholder numbering when
/// several unknown devices show up in the same snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct DeviceId(pub String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for DeviceId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// A device that has been observed at least once.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Device {
    pub id: DeviceId,
    /// Human-assignable label. Starts as `new_user_<n>` and is never rewritten
    /// by scanning.
    pub label: String,
}

impl Device {
    /// Label given to the `n`th device ever registered in a store.
    pub fn placeholder_label(n: usize) -> String {
        format!("new_user_{n}")
    }
}

// ── Session ───────────────────────────────────────────────────────

/// One contiguous interval of observed presence.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Session {
    pub device_id: DeviceId,
    pub address: String,
    pub entered_at: NaiveDateTime,
    /// `None` while the device is presumed present.
    pub exited_at: Option<NaiveDateTime>,
}

impl Session {
    pub fn is_open(&self) -> bool {
        self.exited_at.is_none()
    }
}

/// A session with no exit time, as read back at the start of reconciliation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenSession {
    pub device_id: DeviceId,
    pub address: String,
    pub entered_at: NaiveDateTime,
}

/// A session to be created by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSession {
    pub device_id: DeviceId,
    pub address: String,
    pub entered_at: NaiveDateTime,
}

// ── Snapshot ──────────────────────────────────────────────────────

/// Where a device answered from, and when.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Observation {
    pub address: String,
    pub captured_at: NaiveDateTime,
}

/// Every device that answered during one probe.
///
/// Keys are unique by construction; inserting the same device twice keeps
/// the later observation.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Snapshot {
    observations: BTreeMap<DeviceId, Observation>,
}

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(
        &mut self,
        device_id: impl Into<DeviceId>,
        address: impl Into<String>,
        captured_at: NaiveDateTime,
    ) {
        self.observations.insert(
            device_id.into(),
            Observation {
                address: address.into(),
                captured_at,
            },
        );
    }

    pub fn get(&self, device_id: &DeviceId) -> Option<&Observation> {
        self.observations.get(device_id)
    }

    pub fn contains(&self, device_id: &DeviceId) -> bool {
        self.observations.contains_key(device_id)
    }

    /// Observations in device-id order.
    pub fn iter(&self) -> impl Iterator<Item = (&DeviceId, &Observation)> {
        self.observations.iter()
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }
}

impl FromIterator<(DeviceId, Observation)> for Snapshot {
    fn from_iter<I: IntoIterator<Item = (DeviceId, Observation)>>(iter: I) -> Self {
        Self {
            observations: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timestamp;

    #[test]
    fn test_placeholder_label() {
        assert_eq!(Device::placeholder_label(0), "new_user_0");
        assert_eq!(Device::placeholder_label(12), "new_user_12");
    }

    #[test]
    fn test_snapshot_keeps_last_observation_per_device() {
        let t1 = timestamp::parse("2024-03-01 10:00:00").unwrap();
        let t2 = timestamp::parse("2024-03-01 10:00:05").unwrap();

        let mut snap = Snapshot::new();
        snap.insert("aa:aa:aa:aa:aa:aa", "10.0.0.1", t1);
        snap.insert("aa:aa:aa:aa:aa:aa", "10.0.0.9", t2);

        assert_eq!(snap.len(), 1);
        let obs = snap.get(&DeviceId::from("aa:aa:aa:aa:aa:aa")).unwrap();
        assert_eq!(obs.address, "10.0.0.9");
        assert_eq!(obs.captured_at, t2);
    }

    #[test]
    fn test_snapshot_iterates_in_id_order() {
        let t = timestamp::parse("2024-03-01 10:00:00").unwrap();
        let mut snap = Snapshot::new();
        snap.insert("ff:ff:ff:ff:ff:ff", "10.0.0.3", t);
        snap.insert("00:11:22:33:44:55", "10.0.0.2", t);

        let ids: Vec<_> = snap.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["00:11:22:33:44:55", "ff:ff:ff:ff:ff:ff"]);
    }

    #[test]
    fn test_device_id_serializes_as_plain_string() {
        let json = serde_json::to_string(&DeviceId::from("aa:bb:cc:dd:ee:ff")).unwrap();
        assert_eq!(json, "\"aa:bb:cc:dd:ee:ff\"");
    }

    #[test]
    fn test_session_is_open() {
        let t = timestamp::parse("2024-03-01 10:00:00").unwrap();
        let mut session = Session {
            device_id: DeviceId::from("a"),
            address: "10.0.0.1".to_string(),
            entered_at: t,
            exited_at: None,
        };
        assert!(session.is_open());
        session.exited_at = Some(t);
        assert!(!session.is_open());
    }
}
