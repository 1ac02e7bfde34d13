//! Change detection: compare the sessions that are currently open against the
//! latest snapshot and decide which sessions close, continue, or open.
//!
//! Everything here is a pure function of its inputs. The store runs it inside
//! its write transaction.

use std::collections::{BTreeSet, HashSet};

use chrono::NaiveDateTime;

use crate::types::{Device, DeviceId, NewSession, OpenSession, Snapshot};

/// The outcome of reconciling open sessions against a snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciliation {
    /// Devices whose open session must receive `exit = closed_at`.
    pub to_close: Vec<DeviceId>,
    /// Devices still present; their open session is left untouched.
    pub to_continue: Vec<DeviceId>,
    /// Sessions to create, in device-id order.
    pub to_open: Vec<NewSession>,
    /// The exit time for every closed session.
    pub closed_at: NaiveDateTime,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub opened: u32,
    pub closed: u32,
    pub continued: u32,
}

impl Reconciliation {
    pub fn summary(&self) -> ReconcileSummary {
        ReconcileSummary {
            opened: self.to_open.len() as u32,
            closed: self.to_close.len() as u32,
            continued: self.to_continue.len() as u32,
        }
    }

    pub fn is_noop(&self) -> bool {
        self.to_open.is_empty() && self.to_close.is_empty()
    }
}

/// Diff the currently open sessions against `snapshot`.
///
/// A device that stays visible keeps its existing session even if its address
/// changed between probes. Duplicate open sessions for one device (which the
/// store forbids) collapse to a single entry.
pub fn reconcile(
    open_sessions: &[OpenSession],
    snapshot: &Snapshot,
    now: NaiveDateTime,
) -> Reconciliation {
    let open_ids: BTreeSet<&DeviceId> = open_sessions.iter().map(|s| &s.device_id).collect();

    let mut to_close = Vec::new();
    let mut to_continue = Vec::new();

    for id in &open_ids {
        if snapshot.contains(id) {
            to_continue.push((*id).clone());
        } else {
            to_close.push((*id).clone());
        }
    }

    let to_open = snapshot
        .iter()
        .filter(|(id, _)| !open_ids.contains(id))
        .map(|(id, obs)| NewSession {
            device_id: id.clone(),
            address: obs.address.clone(),
            entered_at: obs.captured_at,
        })
        .collect();

    Reconciliation {
        to_close,
        to_continue,
        to_open,
        closed_at: now,
    }
}

/// Devices among `to_open` that the store has never seen, with their labels.
///
/// Numbering starts at the number of known devices and follows device-id
/// order, so the same inputs always yield the same labels.
pub fn register_devices(known: &HashSet<DeviceId>, to_open: &[NewSession]) -> Vec<Device> {
    let unknown: BTreeSet<&DeviceId> = to_open
        .iter()
        .map(|s| &s.device_id)
        .filter(|id| !known.contains(*id))
        .collect();

    unknown
        .into_iter()
        .enumerate()
        .map(|(i, id)| Device {
            id: id.clone(),
            label: Device::placeholder_label(known.len() + i),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timestamp;

    fn ts(s: &str) -> NaiveDateTime {
        timestamp::parse(s).unwrap()
    }

    fn open(id: &str, address: &str, entered: &str) -> OpenSession {
        OpenSession {
            device_id: DeviceId::from(id),
            address: address.to_string(),
            entered_at: ts(entered),
        }
    }

    fn ids(list: &[DeviceId]) -> Vec<&str> {
        list.iter().map(DeviceId::as_str).collect()
    }

    #[test]
    fn test_first_snapshot_opens_everything() {
        let t1 = ts("2024-05-01 09:00:00");
        let mut snap = Snapshot::new();
        snap.insert("a", "10.0.0.1", t1);

        let r = reconcile(&[], &snap, t1);
        assert!(r.to_close.is_empty());
        assert!(r.to_continue.is_empty());
        assert_eq!(
            r.to_open,
            vec![NewSession {
                device_id: DeviceId::from("a"),
                address: "10.0.0.1".to_string(),
                entered_at: t1,
            }]
        );
    }

    #[test]
    fn test_absent_devices_close_at_now() {
        let t2 = ts("2024-05-01 09:01:00");
        let open_sessions = vec![open("a", "10.0.0.1", "2024-05-01 09:00:00")];

        let r = reconcile(&open_sessions, &Snapshot::new(), t2);
        assert_eq!(ids(&r.to_close), vec!["a"]);
        assert_eq!(r.closed_at, t2);
        assert!(r.to_open.is_empty());
    }

    #[test]
    fn test_address_change_continues_existing_session() {
        let t2 = ts("2024-05-01 09:01:00");
        let open_sessions = vec![open("a", "10.0.0.1", "2024-05-01 09:00:00")];
        let mut snap = Snapshot::new();
        snap.insert("a", "10.0.0.2", t2);
        snap.insert("b", "10.0.0.5", t2);

        let r = reconcile(&open_sessions, &snap, t2);
        assert_eq!(ids(&r.to_continue), vec!["a"]);
        assert!(r.to_close.is_empty());
        assert_eq!(r.to_open.len(), 1);
        assert_eq!(r.to_open[0].device_id.as_str(), "b");
        assert_eq!(r.to_open[0].entered_at, t2);
    }

    #[test]
    fn test_partition_is_sorted_and_disjoint() {
        let t = ts("2024-05-01 10:00:00");
        let open_sessions = vec![
            open("d", "10.0.0.4", "2024-05-01 09:00:00"),
            open("b", "10.0.0.2", "2024-05-01 09:00:00"),
            open("c", "10.0.0.3", "2024-05-01 09:00:00"),
        ];
        let mut snap = Snapshot::new();
        snap.insert("e", "10.0.0.5", t);
        snap.insert("c", "10.0.0.3", t);
        snap.insert("a", "10.0.0.1", t);

        let r = reconcile(&open_sessions, &snap, t);
        assert_eq!(ids(&r.to_close), vec!["b", "d"]);
        assert_eq!(ids(&r.to_continue), vec!["c"]);
        let opened: Vec<_> = r.to_open.iter().map(|s| s.device_id.as_str()).collect();
        assert_eq!(opened, vec!["a", "e"]);
        assert_eq!(
            r.summary(),
            ReconcileSummary {
                opened: 2,
                closed: 2,
                continued: 1
            }
        );
    }

    #[test]
    fn test_duplicate_open_sessions_collapse() {
        let t = ts("2024-05-01 10:00:00");
        let open_sessions = vec![
            open("a", "10.0.0.1", "2024-05-01 09:00:00"),
            open("a", "10.0.0.1", "2024-05-01 09:30:00"),
        ];
        let r = reconcile(&open_sessions, &Snapshot::new(), t);
        assert_eq!(ids(&r.to_close), vec!["a"]);
    }

    #[test]
    fn test_steady_state_is_noop() {
        let t = ts("2024-05-01 10:00:00");
        let open_sessions = vec![open("a", "10.0.0.1", "2024-05-01 09:00:00")];
        let mut snap = Snapshot::new();
        snap.insert("a", "10.0.0.1", t);

        assert!(reconcile(&open_sessions, &snap, t).is_noop());
    }

    #[test]
    fn test_register_devices_numbers_from_known_count_in_id_order() {
        let t = ts("2024-05-01 10:00:00");
        let known: HashSet<DeviceId> = ["k1", "k2"].into_iter().map(DeviceId::from).collect();
        let to_open: Vec<NewSession> = ["zz", "k1", "aa"]
            .into_iter()
            .map(|id| NewSession {
                device_id: DeviceId::from(id),
                address: "10.0.0.1".to_string(),
                entered_at: t,
            })
            .collect();

        let devices = register_devices(&known, &to_open);
        assert_eq!(
            devices,
            vec![
                Device {
                    id: DeviceId::from("aa"),
                    label: "new_user_2".to_string()
                },
                Device {
                    id: DeviceId::from("zz"),
                    label: "new_user_3".to_string()
                },
            ]
        );
    }

    #[test]
    fn test_register_devices_skips_known() {
        let t = ts("2024-05-01 10:00:00");
        let known: HashSet<DeviceId> = [DeviceId::from("a")].into_iter().collect();
        let to_open = vec![NewSession {
            device_id: DeviceId::from("a"),
            address: "10.0.0.1".to_string(),
            entered_at: t,
        }];
        assert!(register_devices(&known, &to_open).is_empty());
    }
}
