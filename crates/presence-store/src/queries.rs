//! Read operations over devices and sessions.

use rusqlite::{params, OptionalExtension, Row};

use presence_core::{timestamp, Device, DeviceId, Session};

use crate::client::{SessionStore, StoreError};

/// Narrows a session listing.
#[derive(Debug, Clone, Default)]
pub struct SessionFilter {
    /// Only sessions of this device.
    pub device_id: Option<DeviceId>,
    /// Only sessions that have not been closed.
    pub open_only: bool,
}

/// Raw session columns; timestamps are parsed outside the row callback so
/// format errors surface as `StoreError::Core`.
struct SessionRow {
    device_id: String,
    address: String,
    enter_time: String,
    exit_time: Option<String>,
}

impl SessionRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            device_id: row.get(0)?,
            address: row.get(1)?,
            enter_time: row.get(2)?,
            exit_time: row.get(3)?,
        })
    }

    fn into_session(self) -> Result<Session, StoreError> {
        Ok(Session {
            device_id: DeviceId(self.device_id),
            address: self.address,
            entered_at: timestamp::parse(&self.enter_time)?,
            exited_at: self.exit_time.as_deref().map(timestamp::parse).transpose()?,
        })
    }
}

impl SessionStore {
    /// All known devices, ordered by id.
    pub fn devices(&self) -> Result<Vec<Device>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT id, label FROM devices ORDER BY id")?;
        let devices = stmt
            .query_map([], |row| {
                Ok(Device {
                    id: DeviceId(row.get(0)?),
                    label: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(devices)
    }

    pub fn device(&self, device_id: &DeviceId) -> Result<Option<Device>, StoreError> {
        let conn = self.lock()?;
        let device = conn
            .query_row(
                "SELECT id, label FROM devices WHERE id = ?1",
                params![device_id.as_str()],
                |row| {
                    Ok(Device {
                        id: DeviceId(row.get(0)?),
                        label: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                    })
                },
            )
            .optional()?;
        Ok(device)
    }

    /// Sessions matching `filter`, oldest entry first.
    pub fn sessions(&self, filter: &SessionFilter) -> Result<Vec<Session>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT device_id, address, enter_time, exit_time
             FROM sessions
             WHERE (?1 IS NULL OR device_id = ?1)
               AND (?2 = 0 OR exit_time IS NULL)
             ORDER BY enter_time, device_id",
        )?;
        let device = filter.device_id.as_ref().map(DeviceId::as_str);
        let rows = stmt
            .query_map(params![device, filter.open_only], SessionRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(SessionRow::into_session).collect()
    }

    /// Sessions with no exit time.
    pub fn open_sessions(&self) -> Result<Vec<Session>, StoreError> {
        self.sessions(&SessionFilter {
            device_id: None,
            open_only: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use presence_core::Snapshot;

    fn seeded() -> SessionStore {
        let store = SessionStore::open_in_memory().unwrap();
        store.ensure_schema().unwrap();

        let t1 = timestamp::parse("2024-07-01 12:00:00").unwrap();
        let mut snap = Snapshot::new();
        snap.insert("a", "10.0.0.1", t1);
        snap.insert("b", "10.0.0.2", t1);
        store.apply(&snap, t1).unwrap();

        let t2 = timestamp::parse("2024-07-01 12:05:00").unwrap();
        let mut snap = Snapshot::new();
        snap.insert("b", "10.0.0.2", t2);
        store.apply(&snap, t2).unwrap();

        let t3 = timestamp::parse("2024-07-01 12:10:00").unwrap();
        let mut snap = Snapshot::new();
        snap.insert("a", "10.0.0.7", t3);
        snap.insert("b", "10.0.0.2", t3);
        store.apply(&snap, t3).unwrap();
        store
    }

    #[test]
    fn test_devices_ordered_by_id() {
        let store = seeded();
        let labels: Vec<_> = store
            .devices()
            .unwrap()
            .into_iter()
            .map(|d| (d.id.0, d.label))
            .collect();
        assert_eq!(
            labels,
            vec![
                ("a".to_string(), "new_user_0".to_string()),
                ("b".to_string(), "new_user_1".to_string()),
            ]
        );
    }

    #[test]
    fn test_device_lookup() {
        let store = seeded();
        assert!(store.device(&DeviceId::from("a")).unwrap().is_some());
        assert!(store.device(&DeviceId::from("zz")).unwrap().is_none());
    }

    #[test]
    fn test_sessions_filtered_by_device() {
        let store = seeded();
        let filter = SessionFilter {
            device_id: Some(DeviceId::from("a")),
            open_only: false,
        };
        let sessions = store.sessions(&filter).unwrap();
        assert_eq!(sessions.len(), 2);
        assert_eq!(
            sessions[0].exited_at,
            Some(timestamp::parse("2024-07-01 12:05:00").unwrap())
        );
        assert_eq!(sessions[1].address, "10.0.0.7");
        assert!(sessions[1].is_open());
    }

    #[test]
    fn test_open_sessions() {
        let store = seeded();
        let open = store.open_sessions().unwrap();
        let ids: Vec<_> = open.iter().map(|s| s.device_id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a"]);
    }

    #[test]
    fn test_all_sessions() {
        let store = seeded();
        assert_eq!(store.sessions(&SessionFilter::default()).unwrap().len(), 3);
    }
}
