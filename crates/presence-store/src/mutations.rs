//! Write operations for the session log.
//!
//! `apply` is the only path that opens or closes sessions. It holds the
//! connection lock for the whole read-reconcile-write sequence and commits
//! once, so a failure anywhere leaves the database as it was.

use std::collections::HashSet;

use chrono::NaiveDateTime;
use rusqlite::{params, Transaction};

use presence_core::{reconcile, register_devices, timestamp, DeviceId, OpenSession, Snapshot};

use crate::client::{SessionStore, StoreError};

/// What a single `apply` changed.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ApplyOutcome {
    pub opened: u32,
    pub closed: u32,
    pub continued: u32,
    pub new_devices: u32,
}

impl ApplyOutcome {
    /// Sessions opened plus sessions closed.
    pub fn applied(&self) -> u32 {
        self.opened + self.closed
    }
}

impl SessionStore {
    /// Fold one snapshot into the session log.
    ///
    /// Closes the open sessions of devices missing from `snapshot` with
    /// `exit_time = now`, registers never-seen devices under placeholder
    /// labels, and opens a session for every visible device that has none.
    pub fn apply(&self, snapshot: &Snapshot, now: NaiveDateTime) -> Result<ApplyOutcome, StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let open_sessions = read_open_sessions(&tx)?;
        let plan = reconcile(&open_sessions, snapshot, now);

        // Nothing opens, so nothing registers either; the read-only
        // transaction rolls back on drop.
        if plan.is_noop() {
            tracing::debug!(continued = plan.to_continue.len(), "No presence changes");
            return Ok(ApplyOutcome {
                continued: plan.summary().continued,
                ..ApplyOutcome::default()
            });
        }

        let known = read_device_ids(&tx)?;
        let new_devices = register_devices(&known, &plan.to_open);

        {
            let mut insert_device = tx.prepare("INSERT INTO devices (id, label) VALUES (?1, ?2)")?;
            for device in &new_devices {
                insert_device.execute(params![device.id.as_str(), device.label])?;
                tracing::info!(device = %device.id, label = %device.label, "Registered new device");
            }

            let mut insert_session = tx.prepare(
                "INSERT INTO sessions (device_id, address, enter_time, exit_time)
                 VALUES (?1, ?2, ?3, NULL)",
            )?;
            for session in &plan.to_open {
                insert_session.execute(params![
                    session.device_id.as_str(),
                    session.address,
                    timestamp::format(&session.entered_at),
                ])?;
                tracing::debug!(device = %session.device_id, address = %session.address, "Session opened");
            }

            let mut close_session = tx.prepare(
                "UPDATE sessions SET exit_time = ?1
                 WHERE device_id = ?2 AND exit_time IS NULL",
            )?;
            let exit_time = timestamp::format(&plan.closed_at);
            for device_id in &plan.to_close {
                close_session.execute(params![exit_time, device_id.as_str()])?;
                tracing::debug!(device = %device_id, exit_time = %exit_time, "Session closed");
            }
        }

        tx.commit()?;

        let summary = plan.summary();
        Ok(ApplyOutcome {
            opened: summary.opened,
            closed: summary.closed,
            continued: summary.continued,
            new_devices: new_devices.len() as u32,
        })
    }

    /// Replace the label of a known device.
    ///
    /// Scanning never rewrites labels, so a name set here sticks.
    pub fn set_label(&self, device_id: &DeviceId, label: &str) -> Result<(), StoreError> {
        let conn = self.lock()?;
        let updated = conn.execute(
            "UPDATE devices SET label = ?1 WHERE id = ?2",
            params![label, device_id.as_str()],
        )?;
        if updated == 0 {
            return Err(StoreError::UnknownDevice(device_id.clone()));
        }
        tracing::info!(device = %device_id, label, "Device label updated");
        Ok(())
    }
}

fn read_open_sessions(tx: &Transaction<'_>) -> Result<Vec<OpenSession>, StoreError> {
    let mut stmt = tx.prepare(
        "SELECT device_id, address, enter_time FROM sessions WHERE exit_time IS NULL",
    )?;
    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    rows.into_iter()
        .map(|(device_id, address, entered)| -> Result<OpenSession, StoreError> {
            Ok(OpenSession {
                device_id: DeviceId(device_id),
                address,
                entered_at: timestamp::parse(&entered)?,
            })
        })
        .collect()
}

fn read_device_ids(tx: &Transaction<'_>) -> Result<HashSet<DeviceId>, StoreError> {
    let mut stmt = tx.prepare("SELECT id FROM devices")?;
    let ids = stmt
        .query_map([], |row| row.get::<_, String>(0).map(DeviceId))?
        .collect::<Result<HashSet<_>, _>>()?;
    Ok(ids)
}
