//! Database schema definitions.
//!
//! The store owns two tables, `devices` and `sessions`. Existing tables are
//! accepted as long as they carry every expected column and the
//! `sessions.device_id -> devices(id)` foreign key resolves; nothing is
//! migrated.

use rusqlite::Connection;

use crate::client::{SessionStore, StoreError};

struct Table {
    name: &'static str,
    ddl: &'static str,
    columns: &'static [&'static str],
}

const TABLES: &[Table] = &[
    Table {
        name: "devices",
        ddl: r#"
        CREATE TABLE devices (
            id TEXT PRIMARY KEY,
            label TEXT
        )
        "#,
        columns: &["id", "label"],
    },
    Table {
        name: "sessions",
        ddl: r#"
        CREATE TABLE sessions (
            device_id TEXT,
            address TEXT,
            enter_time TEXT,
            exit_time TEXT NULL,
            FOREIGN KEY (device_id) REFERENCES devices(id)
        )
        "#,
        columns: &["device_id", "address", "enter_time", "exit_time"],
    },
];

const DEVICES_KEY: &str = "PRIMARY KEY (id)";
const SESSIONS_FOREIGN_KEY: &str = "FOREIGN KEY (device_id) REFERENCES devices(id)";

// The partial unique index makes a second open session per device a
// constraint violation, which rolls back the whole apply.
const INDEXES: &str = r#"
    CREATE INDEX IF NOT EXISTS idx_sessions_device ON sessions(device_id);
    CREATE UNIQUE INDEX IF NOT EXISTS idx_sessions_one_open
        ON sessions(device_id) WHERE exit_time IS NULL;
"#;

impl SessionStore {
    /// Make sure `devices` and `sessions` exist, creating whichever is absent.
    ///
    /// Safe to call any number of times. Fails with
    /// [`StoreError::IncompatibleSchema`] when a table exists without one of
    /// the expected columns, when `devices.id` is not a key, or when
    /// `sessions` does not reference it.
    pub fn ensure_schema(&self) -> Result<(), StoreError> {
        let conn = self.lock()?;

        for table in TABLES {
            match table_columns(&conn, table.name)? {
                None => {
                    tracing::info!(table = table.name, "Creating table");
                    conn.execute_batch(table.ddl)?;
                }
                Some(existing) => {
                    let missing: Vec<String> = table
                        .columns
                        .iter()
                        .filter(|c| !existing.iter().any(|e| e.as_str() == **c))
                        .map(|c| c.to_string())
                        .collect();
                    if !missing.is_empty() {
                        return Err(StoreError::IncompatibleSchema {
                            table: table.name.to_string(),
                            missing,
                        });
                    }
                    tracing::debug!(table = table.name, "Table present");
                }
            }
        }

        if !is_single_column_key(&conn, "devices", "id")? {
            return Err(StoreError::IncompatibleSchema {
                table: "devices".to_string(),
                missing: vec![DEVICES_KEY.to_string()],
            });
        }
        if !references_device_id(&conn)? {
            return Err(StoreError::IncompatibleSchema {
                table: "sessions".to_string(),
                missing: vec![SESSIONS_FOREIGN_KEY.to_string()],
            });
        }

        conn.execute_batch(INDEXES)?;
        Ok(())
    }
}

/// Column names of `table`, or `None` if the table does not exist.
fn table_columns(conn: &Connection, table: &str) -> Result<Option<Vec<String>>, StoreError> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let columns = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<Result<Vec<_>, _>>()?;

    if columns.is_empty() {
        Ok(None)
    } else {
        Ok(Some(columns))
    }
}

/// Whether `column` alone is the primary key of `table` or carries a unique
/// index. SQLite refuses foreign keys pointing at anything else.
fn is_single_column_key(conn: &Connection, table: &str, column: &str) -> Result<bool, StoreError> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let pk: Vec<String> = stmt
        .query_map([], |row| Ok((row.get::<_, String>(1)?, row.get::<_, i64>(5)?)))?
        .collect::<Result<Vec<_>, _>>()?
        .into_iter()
        .filter(|(_, pk)| *pk > 0)
        .map(|(name, _)| name)
        .collect();
    if pk == [column] {
        return Ok(true);
    }

    let mut stmt = conn.prepare(&format!("PRAGMA index_list({table})"))?;
    let unique_indexes = stmt
        .query_map([], |row| Ok((row.get::<_, String>(1)?, row.get::<_, bool>(2)?)))?
        .collect::<Result<Vec<_>, _>>()?;

    for (index, unique) in unique_indexes {
        if !unique {
            continue;
        }
        let mut stmt = conn.prepare(&format!("PRAGMA index_info(\"{index}\")"))?;
        let columns = stmt
            .query_map([], |row| row.get::<_, Option<String>>(2))?
            .collect::<Result<Vec<_>, _>>()?;
        if columns == [Some(column.to_string())] {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Whether `sessions` has a foreign key from `device_id` to `devices(id)`,
/// and no foreign key into `devices` on any other column.
fn references_device_id(conn: &Connection) -> Result<bool, StoreError> {
    let mut stmt = conn.prepare("PRAGMA foreign_key_list(sessions)")?;
    let keys = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, Option<String>>(4)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    // A NULL target column means the parent's primary key.
    let targets_id = |to: &Option<String>| to.as_deref().map_or(true, |c| c == "id");

    let mut found = false;
    for (parent, from, to) in &keys {
        if parent != "devices" {
            continue;
        }
        if from != "device_id" || !targets_id(to) {
            return Ok(false);
        }
        found = true;
    }
    Ok(found)
}
