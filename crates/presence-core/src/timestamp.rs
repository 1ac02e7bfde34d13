//! Wall-clock timestamps as persisted in the session log.
//!
//! Times are local, second precision, with no offset, written as
//! `YYYY-MM-DD HH:MM:SS` so that string order equals time order.

use chrono::{Local, NaiveDateTime, SubsecRound};

use crate::error::CoreError;

/// Storage format for every persisted timestamp.
pub const FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Current local wall-clock time, truncated to whole seconds.
pub fn now() -> NaiveDateTime {
    Local::now().naive_local().trunc_subsecs(0)
}

pub fn format(ts: &NaiveDateTime) -> String {
    ts.format(FORMAT).to_string()
}

pub fn parse(value: &str) -> Result<NaiveDateTime, CoreError> {
    NaiveDateTime::parse_from_str(value, FORMAT).map_err(|source| CoreError::InvalidTimestamp {
        value: value.to_string(),
        source,
    })
}
