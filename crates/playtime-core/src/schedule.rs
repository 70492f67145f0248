//! Weekly allow/deny schedule.
//!
//! A schedule is a 168-character string of `0`/`1`, one slot per hour
//! of the week, indexed by `weekday * 24 + hour` with Monday = 0. A
//! missing schedule is treated as all-allowed.

use chrono::{DateTime, Datelike, Local, Timelike};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::ScheduleError;

/// Number of hour slots in a week.
pub const SLOTS: usize = 168;

/// Validated 168-slot weekly schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct WeekSchedule {
    slots: String,
}

impl WeekSchedule {
    /// All hours allowed.
    pub fn all_allowed() -> Self {
        Self {
            slots: "1".repeat(SLOTS),
        }
    }

    /// Parse and validate a 168-character `0`/`1` string.
    pub fn parse(s: &str) -> Result<Self, ScheduleError> {
        if s.len() != SLOTS {
            return Err(ScheduleError::BadLength(s.len()));
        }
        if let Some(bad) = s.chars().find(|c| *c != '0' && *c != '1') {
            return Err(ScheduleError::BadCharacter(bad));
        }
        Ok(Self {
            slots: s.to_string(),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.slots
    }

    /// Is the slot containing `at` allowed?
    pub fn is_allowed(&self, at: DateTime<Local>) -> bool {
        let idx = at.weekday().num_days_from_monday() as usize * 24 + at.hour() as usize;
        self.slot(idx)
    }

    /// Read a single slot; out-of-range indexes are denied.
    pub fn slot(&self, idx: usize) -> bool {
        self.slots.as_bytes().get(idx).copied() == Some(b'1')
    }

    /// Set a single slot. Indexes past the grid are ignored.
    pub fn set_slot(&mut self, idx: usize, allowed: bool) {
        if idx < SLOTS {
            let mut bytes = self.slots.clone().into_bytes();
            bytes[idx] = if allowed { b'1' } else { b'0' };
            // Safe: bytes are ASCII by construction.
            self.slots = String::from_utf8(bytes).unwrap_or_else(|_| "1".repeat(SLOTS));
        }
    }
}

impl fmt::Display for WeekSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.slots)
    }
}

impl TryFrom<String> for WeekSchedule {
    type Error = ScheduleError;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<WeekSchedule> for String {
    fn from(s: WeekSchedule) -> String {
        s.slots
    }
}

/// One user's entry in the schedule export format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleExportEntry {
    pub schedule: String,
    /// Daily gaming limit in minutes.
    pub gaming_limit: i64,
    /// Daily total ceiling in minutes; 0 means no ceiling.
    pub daily_total: i64,
}

/// Full export: user name → entry.
pub type ScheduleExport = BTreeMap<String, ScheduleExportEntry>;

/// Validate an export document before any write is attempted.
///
/// `known_users` is the set of configured user names; entries naming
/// anyone else are rejected, as are malformed schedule strings.
pub fn validate_import(
    doc: &ScheduleExport,
    known_users: &[String],
) -> Result<(), ScheduleError> {
    for (user, entry) in doc {
        if !known_users.iter().any(|u| u == user) {
            return Err(ScheduleError::UnknownUser(user.clone()));
        }
        WeekSchedule::parse(&entry.schedule)?;
    }
    Ok(())
}
