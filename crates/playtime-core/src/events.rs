//! Kernel events and notification intentions.
//!
//! The kernel produces [`Event`]s; the router turns them into rendered
//! notifications. An [`Intention`] names the semantic purpose of a
//! message and is decoupled from its wording, which lives in the
//! template table.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Semantic purpose of a notification.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Intention {
    ProcessStart,
    ProcessEnd,
    /// `time_warning_{N}` for N minutes remaining.
    TimeWarning(u32),
    TimeExpired,
    Enforcement,
    BlockedLaunch,
    OutsideHoursEnter,
    DayReset,
    Discovery,
    UnknownProcess,
}

impl Intention {
    /// Stable string form used as the template table key.
    pub fn name(&self) -> String {
        match self {
            Intention::ProcessStart => "process_start".into(),
            Intention::ProcessEnd => "process_end".into(),
            Intention::TimeWarning(n) => format!("time_warning_{n}"),
            Intention::TimeExpired => "time_expired".into(),
            Intention::Enforcement => "enforcement".into(),
            Intention::BlockedLaunch => "blocked_launch".into(),
            Intention::OutsideHoursEnter => "outside_hours_enter".into(),
            Intention::DayReset => "day_reset".into(),
            Intention::Discovery => "discovery".into(),
            Intention::UnknownProcess => "unknown_process".into(),
        }
    }

    /// Inverse of [`Intention::name`].
    pub fn parse(s: &str) -> Option<Intention> {
        match s {
            "process_start" => Some(Intention::ProcessStart),
            "process_end" => Some(Intention::ProcessEnd),
            "time_expired" => Some(Intention::TimeExpired),
            "enforcement" => Some(Intention::Enforcement),
            "blocked_launch" => Some(Intention::BlockedLaunch),
            "outside_hours_enter" => Some(Intention::OutsideHoursEnter),
            "day_reset" => Some(Intention::DayReset),
            "discovery" => Some(Intention::Discovery),
            "unknown_process" => Some(Intention::UnknownProcess),
            _ => s
                .strip_prefix("time_warning_")
                .and_then(|n| n.parse().ok())
                .map(Intention::TimeWarning),
        }
    }
}

/// Closed set of placeholders available to message templates.
///
/// Unknown placeholders in a template render as the literal text;
/// they never abort dispatch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TemplateVars {
    pub user: String,
    pub process: String,
    pub pattern: String,
    /// Minutes remaining.
    pub time_left: i64,
    /// Minutes used.
    pub time_used: i64,
    /// Daily limit in minutes.
    pub time_limit: i64,
    pub category: String,
    /// Weekday name, e.g. "Saturday".
    pub day: String,
}

impl TemplateVars {
    /// Flatten into the name → value map used by the renderer.
    pub fn to_map(&self) -> BTreeMap<String, String> {
        let mut map = BTreeMap::new();
        map.insert("user".into(), self.user.clone());
        map.insert("process".into(), self.process.clone());
        map.insert("pattern".into(), self.pattern.clone());
        map.insert("time_left".into(), self.time_left.to_string());
        map.insert("time_used".into(), self.time_used.to_string());
        map.insert("time_limit".into(), self.time_limit.to_string());
        map.insert("category".into(), self.category.clone());
        map.insert("day".into(), self.day.clone());
        map
    }
}

/// A single kernel-emitted event bound for the router.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub intention: Intention,
    pub user: String,
    pub vars: TemplateVars,
    pub at: DateTime<Utc>,
}

impl Event {
    pub fn new(intention: Intention, user: &str, vars: TemplateVars, at: DateTime<Utc>) -> Self {
        Self {
            intention,
            user: user.to_string(),
            vars,
            at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intention_names_roundtrip() {
        let all = [
            Intention::ProcessStart,
            Intention::ProcessEnd,
            Intention::TimeWarning(30),
            Intention::TimeWarning(5),
            Intention::TimeExpired,
            Intention::Enforcement,
            Intention::BlockedLaunch,
            Intention::OutsideHoursEnter,
            Intention::DayReset,
            Intention::Discovery,
            Intention::UnknownProcess,
        ];
        for intention in all {
            assert_eq!(Intention::parse(&intention.name()), Some(intention));
        }
    }

    #[test]
    fn parse_rejects_garbage() {
        assert_eq!(Intention::parse("time_warning_"), None);
        assert_eq!(Intention::parse("no_such_intention"), None);
    }
}
