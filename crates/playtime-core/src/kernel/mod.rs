//! Enforcement kernel.
//!
//! A per-user state machine evaluated once per tick, after the time
//! accountant. It reads the day's counters, the schedule verdict, and
//! the classified gaming sample, then decides the target state, the
//! events to emit, and the PIDs to terminate. It touches no I/O
//! itself; the daemon applies kills and persists the summary.
//!
//! ## State transitions
//!
//! ```text
//! AVAILABLE -> GRACE -> ENFORCING
//!     |          |
//!     |          +-> AVAILABLE (gaming stopped during grace)
//!     +-> OUTSIDE_HOURS (schedule denies while gaming)
//! ```

pub mod kill;

use chrono::{DateTime, Datelike, Local, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::events::{Event, Intention, TemplateVars};
use crate::pattern::PatternError;
use crate::storage::{DailySummary, Limits};

/// Kernel state, persisted per `(user, day)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KernelState {
    Available,
    Grace,
    Enforcing,
    OutsideHours,
}

impl KernelState {
    pub fn as_str(self) -> &'static str {
        match self {
            KernelState::Available => "available",
            KernelState::Grace => "grace",
            KernelState::Enforcing => "enforcing",
            KernelState::OutsideHours => "outside_hours",
        }
    }
}

impl FromStr for KernelState {
    type Err = PatternError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "available" => Ok(KernelState::Available),
            "grace" => Ok(KernelState::Grace),
            "enforcing" => Ok(KernelState::Enforcing),
            "outside_hours" => Ok(KernelState::OutsideHours),
            other => Err(PatternError::UnknownState(other.into())),
        }
    }
}

impl fmt::Display for KernelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One classified gaming-category activity visible this tick.
/// Browser-domain gaming carries no PID; it drains the budget and
/// drives transitions but cannot enter the kill path.
#[derive(Debug, Clone)]
pub struct TrackedProcess {
    pub pid: Option<i32>,
    pub display_name: String,
    pub pattern_id: i64,
    /// Absent last tick.
    pub newly_started: bool,
}

/// Why a PID is being terminated; becomes the audit `reason`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillReason {
    TimeExpired,
    OutsideHours,
    BlockedLaunch,
    UnknownStrict,
}

impl KillReason {
    pub fn as_str(self) -> &'static str {
        match self {
            KillReason::TimeExpired => "time_expired",
            KillReason::OutsideHours => "outside_hours",
            KillReason::BlockedLaunch => "blocked_launch",
            KillReason::UnknownStrict => "strict_unknown",
        }
    }
}

/// A PID the kernel wants gone.
#[derive(Debug, Clone)]
pub struct KillTarget {
    pub pid: i32,
    pub process_name: String,
    pub pattern_id: Option<i64>,
    pub reason: KillReason,
}

/// Everything one evaluation decided.
#[derive(Debug, Default)]
pub struct KernelOutcome {
    pub events: Vec<Event>,
    pub kills: Vec<KillTarget>,
}

/// Kernel configuration, fixed for the daemon's lifetime.
#[derive(Debug, Clone)]
pub struct KernelConfig {
    /// Default grace period when the user's limits carry none.
    pub grace_period_sec: i64,
    /// Warning thresholds in minutes remaining.
    pub warning_thresholds: Vec<u32>,
    /// Compute states and events but never kill.
    pub passthrough: bool,
}

/// The per-user state machine. Stateless across users; all mutable
/// state lives in the [`DailySummary`].
pub struct EnforcementKernel {
    config: KernelConfig,
}

impl EnforcementKernel {
    pub fn new(config: KernelConfig) -> Self {
        Self { config }
    }

    /// Evaluate one user for this tick.
    ///
    /// `running` and `ended` carry only gaming-category processes;
    /// launchers are tracked elsewhere and never appear here.
    pub fn evaluate(
        &self,
        summary: &mut DailySummary,
        limits: &Limits,
        schedule_allows: bool,
        running: &[TrackedProcess],
        ended: &[TrackedProcess],
        now: DateTime<Utc>,
    ) -> KernelOutcome {
        let mut outcome = KernelOutcome::default();
        let gaming_active = !running.is_empty();
        let previous_state = summary.state;

        let weekday = now.with_timezone(&Local).weekday().num_days_from_monday() as usize;
        let limit_sec = limits.effective_gaming_limit_min(weekday) * 60;
        let grace_sec = limits.grace_period_sec.unwrap_or(self.config.grace_period_sec);

        let front_name = running
            .first()
            .map(|p| p.display_name.clone())
            .unwrap_or_default();

        // 1. Outside permitted hours while gaming: enforce immediately.
        if !schedule_allows && gaming_active {
            if previous_state != KernelState::OutsideHours {
                self.set_state(summary, KernelState::OutsideHours, now);
                outcome.events.push(Event::new(
                    Intention::OutsideHoursEnter,
                    &summary.user,
                    template_vars(summary, limit_sec, &front_name, "", now),
                    now,
                ));
            } else {
                for p in running.iter().filter(|p| p.newly_started) {
                    outcome.events.push(Event::new(
                        Intention::BlockedLaunch,
                        &summary.user,
                        template_vars(summary, limit_sec, &p.display_name, "", now),
                        now,
                    ));
                }
            }
            for p in running {
                let Some(pid) = p.pid else { continue };
                outcome.kills.push(KillTarget {
                    pid,
                    process_name: p.display_name.clone(),
                    pattern_id: Some(p.pattern_id),
                    reason: if p.newly_started && previous_state == KernelState::OutsideHours {
                        KillReason::BlockedLaunch
                    } else {
                        KillReason::OutsideHours
                    },
                });
            }
        }
        // 2. Budget exhausted.
        else if summary.gaming_time_sec >= limit_sec {
            match previous_state {
                KernelState::Available | KernelState::OutsideHours => {
                    if gaming_active {
                        self.set_state(summary, KernelState::Grace, now);
                        summary.grace_started_at = Some(now);
                        outcome.events.push(Event::new(
                            Intention::TimeExpired,
                            &summary.user,
                            template_vars(summary, limit_sec, &front_name, "", now),
                            now,
                        ));
                    } else if previous_state != KernelState::Available {
                        self.set_state(summary, KernelState::Available, now);
                    }
                }
                KernelState::Grace => {
                    if !gaming_active {
                        // Mercy path: the user stopped on their own.
                        self.set_state(summary, KernelState::Available, now);
                        summary.grace_started_at = None;
                    } else {
                        let grace_elapsed = summary
                            .grace_started_at
                            .map(|t| (now - t).num_seconds())
                            .unwrap_or(i64::MAX);
                        if grace_elapsed >= grace_sec {
                            self.set_state(summary, KernelState::Enforcing, now);
                            summary.grace_started_at = None;
                            outcome.events.push(Event::new(
                                Intention::Enforcement,
                                &summary.user,
                                template_vars(summary, limit_sec, &front_name, "", now),
                                now,
                            ));
                            for p in running {
                                let Some(pid) = p.pid else { continue };
                                outcome.kills.push(KillTarget {
                                    pid,
                                    process_name: p.display_name.clone(),
                                    pattern_id: Some(p.pattern_id),
                                    reason: KillReason::TimeExpired,
                                });
                            }
                        }
                    }
                }
                KernelState::Enforcing => {
                    for p in running.iter().filter(|p| p.newly_started) {
                        outcome.events.push(Event::new(
                            Intention::BlockedLaunch,
                            &summary.user,
                            template_vars(summary, limit_sec, &p.display_name, "", now),
                            now,
                        ));
                    }
                    for p in running {
                        let Some(pid) = p.pid else { continue };
                        outcome.kills.push(KillTarget {
                            pid,
                            process_name: p.display_name.clone(),
                            pattern_id: Some(p.pattern_id),
                            reason: if p.newly_started {
                                KillReason::BlockedLaunch
                            } else {
                                KillReason::TimeExpired
                            },
                        });
                    }
                }
            }
        }
        // 3. Within budget and inside hours.
        else {
            if previous_state != KernelState::Available {
                self.set_state(summary, KernelState::Available, now);
                summary.grace_started_at = None;
            }
            if gaming_active {
                for p in running.iter().filter(|p| p.newly_started) {
                    outcome.events.push(Event::new(
                        Intention::ProcessStart,
                        &summary.user,
                        template_vars(summary, limit_sec, &p.display_name, "", now),
                        now,
                    ));
                }
                self.check_warnings(summary, limit_sec, &front_name, now, &mut outcome);
            }
        }

        // Natural endings are narrated from any state.
        for p in ended {
            outcome.events.push(Event::new(
                Intention::ProcessEnd,
                &summary.user,
                template_vars(summary, limit_sec, &p.display_name, "", now),
                now,
            ));
        }

        if self.config.passthrough {
            outcome.kills.clear();
            outcome
                .events
                .retain(|e| e.intention != Intention::BlockedLaunch);
        }
        outcome
    }

    fn set_state(&self, summary: &mut DailySummary, state: KernelState, now: DateTime<Utc>) {
        if summary.state != state {
            tracing::info!(user = %summary.user, from = %summary.state, to = %state, "state transition");
            summary.state = state;
            summary.last_state_change = Some(now);
        }
    }

    /// Fire the tightest applicable unfired warning and latch it along
    /// with every looser threshold, so each fires at most once per day
    /// and a looser warning never follows a tighter one.
    fn check_warnings(
        &self,
        summary: &mut DailySummary,
        limit_sec: i64,
        process: &str,
        now: DateTime<Utc>,
        outcome: &mut KernelOutcome,
    ) {
        // Round up: with 29:30 on the clock the 30-minute warning has
        // already had its moment.
        let minutes_left = ((limit_sec - summary.gaming_time_sec).max(0) + 59) / 60;

        let mut thresholds = self.config.warning_thresholds.clone();
        thresholds.sort_unstable();
        let fired = thresholds
            .iter()
            .copied()
            .find(|&n| minutes_left <= n as i64 && !summary.warned(n));
        if let Some(n) = fired {
            outcome.events.push(Event::new(
                Intention::TimeWarning(n),
                &summary.user,
                template_vars(summary, limit_sec, process, "", now),
                now,
            ));
            for m in thresholds.into_iter().filter(|&m| m >= n) {
                summary.set_warned(m);
            }
        }
    }
}

fn template_vars(
    summary: &DailySummary,
    limit_sec: i64,
    process: &str,
    pattern: &str,
    now: DateTime<Utc>,
) -> TemplateVars {
    TemplateVars {
        user: summary.user.clone(),
        process: process.to_string(),
        pattern: pattern.to_string(),
        time_left: (limit_sec - summary.gaming_time_sec).max(0) / 60,
        time_used: summary.gaming_time_sec / 60,
        time_limit: limit_sec / 60,
        category: "gaming".to_string(),
        day: now.with_timezone(&Local).format("%A").to_string(),
    }
}
