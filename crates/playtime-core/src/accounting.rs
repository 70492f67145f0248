//! Wall-clock time accounting.
//!
//! Counters advance on timestamp deltas, not tick counts, so a slow
//! tick or a suspend/resume cannot mint or lose time beyond the
//! `2 × tick_period` cap. The accountant only moves counters; state
//! transitions belong to the kernel.

use chrono::{DateTime, Utc};

use crate::storage::DailySummary;

/// What one accounting step did to a user's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickOutcome {
    /// Seconds added to counters this tick (post-clamp).
    pub elapsed_sec: i64,
    /// Gaming became active this tick; open sessions now.
    pub gaming_started: bool,
    /// Gaming became inactive this tick; seal sessions now.
    pub gaming_stopped: bool,
    /// The raw delta exceeded the suspend/resume cap.
    pub clamped: bool,
}

/// Advance one user's counters for this tick.
///
/// `tracked_active_now` covers the union of tracked categories
/// (gaming, launcher, educational, social); `was_tracked_active` is
/// the daemon's memory of the previous tick. Gaming state lives in
/// the summary itself.
pub fn advance(
    summary: &mut DailySummary,
    now: DateTime<Utc>,
    tick_period_sec: i64,
    gaming_active_now: bool,
    tracked_active_now: bool,
    was_tracked_active: bool,
) -> TickOutcome {
    let was_gaming = summary.gaming_active;

    let raw_elapsed = summary
        .last_poll_at
        .map(|last| (now - last).num_seconds().max(0))
        .unwrap_or(0);
    let cap = 2 * tick_period_sec;
    let clamped = raw_elapsed > cap;
    let elapsed = raw_elapsed.min(cap);
    if clamped {
        tracing::info!(
            user = %summary.user,
            raw_elapsed_sec = raw_elapsed,
            capped_to_sec = elapsed,
            "elapsed time clamped, likely suspend/resume"
        );
    }

    let mut outcome = TickOutcome {
        elapsed_sec: elapsed,
        clamped,
        ..TickOutcome::default()
    };

    // Gaming budget.
    match (was_gaming, gaming_active_now) {
        (true, true) => summary.gaming_time_sec += elapsed,
        (false, true) => {
            summary.gaming_started_at = Some(now);
            outcome.gaming_started = true;
            // Transition tick contributes no time.
        }
        (true, false) => {
            summary.gaming_time_sec += elapsed;
            summary.gaming_started_at = None;
            outcome.gaming_stopped = true;
        }
        (false, false) => {}
    }

    // Daily total, same rules across the tracked union.
    match (was_tracked_active, tracked_active_now) {
        (true, true) | (true, false) => summary.total_time_sec += elapsed,
        _ => {}
    }

    summary.gaming_active = gaming_active_now;
    summary.last_poll_at = Some(now);
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn summary() -> DailySummary {
        DailySummary::fresh("anders", NaiveDate::from_ymd_opt(2026, 8, 1).unwrap())
    }

    fn t(offset_sec: i64) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-08-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
            + chrono::Duration::seconds(offset_sec)
    }

    #[test]
    fn steady_gaming_accumulates_elapsed() {
        let mut s = summary();
        s.gaming_active = true;
        s.last_poll_at = Some(t(0));
        let outcome = advance(&mut s, t(30), 30, true, true, true);
        assert_eq!(outcome.elapsed_sec, 30);
        assert_eq!(s.gaming_time_sec, 30);
        assert_eq!(s.total_time_sec, 30);
    }

    #[test]
    fn gaming_start_tick_adds_no_time() {
        let mut s = summary();
        s.last_poll_at = Some(t(0));
        let outcome = advance(&mut s, t(30), 30, true, true, false);
        assert!(outcome.gaming_started);
        assert_eq!(s.gaming_time_sec, 0);
        assert_eq!(s.gaming_started_at, Some(t(30)));
        assert!(s.gaming_active);
    }

    #[test]
    fn gaming_stop_tick_adds_final_elapsed() {
        let mut s = summary();
        s.gaming_active = true;
        s.gaming_started_at = Some(t(0));
        s.last_poll_at = Some(t(0));
        let outcome = advance(&mut s, t(30), 30, false, false, true);
        assert!(outcome.gaming_stopped);
        assert_eq!(s.gaming_time_sec, 30);
        assert_eq!(s.total_time_sec, 30);
        assert!(s.gaming_started_at.is_none());
        assert!(!s.gaming_active);
    }

    #[test]
    fn suspend_resume_is_capped_at_twice_tick() {
        let mut s = summary();
        s.gaming_active = true;
        s.last_poll_at = Some(t(0));
        // Two hours of sleep between polls.
        let outcome = advance(&mut s, t(7200), 30, true, true, true);
        assert!(outcome.clamped);
        assert_eq!(outcome.elapsed_sec, 60);
        assert_eq!(s.gaming_time_sec, 60);
    }

    #[test]
    fn launcher_counts_toward_total_only() {
        let mut s = summary();
        s.last_poll_at = Some(t(0));
        // Launcher running: tracked but not gaming.
        advance(&mut s, t(30), 30, false, true, true);
        assert_eq!(s.gaming_time_sec, 0);
        assert_eq!(s.total_time_sec, 30);
    }

    #[test]
    fn counters_never_move_backwards() {
        let mut s = summary();
        s.gaming_active = true;
        s.last_poll_at = Some(t(100));
        // Clock stepped backwards; elapsed clamps to zero.
        let outcome = advance(&mut s, t(40), 30, true, true, true);
        assert_eq!(outcome.elapsed_sec, 0);
        assert_eq!(s.gaming_time_sec, 0);
        assert_eq!(s.last_poll_at, Some(t(40)));
    }

    #[test]
    fn first_poll_seeds_without_counting() {
        let mut s = summary();
        let outcome = advance(&mut s, t(0), 30, true, true, false);
        assert_eq!(outcome.elapsed_sec, 0);
        assert!(outcome.gaming_started);
        assert_eq!(s.last_poll_at, Some(t(0)));
    }
}
