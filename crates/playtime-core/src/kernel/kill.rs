//! Staged process termination.
//!
//! The kill protocol: send SIGTERM to the target's whole process
//! group, wait one tick, escalate to SIGKILL if the process is still
//! there. Every attempt produces an audit record; a follow-up that
//! finds the process already gone records `exit_observed` with no
//! signal sent.

use std::collections::HashMap;

use super::KillTarget;

/// One termination attempt, destined for the audit log.
#[derive(Debug, Clone)]
pub struct KillAttempt {
    pub pid: i32,
    pub process_name: String,
    pub pattern_id: Option<i64>,
    pub reason: &'static str,
    /// `SIGTERM`, `SIGKILL`, or `none` when the exit was observed
    /// before escalation was needed.
    pub signal_sent: &'static str,
    pub exit_observed: bool,
}

/// Tracks in-flight terminations across ticks.
///
/// Owned by the daemon loop; `request` is called once per target per
/// tick and decides which stage that target is at.
#[derive(Debug, Default)]
pub struct ProcessTerminator {
    /// PIDs that have received SIGTERM and await verification.
    term_sent: HashMap<i32, &'static str>,
}

impl ProcessTerminator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance the protocol for one target. Returns the attempt to
    /// audit, or `None` when there was nothing left to do.
    pub fn request(&mut self, target: &KillTarget) -> Option<KillAttempt> {
        let reason = target.reason.as_str();

        if let Some(_prior_reason) = self.term_sent.get(&target.pid) {
            // Second visit: verify, then escalate if still alive.
            self.term_sent.remove(&target.pid);
            if !process_alive(target.pid) {
                tracing::debug!(pid = target.pid, "exit observed after SIGTERM");
                return Some(KillAttempt {
                    pid: target.pid,
                    process_name: target.process_name.clone(),
                    pattern_id: target.pattern_id,
                    reason,
                    signal_sent: "none",
                    exit_observed: true,
                });
            }
            tracing::info!(pid = target.pid, name = %target.process_name, "escalating to SIGKILL");
            signal_group(target.pid, libc::SIGKILL);
            return Some(KillAttempt {
                pid: target.pid,
                process_name: target.process_name.clone(),
                pattern_id: target.pattern_id,
                reason,
                signal_sent: "SIGKILL",
                exit_observed: false,
            });
        }

        if !process_alive(target.pid) {
            // Already gone; benign.
            return None;
        }

        tracing::info!(pid = target.pid, name = %target.process_name, reason, "sending SIGTERM");
        signal_group(target.pid, libc::SIGTERM);
        self.term_sent.insert(target.pid, reason);
        Some(KillAttempt {
            pid: target.pid,
            process_name: target.process_name.clone(),
            pattern_id: target.pattern_id,
            reason,
            signal_sent: "SIGTERM",
            exit_observed: false,
        })
    }

    /// Drop tracking for PIDs that have exited; called once per tick
    /// so recycled PIDs cannot inherit a half-finished protocol.
    pub fn sweep(&mut self) {
        self.term_sent.retain(|pid, _| process_alive(*pid));
    }
}

/// Signal the process group containing `pid`, falling back to the PID
/// itself when the group cannot be resolved. The daemon's own group is
/// never signalled.
fn signal_group(pid: i32, signal: i32) {
    unsafe {
        let pgid = libc::getpgid(pid);
        let own_pgid = libc::getpgid(0);
        if pgid > 0 && pgid != own_pgid {
            libc::kill(-pgid, signal);
        } else if pgid != own_pgid || pgid <= 0 {
            libc::kill(pid, signal);
        }
    }
}

/// Liveness probe via signal 0. EPERM still means alive.
pub fn process_alive(pid: i32) -> bool {
    let result = unsafe { libc::kill(pid, 0) };
    if result == 0 {
        return true;
    }
    std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}
