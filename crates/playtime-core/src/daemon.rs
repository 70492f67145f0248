//! Daemon loop.
//!
//! One tick: snapshot wall time, then per enabled user run every
//! detection worker, merge and classify the activity stream, advance
//! the time accountant, run the enforcement kernel, flush events
//! through the router, and persist the daily summary. The loop is
//! single-threaded and cooperative; the only suspension point is the
//! tick-boundary sleep, and a shutdown signal exits at the next
//! boundary after sealing in-flight sessions.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Datelike, Duration as ChronoDuration, Local, NaiveDate, Utc};

use crate::accounting;
use crate::config::{DaemonConfig, DaemonMode};
use crate::detect::browser::chrome::ChromeWorker;
use crate::detect::browser::firefox::FirefoxWorker;
use crate::detect::browser::windows::{KWinWindowEnumerator, WindowCache};
use crate::detect::process::ProcessWorker;
use crate::detect::proton::ProtonWorker;
use crate::detect::{ActivitySource, DetectedActivity, DetectionWorker};
use crate::error::CoreError;
use crate::events::{Event, Intention, TemplateVars};
use crate::kernel::kill::ProcessTerminator;
use crate::kernel::{
    EnforcementKernel, KernelConfig, KillReason, KillTarget, TrackedProcess,
};
use crate::passwd;
use crate::pattern::{discovery, Category, Classification, Pattern, PatternEngine, PatternType};
use crate::router::MessageRouter;
use crate::notify::Dispatcher;
use crate::storage::{
    AuditEntry, DailySummary, Database, EndReason, Limits, RetentionPolicy, UserRecord,
};

static SHUTDOWN: AtomicBool = AtomicBool::new(false);

extern "C" fn handle_shutdown_signal(_signal: libc::c_int) {
    SHUTDOWN.store(true, Ordering::SeqCst);
}

/// Install SIGTERM/SIGINT handlers that request a clean exit at the
/// next tick boundary.
pub fn install_signal_handlers() {
    unsafe {
        libc::signal(libc::SIGTERM, handle_shutdown_signal as libc::sighandler_t);
        libc::signal(libc::SIGINT, handle_shutdown_signal as libc::sighandler_t);
    }
}

pub fn shutdown_requested() -> bool {
    SHUTDOWN.load(Ordering::SeqCst)
}

/// The tracking day rolls at `reset_hour` local time, so 01:00 still
/// belongs to yesterday's budget with the default 04:00 reset.
pub fn logical_date(now: DateTime<Utc>, reset_hour: u32) -> NaiveDate {
    (now.with_timezone(&Local) - ChronoDuration::hours(reset_hour as i64)).date_naive()
}

/// Per-user in-memory state across ticks. Lost on restart by design;
/// everything durable lives in the store.
#[derive(Default)]
struct UserRuntime {
    /// Marker → gaming activity seen last tick. Markers are
    /// `pid:<n>` for processes and `key:<domain>` for browser hits.
    prev_gaming: HashMap<String, TrackedProcess>,
    was_tracked_active: bool,
    /// pid → open session row.
    open_sessions: HashMap<i32, i64>,
    /// Strict mode: pid → when the unknown-process warning fired.
    strict_pending: HashMap<i32, DateTime<Utc>>,
}

struct ClassifiedActivity {
    activity: DetectedActivity,
    pattern: Pattern,
}

/// The orchestrator. Owns every in-memory cache; all of them are
/// rebuilt when the store's change epoch moves.
pub struct Daemon {
    config: DaemonConfig,
    db: Database,
    kernel: EnforcementKernel,
    router: MessageRouter,
    dispatcher: Dispatcher,
    terminator: ProcessTerminator,
    engine: PatternEngine,
    workers: Vec<Box<dyn DetectionWorker>>,
    window_cache: Option<Rc<RefCell<WindowCache>>>,
    users: Vec<UserRecord>,
    runtime: HashMap<String, UserRuntime>,
    /// Skip passwd verification (tests drive synthetic users).
    verify_accounts: bool,
}

impl Daemon {
    /// Standard daemon with the full worker set.
    pub fn new(config: DaemonConfig) -> Result<Self, CoreError> {
        let db = Database::open(&config.daemon.db_path)?;
        let window_cache = Rc::new(RefCell::new(WindowCache::new(Box::new(
            KWinWindowEnumerator,
        ))));
        let workers: Vec<Box<dyn DetectionWorker>> = vec![
            Box::new(ProcessWorker::new()),
            Box::new(ProtonWorker::new()),
            Box::new(ChromeWorker::new(Rc::clone(&window_cache))),
            Box::new(FirefoxWorker::new(Rc::clone(&window_cache))),
        ];
        let dispatcher = Dispatcher::standard("playtime");
        Ok(Self::assemble(
            config,
            db,
            workers,
            dispatcher,
            Some(window_cache),
            true,
        ))
    }

    /// Assemble from parts; used by tests to inject synthetic workers
    /// and a capturing dispatcher.
    pub fn with_parts(
        config: DaemonConfig,
        db: Database,
        workers: Vec<Box<dyn DetectionWorker>>,
        dispatcher: Dispatcher,
    ) -> Self {
        Self::assemble(config, db, workers, dispatcher, None, false)
    }

    fn assemble(
        config: DaemonConfig,
        db: Database,
        workers: Vec<Box<dyn DetectionWorker>>,
        dispatcher: Dispatcher,
        window_cache: Option<Rc<RefCell<WindowCache>>>,
        verify_accounts: bool,
    ) -> Self {
        let kernel = EnforcementKernel::new(KernelConfig {
            grace_period_sec: config.daemon.grace_period_seconds as i64,
            warning_thresholds: config.daemon.warning_thresholds.clone(),
            passthrough: config.daemon.mode == DaemonMode::Passthrough,
        });
        let router = MessageRouter::new(config.messages.variant_selection);
        let mut daemon = Self {
            config,
            db,
            kernel,
            router,
            dispatcher,
            terminator: ProcessTerminator::new(),
            engine: PatternEngine::build(Vec::new(), -1),
            workers,
            window_cache,
            users: Vec::new(),
            runtime: HashMap::new(),
            verify_accounts,
        };
        if let Err(e) = daemon.reload() {
            tracing::warn!(error = %e, "initial cache load failed");
        }
        daemon
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    /// Run until a shutdown signal arrives.
    pub fn run(&mut self) -> Result<(), CoreError> {
        install_signal_handlers();

        // A crashed predecessor may have left sessions open.
        let stale = self
            .db
            .close_all_open_sessions(Utc::now(), EndReason::Unknown)?;
        if stale > 0 {
            tracing::warn!(stale, "sealed stale sessions from previous run");
        }
        let report = self.db.maintenance(&RetentionPolicy::default())?;
        tracing::info!(
            events = report.events_deleted,
            sessions = report.sessions_deleted,
            messages = report.messages_deleted,
            "startup maintenance complete"
        );
        tracing::info!(
            mode = self.config.daemon.mode.as_str(),
            poll_interval = self.config.daemon.poll_interval,
            "playtime daemon running"
        );

        let tick_period = Duration::from_secs(self.config.daemon.poll_interval);
        while !shutdown_requested() {
            let started = Instant::now();
            self.tick(Utc::now());
            while started.elapsed() < tick_period && !shutdown_requested() {
                let remaining = tick_period - started.elapsed();
                std::thread::sleep(remaining.min(Duration::from_millis(250)));
            }
        }

        self.db
            .close_all_open_sessions(Utc::now(), EndReason::Logout)?;
        tracing::info!("playtime daemon shut down");
        Ok(())
    }

    /// One full tick over all users.
    pub fn tick(&mut self, now: DateTime<Utc>) {
        if let Err(e) = self.reload_if_changed() {
            tracing::warn!(error = %e, "cache reload failed, keeping previous state");
        }
        if let Some(cache) = &self.window_cache {
            cache.borrow_mut().invalidate();
        }
        self.terminator.sweep();
        let users = self.users.clone();
        for user in &users {
            if let Err(e) = self.process_user(user, now) {
                tracing::error!(user = %user.name, error = %e, "tick failed for user");
            }
        }
    }

    fn reload_if_changed(&mut self) -> Result<(), CoreError> {
        let epoch = self.db.change_epoch()?;
        if epoch == self.engine.epoch() {
            return Ok(());
        }
        self.reload()
    }

    fn reload(&mut self) -> Result<(), CoreError> {
        let epoch = self.db.change_epoch()?;
        self.engine = PatternEngine::build(self.db.list_patterns(None)?, epoch);

        let mut users = Vec::new();
        for user in self.db.get_users()? {
            if !user.enabled {
                continue;
            }
            if self.verify_accounts {
                match passwd::by_name(&user.name) {
                    Some(account) => {
                        if account.uid != user.uid {
                            tracing::warn!(
                                user = %user.name,
                                configured = user.uid,
                                actual = account.uid,
                                "configured uid differs from system account, using system"
                            );
                            users.push(UserRecord {
                                uid: account.uid,
                                ..user
                            });
                            continue;
                        }
                    }
                    None => {
                        tracing::warn!(user = %user.name, "no system account, not monitoring");
                        continue;
                    }
                }
            }
            users.push(user);
        }
        self.users = users;
        tracing::debug!(epoch, users = self.users.len(), "caches rebuilt");
        Ok(())
    }

    fn process_user(&mut self, user: &UserRecord, now: DateTime<Utc>) -> Result<(), CoreError> {
        // 1. Sample. Worker failures degrade to empty results.
        let mut raw: Vec<DetectedActivity> = Vec::new();
        for worker in &mut self.workers {
            if !worker.is_available() {
                continue;
            }
            match worker.scan(user) {
                Ok(activities) => raw.extend(activities),
                Err(e) => {
                    tracing::warn!(worker = worker.name(), error = %e, "scan degraded to empty");
                }
            }
        }
        let merged = merge_activities(raw);

        // 2. Classify and gate.
        let mut matched: Vec<ClassifiedActivity> = Vec::new();
        let mut unknown: Vec<DetectedActivity> = Vec::new();
        for activity in merged {
            match self.engine.classify(&user.name, &activity) {
                Classification::Matched(pattern) => {
                    let passes = match activity.pattern_type() {
                        PatternType::BrowserDomain => true,
                        PatternType::Process => {
                            let threshold = pattern
                                .cpu_threshold
                                .unwrap_or(self.config.daemon.cpu_threshold);
                            activity.cpu_percent.is_some_and(|cpu| cpu >= threshold)
                        }
                    };
                    let runtime = if passes {
                        self.config.daemon.poll_interval as i64
                    } else {
                        0
                    };
                    if let Err(e) = self.db.touch_pattern_stats(pattern.id, runtime, now) {
                        tracing::debug!(error = %e, "pattern stat update failed");
                    }
                    if passes {
                        matched.push(ClassifiedActivity { activity, pattern });
                    }
                }
                Classification::Unknown => unknown.push(activity),
            }
        }

        // 3. Discovery and strict mode for the unknowns.
        let mut events: Vec<Event> = Vec::new();
        self.handle_unknowns(user, &unknown, now, &mut events)?;

        // 4. Build the tracked picture.
        let gaming_now = self.collect_gaming(user, &matched);
        let tracked_active = matched
            .iter()
            .any(|c| c.pattern.category.is_tracked());
        let gaming_active = !gaming_now.is_empty();

        let runtime = self.runtime.entry(user.name.clone()).or_default();
        let ended_gaming: Vec<TrackedProcess> = runtime
            .prev_gaming
            .iter()
            .filter(|(marker, _)| !gaming_now.contains_key(*marker))
            .map(|(_, p)| p.clone())
            .collect();
        let running_gaming: Vec<TrackedProcess> = gaming_now.values().cloned().collect();
        let was_tracked_active = runtime.was_tracked_active;

        // 5. Load (or create) today's summary.
        let today = logical_date(now, self.config.daemon.reset_hour);
        let mut summary = match self.db.load_daily_summary(&user.name, today)? {
            Some(summary) => summary,
            None => {
                if !tracked_active && ended_gaming.is_empty() {
                    // Nothing happened today yet; no row, no work.
                    return Ok(());
                }
                self.day_reset_event(user, today, now, &mut events)?;
                DailySummary::fresh(&user.name, today)
            }
        };

        // 6. Time accounting, then the kernel.
        accounting::advance(
            &mut summary,
            now,
            self.config.daemon.poll_interval as i64,
            gaming_active,
            tracked_active,
            was_tracked_active,
        );

        let limits = self
            .db
            .get_limits(&user.name)?
            .unwrap_or_else(|| Limits::new(&user.name));
        let schedule_allows = limits
            .schedule
            .as_ref()
            .map(|s| s.is_allowed(now.with_timezone(&Local)))
            .unwrap_or(true);

        let outcome = self.kernel.evaluate(
            &mut summary,
            &limits,
            schedule_allows,
            &running_gaming,
            &ended_gaming,
            now,
        );
        events.extend(outcome.events);

        // 7. Kills, audit, and session bookkeeping.
        let kill_pids = self.apply_kills(user, &outcome.kills, now);
        self.sync_sessions(user, &matched, &kill_pids, now)?;

        // 8. Remember this tick's picture.
        let runtime = self.runtime.entry(user.name.clone()).or_default();
        runtime.prev_gaming = gaming_now;
        runtime.was_tracked_active = tracked_active;

        // 9. Notify, log, persist.
        for event in &events {
            if let Err(e) = self
                .router
                .dispatch(&self.db, &mut self.dispatcher, user, event)
            {
                tracing::warn!(error = %e, "event dispatch failed");
            }
            if let Err(e) = self.db.append_event(
                &user.name,
                &event.intention.name(),
                Some(event.vars.process.as_str()),
                Some(event.vars.category.as_str()),
                None,
                None,
            ) {
                tracing::debug!(error = %e, "event log write failed");
            }
        }

        // Summary persistence failures abort this user's tick; the
        // UPSERT retries cleanly next tick.
        self.db.save_daily_summary(&summary)?;
        Ok(())
    }

    /// Marker → gaming activity for this tick.
    fn collect_gaming(
        &self,
        user: &UserRecord,
        matched: &[ClassifiedActivity],
    ) -> HashMap<String, TrackedProcess> {
        let prev = self.runtime.get(&user.name).map(|r| &r.prev_gaming);
        let mut gaming = HashMap::new();
        for c in matched {
            if c.pattern.category != Category::Gaming {
                continue;
            }
            let marker = match c.activity.pid {
                Some(pid) => format!("pid:{pid}"),
                None => format!("key:{}", c.activity.key),
            };
            let newly_started = prev.map(|p| !p.contains_key(&marker)).unwrap_or(true);
            gaming.entry(marker).or_insert(TrackedProcess {
                pid: c.activity.pid,
                display_name: c.pattern.display_name.clone(),
                pattern_id: c.pattern.id,
                newly_started,
            });
        }
        gaming
    }

    /// Discovery candidates and strict-mode handling for activities no
    /// active pattern claimed.
    fn handle_unknowns(
        &mut self,
        user: &UserRecord,
        unknown: &[DetectedActivity],
        now: DateTime<Utc>,
        events: &mut Vec<Event>,
    ) -> Result<(), CoreError> {
        let strict = self.config.daemon.mode == DaemonMode::Strict;
        let grace = self.config.daemon.grace_period_seconds as i64;
        let mut strict_live: HashSet<i32> = HashSet::new();

        for activity in unknown {
            let hot = match activity.pattern_type() {
                PatternType::BrowserDomain => true,
                PatternType::Process => activity
                    .cpu_percent
                    .is_some_and(|cpu| cpu >= self.config.discovery.cpu_threshold),
            };
            if !hot {
                continue;
            }

            if strict && activity.pattern_type() == PatternType::Process {
                if let Some(pid) = activity.pid {
                    strict_live.insert(pid);
                    let warned_at = self
                        .runtime
                        .entry(user.name.clone())
                        .or_default()
                        .strict_pending
                        .get(&pid)
                        .copied();
                    match warned_at {
                        None => {
                            self.runtime
                                .entry(user.name.clone())
                                .or_default()
                                .strict_pending
                                .insert(pid, now);
                            events.push(Event::new(
                                Intention::UnknownProcess,
                                &user.name,
                                TemplateVars {
                                    user: user.name.clone(),
                                    process: activity.key.clone(),
                                    ..TemplateVars::default()
                                },
                                now,
                            ));
                        }
                        Some(warned_at) if (now - warned_at).num_seconds() >= grace => {
                            let target = KillTarget {
                                pid,
                                process_name: activity.key.clone(),
                                pattern_id: None,
                                reason: KillReason::UnknownStrict,
                            };
                            self.apply_kills(user, std::slice::from_ref(&target), now);
                        }
                        Some(_) => {}
                    }
                }
            }

            let runtime_sec = self.config.daemon.poll_interval as i64;
            match discovery::record_observation(
                &self.db,
                &self.config.discovery,
                &user.name,
                activity,
                runtime_sec,
                now,
            ) {
                Ok(Some(pattern)) => {
                    events.push(Event::new(
                        Intention::Discovery,
                        &user.name,
                        TemplateVars {
                            user: user.name.clone(),
                            process: pattern.display_name.clone(),
                            category: pattern.category.as_str().to_string(),
                            ..TemplateVars::default()
                        },
                        now,
                    ));
                }
                Ok(None) => {}
                Err(e) => tracing::debug!(error = %e, "discovery record failed"),
            }
        }

        // Unknown PIDs that vanished or got classified drop out of the
        // strict countdown.
        if strict {
            let runtime = self.runtime.entry(user.name.clone()).or_default();
            runtime.strict_pending.retain(|pid, _| strict_live.contains(pid));
        }
        Ok(())
    }

    /// Drive the terminator for each kill target and audit every
    /// attempt. Returns the PIDs that had kills requested.
    fn apply_kills(
        &mut self,
        user: &UserRecord,
        kills: &[KillTarget],
        now: DateTime<Utc>,
    ) -> HashSet<i32> {
        let mut killed = HashSet::new();
        for target in kills {
            killed.insert(target.pid);
            if let Some(attempt) = self.terminator.request(target) {
                let entry = AuditEntry {
                    id: 0,
                    timestamp: now,
                    user: user.name.clone(),
                    pid: attempt.pid,
                    process_name: attempt.process_name.clone(),
                    pattern_id: attempt.pattern_id,
                    reason: attempt.reason.to_string(),
                    signal_sent: attempt.signal_sent.to_string(),
                    exit_observed: attempt.exit_observed,
                };
                // Audit failures never block enforcement.
                if let Err(e) = self.db.append_audit(&entry) {
                    tracing::warn!(error = %e, "audit write failed");
                }
            }
        }
        killed
    }

    /// Open sessions for newly tracked PIDs and seal sessions whose
    /// PID vanished (naturally or by enforcement).
    fn sync_sessions(
        &mut self,
        user: &UserRecord,
        matched: &[ClassifiedActivity],
        killed: &HashSet<i32>,
        now: DateTime<Utc>,
    ) -> Result<(), CoreError> {
        let runtime = self.runtime.entry(user.name.clone()).or_default();

        let mut current_pids: HashSet<i32> = HashSet::new();
        for c in matched {
            let Some(pid) = c.activity.pid else { continue };
            if !c.pattern.category.is_tracked() {
                continue;
            }
            current_pids.insert(pid);
            if !runtime.open_sessions.contains_key(&pid) {
                let session_id = self.db.open_session(&user.name, c.pattern.id, now)?;
                runtime.open_sessions.insert(pid, session_id);
            }
        }

        let gone: Vec<(i32, i64)> = runtime
            .open_sessions
            .iter()
            .filter(|(pid, _)| !current_pids.contains(pid))
            .map(|(pid, session)| (*pid, *session))
            .collect();
        for (pid, session_id) in gone {
            let reason = if killed.contains(&pid) {
                EndReason::Enforced
            } else {
                EndReason::Natural
            };
            self.db.close_session(session_id, now, reason)?;
            runtime.open_sessions.remove(&pid);
        }
        Ok(())
    }

    /// Emit `day_reset` when a fresh day's row replaces yesterday's.
    fn day_reset_event(
        &self,
        user: &UserRecord,
        today: NaiveDate,
        now: DateTime<Utc>,
        events: &mut Vec<Event>,
    ) -> Result<(), CoreError> {
        let yesterday = today.pred_opt().unwrap_or(today);
        if self.db.load_daily_summary(&user.name, yesterday)?.is_none() {
            return Ok(());
        }
        let limits = self
            .db
            .get_limits(&user.name)?
            .unwrap_or_else(|| Limits::new(&user.name));
        let weekday = now.with_timezone(&Local).weekday().num_days_from_monday() as usize;
        events.push(Event::new(
            Intention::DayReset,
            &user.name,
            TemplateVars {
                user: user.name.clone(),
                time_limit: limits.effective_gaming_limit_min(weekday),
                time_left: limits.effective_gaming_limit_min(weekday),
                day: now.with_timezone(&Local).format("%A").to_string(),
                ..TemplateVars::default()
            },
            now,
        ));
        Ok(())
    }
}

/// Union the worker streams by key. A Proton activity that shares a
/// PID with a plain process activity wins and inherits its smoothed
/// CPU figure, so the disambiguated key is the one that gets tracked.
fn merge_activities(raw: Vec<DetectedActivity>) -> Vec<DetectedActivity> {
    let process_cpu: HashMap<i32, Option<f32>> = raw
        .iter()
        .filter(|a| a.source == ActivitySource::Process)
        .filter_map(|a| a.pid.map(|pid| (pid, a.cpu_percent)))
        .collect();
    let proton_pids: HashSet<i32> = raw
        .iter()
        .filter(|a| a.source == ActivitySource::Proton)
        .filter_map(|a| a.pid)
        .collect();

    let mut merged: Vec<DetectedActivity> = Vec::new();
    let mut seen_keys: HashSet<String> = HashSet::new();
    for mut activity in raw {
        match activity.source {
            ActivitySource::Process => {
                if activity.pid.is_some_and(|pid| proton_pids.contains(&pid)) {
                    continue; // superseded by the Proton key
                }
            }
            ActivitySource::Proton => {
                if let Some(pid) = activity.pid {
                    if activity.cpu_percent.is_none() {
                        activity.cpu_percent = process_cpu.get(&pid).copied().flatten();
                    }
                }
            }
            ActivitySource::Browser(_) => {}
        }
        if seen_keys.insert(activity.key.clone()) {
            merged.push(activity);
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn activity(
        key: &str,
        source: ActivitySource,
        pid: Option<i32>,
        cpu: Option<f32>,
    ) -> DetectedActivity {
        DetectedActivity {
            key: key.into(),
            source,
            pid,
            cpu_percent: cpu,
            cmdline: None,
        }
    }

    #[test]
    fn proton_key_supersedes_process_key_and_takes_cpu() {
        let merged = merge_activities(vec![
            activity("FalloutNV.exe", ActivitySource::Process, Some(300), Some(42.0)),
            activity("FalloutNV", ActivitySource::Proton, Some(300), None),
            activity("factorio", ActivitySource::Process, Some(400), Some(12.0)),
        ]);
        let keys: Vec<&str> = merged.iter().map(|a| a.key.as_str()).collect();
        assert_eq!(keys, vec!["FalloutNV", "factorio"]);
        assert_eq!(merged[0].cpu_percent, Some(42.0));
    }

    #[test]
    fn browser_streams_merge_without_shadowing() {
        let merged = merge_activities(vec![
            activity("discord.com", ActivitySource::Browser("chrome".into()), None, None),
            activity("ixl.com", ActivitySource::Browser("firefox".into()), None, None),
            activity("discord.com", ActivitySource::Browser("firefox".into()), None, None),
        ]);
        let keys: Vec<&str> = merged.iter().map(|a| a.key.as_str()).collect();
        assert_eq!(keys, vec!["discord.com", "ixl.com"]);
    }

    #[test]
    fn logical_date_rolls_at_reset_hour() {
        // 02:00 local on the 2nd still belongs to the 1st with a 04:00
        // reset. Build the instant from local components so the test
        // is timezone-independent.
        let local = Local
            .with_ymd_and_hms(2026, 8, 2, 2, 0, 0)
            .single()
            .unwrap();
        let date = logical_date(local.with_timezone(&Utc), 4);
        assert_eq!(date, NaiveDate::from_ymd_opt(2026, 8, 1).unwrap());

        let later = Local
            .with_ymd_and_hms(2026, 8, 2, 5, 0, 0)
            .single()
            .unwrap();
        assert_eq!(
            logical_date(later.with_timezone(&Utc), 4),
            NaiveDate::from_ymd_opt(2026, 8, 2).unwrap()
        );
    }
}
