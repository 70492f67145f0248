//! SQLite-backed store for all persisted state.
//!
//! Single writer: every component goes through this API. All writes
//! are transactional; `save_daily_summary` is an UPSERT keyed by
//! `(user, date)` so a retried tick can never produce duplicate rows.

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;

use crate::error::{CoreError, DatabaseError};
use crate::kernel::KernelState;
use crate::notify::Urgency;
use crate::pattern::{compile_rule, Category, MonitorState, Pattern, PatternType};
use crate::schedule::WeekSchedule;

use super::migrations;

/// A monitored user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub id: i64,
    pub name: String,
    /// Numeric system identity.
    pub uid: u32,
    pub enabled: bool,
}

/// Per-user budget configuration.
#[derive(Debug, Clone)]
pub struct Limits {
    pub user: String,
    /// Daily gaming budget in minutes.
    pub gaming_limit_min: i64,
    /// Optional per-weekday overrides, Monday first.
    pub per_day_gaming_min: [Option<i64>; 7],
    /// Optional ceiling across all tracked categories.
    pub daily_total_min: Option<i64>,
    /// Overrides the configured grace period when set.
    pub grace_period_sec: Option<i64>,
    pub schedule: Option<WeekSchedule>,
}

impl Limits {
    pub fn new(user: &str) -> Self {
        Self {
            user: user.to_string(),
            gaming_limit_min: 120,
            per_day_gaming_min: [None; 7],
            daily_total_min: None,
            grace_period_sec: None,
            schedule: None,
        }
    }

    /// Gaming budget for a weekday (0 = Monday), in minutes.
    pub fn effective_gaming_limit_min(&self, weekday: usize) -> i64 {
        self.per_day_gaming_min
            .get(weekday)
            .copied()
            .flatten()
            .unwrap_or(self.gaming_limit_min)
    }
}

/// One row per `(user, date)`; the kernel's persisted state.
#[derive(Debug, Clone)]
pub struct DailySummary {
    pub user: String,
    pub date: NaiveDate,
    pub state: KernelState,
    pub gaming_active: bool,
    pub gaming_time_sec: i64,
    pub total_time_sec: i64,
    pub gaming_started_at: Option<DateTime<Utc>>,
    pub last_poll_at: Option<DateTime<Utc>>,
    pub warned_30: bool,
    pub warned_15: bool,
    pub warned_5: bool,
    pub grace_started_at: Option<DateTime<Utc>>,
    pub last_state_change: Option<DateTime<Utc>>,
}

impl DailySummary {
    /// Fresh row for the first activity of a day.
    pub fn fresh(user: &str, date: NaiveDate) -> Self {
        Self {
            user: user.to_string(),
            date,
            state: KernelState::Available,
            gaming_active: false,
            gaming_time_sec: 0,
            total_time_sec: 0,
            gaming_started_at: None,
            last_poll_at: None,
            warned_30: false,
            warned_15: false,
            warned_5: false,
            grace_started_at: None,
            last_state_change: None,
        }
    }

    /// Read a per-threshold warning flag. Unknown thresholds read as
    /// already-warned so a misconfigured threshold can never spam.
    pub fn warned(&self, threshold: u32) -> bool {
        match threshold {
            30 => self.warned_30,
            15 => self.warned_15,
            5 => self.warned_5,
            _ => true,
        }
    }

    pub fn set_warned(&mut self, threshold: u32) {
        match threshold {
            30 => self.warned_30 = true,
            15 => self.warned_15 = true,
            5 => self.warned_5 = true,
            _ => {}
        }
    }
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    Natural,
    Enforced,
    Logout,
    Unknown,
}

impl EndReason {
    pub fn as_str(self) -> &'static str {
        match self {
            EndReason::Natural => "natural",
            EndReason::Enforced => "enforced",
            EndReason::Logout => "logout",
            EndReason::Unknown => "unknown",
        }
    }
}

/// One contiguous run of a tracked activity.
#[derive(Debug, Clone)]
pub struct SessionRecord {
    pub id: i64,
    pub user: String,
    pub pattern_id: i64,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_sec: Option<i64>,
    pub end_reason: Option<String>,
}

/// Append-only record of one enforcement action.
#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub user: String,
    pub pid: i32,
    pub process_name: String,
    pub pattern_id: Option<i64>,
    pub reason: String,
    pub signal_sent: String,
    pub exit_observed: bool,
}

/// One wording variant for an intention.
#[derive(Debug, Clone)]
pub struct MessageTemplate {
    pub id: i64,
    pub intention: String,
    pub variant: i64,
    pub title: String,
    pub body: String,
    pub icon: String,
    pub urgency: Urgency,
    pub enabled: bool,
}

/// An unclassified activity being watched for promotion.
#[derive(Debug, Clone)]
pub struct DiscoveryCandidate {
    pub id: i64,
    pub owner: String,
    pub pattern_type: PatternType,
    pub key: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub samples: i64,
    pub accumulated_runtime_sec: i64,
    pub cmdline: Option<String>,
}

/// Fields for a new pattern row.
#[derive(Debug, Clone)]
pub struct NewPattern {
    pub owner: Option<String>,
    pub pattern_type: PatternType,
    pub regex: String,
    pub display_name: String,
    pub category: Category,
    pub monitor_state: MonitorState,
    pub priority: i64,
    pub browser: Option<String>,
    pub cpu_threshold: Option<f32>,
    pub discovered_cmdline: Option<String>,
}

/// Retention windows for [`Database::maintenance`].
#[derive(Debug, Clone, Copy)]
pub struct RetentionPolicy {
    pub events_days: i64,
    pub sessions_days: i64,
    pub message_log_days: i64,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            events_days: 30,
            sessions_days: 90,
            message_log_days: 7,
        }
    }
}

/// Rows deleted by a maintenance pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct MaintenanceReport {
    pub events_deleted: usize,
    pub sessions_deleted: usize,
    pub messages_deleted: usize,
}

/// The embedded store.
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open (creating and migrating as needed) the database at `path`.
    ///
    /// # Errors
    /// [`DatabaseError::OpenFailed`] is the daemon's only fatal store
    /// error.
    pub fn open(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| DatabaseError::MigrationFailed(e.to_string()))?;
        }
        let conn = Connection::open(path).map_err(|source| DatabaseError::OpenFailed {
            path: path.to_path_buf(),
            source,
        })?;
        Self::initialize(conn)
    }

    /// In-memory database for tests.
    pub fn open_in_memory() -> Result<Self, DatabaseError> {
        let conn = Connection::open_in_memory().map_err(|source| DatabaseError::OpenFailed {
            path: ":memory:".into(),
            source,
        })?;
        Self::initialize(conn)
    }

    fn initialize(conn: Connection) -> Result<Self, DatabaseError> {
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        conn.pragma_update(None, "foreign_keys", "ON").ok();
        migrations::migrate(&conn).map_err(|e| DatabaseError::MigrationFailed(e.to_string()))?;
        let db = Self { conn };
        db.seed_default_patterns()?;
        db.seed_default_templates()?;
        Ok(db)
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    // ── Change epoch ─────────────────────────────────────────────────

    /// Monotonic counter bumped by every admin write; the daemon
    /// rebuilds its caches when it moves.
    pub fn change_epoch(&self) -> Result<i64, DatabaseError> {
        let value: Option<String> = self
            .conn
            .query_row(
                "SELECT value FROM meta WHERE key = 'change_epoch'",
                [],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value.and_then(|v| v.parse().ok()).unwrap_or(0))
    }

    pub fn bump_epoch(&self) -> Result<(), DatabaseError> {
        let next = self.change_epoch()? + 1;
        self.conn.execute(
            "INSERT INTO meta (key, value) VALUES ('change_epoch', ?1)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![next.to_string()],
        )?;
        Ok(())
    }

    // ── Users & limits ───────────────────────────────────────────────

    pub fn get_users(&self) -> Result<Vec<UserRecord>, DatabaseError> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, name, uid, enabled FROM users ORDER BY name")?;
        let rows = stmt.query_map([], |row| {
            Ok(UserRecord {
                id: row.get(0)?,
                name: row.get(1)?,
                uid: row.get::<_, i64>(2)? as u32,
                enabled: row.get::<_, i64>(3)? != 0,
            })
        })?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    pub fn get_user(&self, name: &str) -> Result<Option<UserRecord>, DatabaseError> {
        Ok(self
            .conn
            .query_row(
                "SELECT id, name, uid, enabled FROM users WHERE name = ?1",
                params![name],
                |row| {
                    Ok(UserRecord {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        uid: row.get::<_, i64>(2)? as u32,
                        enabled: row.get::<_, i64>(3)? != 0,
                    })
                },
            )
            .optional()?)
    }

    /// Insert or update a user and ensure a limits row exists.
    pub fn upsert_user(&self, name: &str, uid: u32, enabled: bool) -> Result<(), DatabaseError> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "INSERT INTO users (name, uid, enabled) VALUES (?1, ?2, ?3)
             ON CONFLICT(name) DO UPDATE SET uid = excluded.uid, enabled = excluded.enabled",
            params![name, uid as i64, enabled as i64],
        )?;
        tx.execute(
            "INSERT OR IGNORE INTO limits (user, schedule) VALUES (?1, ?2)",
            params![name, "1".repeat(168)],
        )?;
        tx.commit()?;
        self.bump_epoch()
    }

    pub fn get_limits(&self, user: &str) -> Result<Option<Limits>, DatabaseError> {
        let row = self
            .conn
            .query_row(
                "SELECT gaming_limit_min,
                        gaming_limit_mon, gaming_limit_tue, gaming_limit_wed,
                        gaming_limit_thu, gaming_limit_fri, gaming_limit_sat,
                        gaming_limit_sun,
                        daily_total_min, grace_period_sec, schedule
                 FROM limits WHERE user = ?1",
                params![user],
                |row| {
                    let schedule: Option<String> = row.get(10)?;
                    Ok(Limits {
                        user: user.to_string(),
                        gaming_limit_min: row.get(0)?,
                        per_day_gaming_min: [
                            row.get(1)?,
                            row.get(2)?,
                            row.get(3)?,
                            row.get(4)?,
                            row.get(5)?,
                            row.get(6)?,
                            row.get(7)?,
                        ],
                        daily_total_min: row.get(8)?,
                        grace_period_sec: row.get(9)?,
                        schedule: schedule.and_then(|s| WeekSchedule::parse(&s).ok()),
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    pub fn set_limits(&self, limits: &Limits) -> Result<(), DatabaseError> {
        let schedule = limits
            .schedule
            .as_ref()
            .map(|s| s.as_str().to_string())
            .unwrap_or_else(|| "1".repeat(168));
        self.conn.execute(
            "INSERT INTO limits (user, gaming_limit_min,
                 gaming_limit_mon, gaming_limit_tue, gaming_limit_wed,
                 gaming_limit_thu, gaming_limit_fri, gaming_limit_sat,
                 gaming_limit_sun, daily_total_min, grace_period_sec, schedule)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
             ON CONFLICT(user) DO UPDATE SET
                 gaming_limit_min = excluded.gaming_limit_min,
                 gaming_limit_mon = excluded.gaming_limit_mon,
                 gaming_limit_tue = excluded.gaming_limit_tue,
                 gaming_limit_wed = excluded.gaming_limit_wed,
                 gaming_limit_thu = excluded.gaming_limit_thu,
                 gaming_limit_fri = excluded.gaming_limit_fri,
                 gaming_limit_sat = excluded.gaming_limit_sat,
                 gaming_limit_sun = excluded.gaming_limit_sun,
                 daily_total_min = excluded.daily_total_min,
                 grace_period_sec = excluded.grace_period_sec,
                 schedule = excluded.schedule",
            params![
                limits.user,
                limits.gaming_limit_min,
                limits.per_day_gaming_min[0],
                limits.per_day_gaming_min[1],
                limits.per_day_gaming_min[2],
                limits.per_day_gaming_min[3],
                limits.per_day_gaming_min[4],
                limits.per_day_gaming_min[5],
                limits.per_day_gaming_min[6],
                limits.daily_total_min,
                limits.grace_period_sec,
                schedule,
            ],
        )?;
        self.bump_epoch()
    }

    /// Schedule grid for a user; `None` means no limits row.
    pub fn get_schedule(&self, user: &str) -> Result<Option<WeekSchedule>, DatabaseError> {
        Ok(self.get_limits(user)?.map(|l| {
            l.schedule.unwrap_or_else(WeekSchedule::all_allowed)
        }))
    }

    /// Replace a user's full 168-slot grid.
    pub fn set_schedule(&self, user: &str, schedule: &WeekSchedule) -> Result<(), DatabaseError> {
        let changed = self.conn.execute(
            "UPDATE limits SET schedule = ?1 WHERE user = ?2",
            params![schedule.as_str(), user],
        )?;
        if changed == 0 {
            return Err(DatabaseError::NotFound(format!("no limits for user {user}")));
        }
        self.bump_epoch()
    }

    /// Flip a single slot in a user's grid.
    pub fn set_schedule_slot(
        &self,
        user: &str,
        slot: usize,
        allowed: bool,
    ) -> Result<(), DatabaseError> {
        let mut schedule = self
            .get_schedule(user)?
            .ok_or_else(|| DatabaseError::NotFound(format!("no limits for user {user}")))?;
        schedule.set_slot(slot, allowed);
        self.set_schedule(user, &schedule)
    }

    // ── Patterns ─────────────────────────────────────────────────────

    /// All patterns, or only those visible to `owner` (their own plus
    /// global) when given.
    pub fn list_patterns(&self, owner: Option<&str>) -> Result<Vec<Pattern>, DatabaseError> {
        const COLUMNS: &str = "id, owner, pattern_type, pattern_regex, display_name, category,
                               monitor_state, priority, browser, cpu_threshold, sample_window_sec,
                               min_samples, discovered_cmdline, times_seen, total_runtime_sec";
        match owner {
            Some(user) => {
                let mut stmt = self.conn.prepare(&format!(
                    "SELECT {COLUMNS} FROM patterns
                     WHERE owner = ?1 OR owner IS NULL ORDER BY priority, id"
                ))?;
                let rows = stmt.query_map(params![user], row_to_pattern)?;
                Ok(rows.collect::<Result<_, _>>()?)
            }
            None => {
                let mut stmt = self.conn.prepare(&format!(
                    "SELECT {COLUMNS} FROM patterns ORDER BY priority, id"
                ))?;
                let rows = stmt.query_map([], row_to_pattern)?;
                Ok(rows.collect::<Result<_, _>>()?)
            }
        }
    }

    pub fn get_pattern(&self, id: i64) -> Result<Option<Pattern>, DatabaseError> {
        Ok(self
            .conn
            .query_row(
                "SELECT id, owner, pattern_type, pattern_regex, display_name, category,
                        monitor_state, priority, browser, cpu_threshold, sample_window_sec,
                        min_samples, discovered_cmdline, times_seen, total_runtime_sec
                 FROM patterns WHERE id = ?1",
                params![id],
                row_to_pattern,
            )
            .optional()?)
    }

    /// Insert a new pattern; the regex is compiled first and rejected
    /// if invalid.
    pub fn insert_pattern(&self, pattern: &NewPattern) -> Result<i64, CoreError> {
        compile_rule(&pattern.regex)?;
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO patterns (owner, pattern_type, pattern_regex, display_name,
                 category, monitor_state, priority, browser, cpu_threshold,
                 discovered_cmdline, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11)",
            params![
                pattern.owner,
                pattern.pattern_type.as_str(),
                pattern.regex,
                pattern.display_name,
                pattern.category.as_str(),
                pattern.monitor_state.as_str(),
                pattern.priority,
                pattern.browser,
                pattern.cpu_threshold,
                pattern.discovered_cmdline,
                now,
            ],
        )
        .map_err(DatabaseError::from)?;
        self.bump_epoch()?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Change a pattern's state (promote/ignore), optionally recategorizing
    /// and renaming it.
    pub fn set_pattern_state(
        &self,
        id: i64,
        state: MonitorState,
        category: Option<Category>,
        display_name: Option<&str>,
    ) -> Result<(), DatabaseError> {
        let now = Utc::now().to_rfc3339();
        let changed = self.conn.execute(
            "UPDATE patterns SET
                 monitor_state = ?1,
                 category = COALESCE(?2, category),
                 display_name = COALESCE(?3, display_name),
                 updated_at = ?4
             WHERE id = ?5",
            params![state.as_str(), category.map(|c| c.as_str()), display_name, now, id],
        )?;
        if changed == 0 {
            return Err(DatabaseError::NotFound(format!("no pattern {id}")));
        }
        self.bump_epoch()
    }

    /// Bump match statistics for a pattern.
    pub fn touch_pattern_stats(
        &self,
        id: i64,
        runtime_sec: i64,
        now: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        self.conn.execute(
            "UPDATE patterns SET
                 times_seen = times_seen + 1,
                 total_runtime_sec = total_runtime_sec + ?1,
                 last_seen_at = ?2
             WHERE id = ?3",
            params![runtime_sec, now.to_rfc3339(), id],
        )?;
        Ok(())
    }

    /// Pattern already covering `key` for this owner (any state), by
    /// display name. Used to stop discovery from re-flagging something
    /// the admin has already seen.
    pub fn find_pattern_by_key(
        &self,
        owner: &str,
        pattern_type: PatternType,
        key: &str,
    ) -> Result<Option<Pattern>, DatabaseError> {
        Ok(self
            .conn
            .query_row(
                "SELECT id, owner, pattern_type, pattern_regex, display_name, category,
                        monitor_state, priority, browser, cpu_threshold, sample_window_sec,
                        min_samples, discovered_cmdline, times_seen, total_runtime_sec
                 FROM patterns
                 WHERE display_name = ?1 AND pattern_type = ?2
                   AND (owner = ?3 OR owner IS NULL)
                 ORDER BY owner IS NULL
                 LIMIT 1",
                params![key, pattern_type.as_str(), owner],
                row_to_pattern,
            )
            .optional()?)
    }

    // ── Discovery candidates ─────────────────────────────────────────

    pub fn list_candidates(&self) -> Result<Vec<DiscoveryCandidate>, DatabaseError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, owner, pattern_type, key, first_seen, last_seen,
                    samples, accumulated_runtime_sec, cmdline
             FROM discovery_candidates ORDER BY last_seen DESC",
        )?;
        let rows = stmt.query_map([], row_to_candidate)?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    /// Record one observation of an unclassified activity. The sample
    /// window restarts when the candidate has gone stale.
    pub fn record_candidate_sample(
        &self,
        owner: &str,
        pattern_type: PatternType,
        key: &str,
        runtime_sec: i64,
        cmdline: Option<&str>,
        window_sec: i64,
        now: DateTime<Utc>,
    ) -> Result<DiscoveryCandidate, DatabaseError> {
        let now_text = now.to_rfc3339();
        let existing: Option<(i64, String)> = self
            .conn
            .query_row(
                "SELECT id, last_seen FROM discovery_candidates
                 WHERE owner = ?1 AND pattern_type = ?2 AND key = ?3",
                params![owner, pattern_type.as_str(), key],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        match existing {
            Some((id, last_seen)) => {
                let stale = parse_ts(Some(last_seen))
                    .map(|t| (now - t).num_seconds() > window_sec)
                    .unwrap_or(true);
                if stale {
                    // Out of window: restart the observation.
                    self.conn.execute(
                        "UPDATE discovery_candidates SET
                             first_seen = ?1, last_seen = ?1, samples = 1,
                             accumulated_runtime_sec = ?2, cmdline = COALESCE(?3, cmdline)
                         WHERE id = ?4",
                        params![now_text, runtime_sec, cmdline, id],
                    )?;
                } else {
                    self.conn.execute(
                        "UPDATE discovery_candidates SET
                             last_seen = ?1, samples = samples + 1,
                             accumulated_runtime_sec = accumulated_runtime_sec + ?2,
                             cmdline = COALESCE(?3, cmdline)
                         WHERE id = ?4",
                        params![now_text, runtime_sec, cmdline, id],
                    )?;
                }
            }
            None => {
                self.conn.execute(
                    "INSERT INTO discovery_candidates
                         (owner, pattern_type, key, first_seen, last_seen, samples,
                          accumulated_runtime_sec, cmdline)
                     VALUES (?1, ?2, ?3, ?4, ?4, 1, ?5, ?6)",
                    params![owner, pattern_type.as_str(), key, now_text, runtime_sec, cmdline],
                )?;
            }
        }

        self.conn
            .query_row(
                "SELECT id, owner, pattern_type, key, first_seen, last_seen,
                        samples, accumulated_runtime_sec, cmdline
                 FROM discovery_candidates
                 WHERE owner = ?1 AND pattern_type = ?2 AND key = ?3",
                params![owner, pattern_type.as_str(), key],
                row_to_candidate,
            )
            .map_err(DatabaseError::from)
    }

    /// Atomically turn a candidate into a `discovered` pattern and
    /// drop the candidate row. Returns the new pattern id.
    pub fn promote_candidate(
        &self,
        candidate: &DiscoveryCandidate,
        category: Category,
        cpu_threshold: Option<f32>,
    ) -> Result<i64, DatabaseError> {
        let now = Utc::now().to_rfc3339();
        let tx = self.conn.unchecked_transaction()?;
        let browser = match candidate.pattern_type {
            PatternType::BrowserDomain => Some("browser"),
            PatternType::Process => None,
        };
        tx.execute(
            "INSERT INTO patterns (owner, pattern_type, pattern_regex, display_name,
                 category, monitor_state, priority, browser, cpu_threshold,
                 discovered_cmdline, created_at, updated_at, last_seen_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 'discovered', 100, ?6, ?7, ?8, ?9, ?9, ?9)",
            params![
                candidate.owner,
                candidate.pattern_type.as_str(),
                regex::escape(&candidate.key),
                candidate.key,
                category.as_str(),
                browser,
                cpu_threshold,
                candidate.cmdline,
                now,
            ],
        )?;
        let pattern_id = tx.last_insert_rowid();
        tx.execute(
            "DELETE FROM discovery_candidates WHERE id = ?1",
            params![candidate.id],
        )?;
        tx.commit()?;
        self.bump_epoch()?;
        Ok(pattern_id)
    }

    // ── Sessions ─────────────────────────────────────────────────────

    pub fn open_session(
        &self,
        user: &str,
        pattern_id: i64,
        started_at: DateTime<Utc>,
    ) -> Result<i64, DatabaseError> {
        self.conn.execute(
            "INSERT INTO sessions (user, pattern_id, started_at) VALUES (?1, ?2, ?3)",
            params![user, pattern_id, started_at.to_rfc3339()],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn close_session(
        &self,
        session_id: i64,
        ended_at: DateTime<Utc>,
        reason: EndReason,
    ) -> Result<(), DatabaseError> {
        let started: Option<String> = self
            .conn
            .query_row(
                "SELECT started_at FROM sessions WHERE id = ?1 AND ended_at IS NULL",
                params![session_id],
                |row| row.get(0),
            )
            .optional()?;
        let Some(started) = parse_ts(started) else {
            return Ok(()); // already sealed or never existed
        };
        let duration = (ended_at - started).num_seconds().max(0);
        self.conn.execute(
            "UPDATE sessions SET ended_at = ?1, duration_sec = ?2, end_reason = ?3
             WHERE id = ?4",
            params![ended_at.to_rfc3339(), duration, reason.as_str(), session_id],
        )?;
        Ok(())
    }

    /// Sessions still in flight (`ended_at` null).
    pub fn open_sessions(&self) -> Result<Vec<SessionRecord>, DatabaseError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, user, pattern_id, started_at, ended_at, duration_sec, end_reason
             FROM sessions WHERE ended_at IS NULL ORDER BY id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(SessionRecord {
                id: row.get(0)?,
                user: row.get(1)?,
                pattern_id: row.get(2)?,
                started_at: parse_ts(row.get(3)?).unwrap_or_else(Utc::now),
                ended_at: parse_ts(row.get(4)?),
                duration_sec: row.get(5)?,
                end_reason: row.get(6)?,
            })
        })?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    /// Seal every in-flight session, used at shutdown and when the
    /// daemon finds stale rows from a crash at startup.
    pub fn close_all_open_sessions(
        &self,
        ended_at: DateTime<Utc>,
        reason: EndReason,
    ) -> Result<usize, DatabaseError> {
        let open = self.open_sessions()?;
        for session in &open {
            self.close_session(session.id, ended_at, reason)?;
        }
        Ok(open.len())
    }

    // ── Daily summary ────────────────────────────────────────────────

    pub fn load_daily_summary(
        &self,
        user: &str,
        date: NaiveDate,
    ) -> Result<Option<DailySummary>, DatabaseError> {
        Ok(self
            .conn
            .query_row(
                "SELECT state, gaming_active, gaming_time_sec, total_time_sec,
                        gaming_started_at, last_poll_at, warned_30, warned_15,
                        warned_5, grace_started_at, last_state_change
                 FROM daily_summary WHERE user = ?1 AND date = ?2",
                params![user, date.to_string()],
                |row| {
                    let state: String = row.get(0)?;
                    Ok(DailySummary {
                        user: user.to_string(),
                        date,
                        state: state.parse().unwrap_or(KernelState::Available),
                        gaming_active: row.get::<_, i64>(1)? != 0,
                        gaming_time_sec: row.get(2)?,
                        total_time_sec: row.get(3)?,
                        gaming_started_at: parse_ts(row.get(4)?),
                        last_poll_at: parse_ts(row.get(5)?),
                        warned_30: row.get::<_, i64>(6)? != 0,
                        warned_15: row.get::<_, i64>(7)? != 0,
                        warned_5: row.get::<_, i64>(8)? != 0,
                        grace_started_at: parse_ts(row.get(9)?),
                        last_state_change: parse_ts(row.get(10)?),
                    })
                },
            )
            .optional()?)
    }

    /// UPSERT keyed by `(user, date)`; idempotent by construction so a
    /// failed tick can simply retry.
    pub fn save_daily_summary(&self, summary: &DailySummary) -> Result<(), DatabaseError> {
        self.conn.execute(
            "INSERT INTO daily_summary
                 (date, user, state, gaming_active, gaming_time_sec, total_time_sec,
                  gaming_started_at, last_poll_at, warned_30, warned_15, warned_5,
                  grace_started_at, last_state_change)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
             ON CONFLICT(date, user) DO UPDATE SET
                 state = excluded.state,
                 gaming_active = excluded.gaming_active,
                 gaming_time_sec = excluded.gaming_time_sec,
                 total_time_sec = excluded.total_time_sec,
                 gaming_started_at = excluded.gaming_started_at,
                 last_poll_at = excluded.last_poll_at,
                 warned_30 = excluded.warned_30,
                 warned_15 = excluded.warned_15,
                 warned_5 = excluded.warned_5,
                 grace_started_at = excluded.grace_started_at,
                 last_state_change = excluded.last_state_change",
            params![
                summary.date.to_string(),
                summary.user,
                summary.state.as_str(),
                summary.gaming_active as i64,
                summary.gaming_time_sec,
                summary.total_time_sec,
                summary.gaming_started_at.map(|t| t.to_rfc3339()),
                summary.last_poll_at.map(|t| t.to_rfc3339()),
                summary.warned_30 as i64,
                summary.warned_15 as i64,
                summary.warned_5 as i64,
                summary.grace_started_at.map(|t| t.to_rfc3339()),
                summary.last_state_change.map(|t| t.to_rfc3339()),
            ],
        )?;
        Ok(())
    }

    // ── Audit & events ───────────────────────────────────────────────

    pub fn append_audit(&self, entry: &AuditEntry) -> Result<(), DatabaseError> {
        self.conn.execute(
            "INSERT INTO audit (timestamp, user, pid, process_name, pattern_id,
                 reason, signal_sent, exit_observed)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                entry.timestamp.to_rfc3339(),
                entry.user,
                entry.pid,
                entry.process_name,
                entry.pattern_id,
                entry.reason,
                entry.signal_sent,
                entry.exit_observed as i64,
            ],
        )?;
        Ok(())
    }

    pub fn list_audit(
        &self,
        user: Option<&str>,
        limit: usize,
    ) -> Result<Vec<AuditEntry>, DatabaseError> {
        const COLUMNS: &str = "id, timestamp, user, pid, process_name, pattern_id, reason,
                               signal_sent, exit_observed";
        let limit = limit as i64;
        match user {
            Some(u) => {
                let mut stmt = self.conn.prepare(&format!(
                    "SELECT {COLUMNS} FROM audit WHERE user = ?1 ORDER BY id DESC LIMIT ?2"
                ))?;
                let rows = stmt.query_map(params![u, limit], row_to_audit)?;
                Ok(rows.collect::<Result<_, _>>()?)
            }
            None => {
                let mut stmt = self.conn.prepare(&format!(
                    "SELECT {COLUMNS} FROM audit ORDER BY id DESC LIMIT ?1"
                ))?;
                let rows = stmt.query_map(params![limit], row_to_audit)?;
                Ok(rows.collect::<Result<_, _>>()?)
            }
        }
    }

    /// Append a row to the activity event log.
    pub fn append_event(
        &self,
        user: &str,
        event_type: &str,
        process: Option<&str>,
        category: Option<&str>,
        details: Option<&str>,
        pid: Option<i32>,
    ) -> Result<(), DatabaseError> {
        self.conn.execute(
            "INSERT INTO events (timestamp, user, event_type, process, category, details, pid)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![Utc::now().to_rfc3339(), user, event_type, process, category, details, pid],
        )?;
        Ok(())
    }

    // ── Templates & message log ──────────────────────────────────────

    pub fn list_templates(
        &self,
        intention: Option<&str>,
    ) -> Result<Vec<MessageTemplate>, DatabaseError> {
        match intention {
            Some(intention) => {
                let mut stmt = self.conn.prepare(
                    "SELECT id, intention, variant, title, body, icon, urgency, enabled
                     FROM templates WHERE intention = ?1 ORDER BY intention, variant",
                )?;
                let rows = stmt.query_map(params![intention], row_to_template)?;
                Ok(rows.collect::<Result<_, _>>()?)
            }
            None => {
                let mut stmt = self.conn.prepare(
                    "SELECT id, intention, variant, title, body, icon, urgency, enabled
                     FROM templates ORDER BY intention, variant",
                )?;
                let rows = stmt.query_map([], row_to_template)?;
                Ok(rows.collect::<Result<_, _>>()?)
            }
        }
    }

    pub fn enabled_templates(&self, intention: &str) -> Result<Vec<MessageTemplate>, DatabaseError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, intention, variant, title, body, icon, urgency, enabled
             FROM templates WHERE intention = ?1 AND enabled = 1 ORDER BY variant",
        )?;
        let rows = stmt.query_map(params![intention], row_to_template)?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    pub fn insert_template(
        &self,
        intention: &str,
        variant: i64,
        title: &str,
        body: &str,
        icon: &str,
        urgency: Urgency,
    ) -> Result<i64, DatabaseError> {
        self.conn.execute(
            "INSERT INTO templates (intention, variant, title, body, icon, urgency, enabled)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1)",
            params![intention, variant, title, body, icon, urgency.as_str()],
        )?;
        self.bump_epoch()?;
        Ok(self.conn.last_insert_rowid())
    }

    #[allow(clippy::too_many_arguments)]
    pub fn append_message_log(
        &self,
        user: &str,
        intention: &str,
        template_id: Option<i64>,
        rendered_title: &str,
        rendered_body: &str,
        backend: &str,
        notification_id: i64,
    ) -> Result<(), DatabaseError> {
        self.conn.execute(
            "INSERT INTO message_log (timestamp, user, intention, template_id,
                 rendered_title, rendered_body, backend, notification_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                Utc::now().to_rfc3339(),
                user,
                intention,
                template_id,
                rendered_title,
                rendered_body,
                backend,
                notification_id,
            ],
        )?;
        Ok(())
    }

    // ── Maintenance ──────────────────────────────────────────────────

    /// Purge rows past their retention window and compact the file.
    /// Daily summaries and audit are kept indefinitely.
    pub fn maintenance(
        &self,
        policy: &RetentionPolicy,
    ) -> Result<MaintenanceReport, DatabaseError> {
        let now = Utc::now();
        let cutoff = |days: i64| (now - chrono::Duration::days(days)).to_rfc3339();

        let events_deleted = self.conn.execute(
            "DELETE FROM events WHERE timestamp < ?1",
            params![cutoff(policy.events_days)],
        )?;
        let sessions_deleted = self.conn.execute(
            "DELETE FROM sessions WHERE started_at < ?1",
            params![cutoff(policy.sessions_days)],
        )?;
        let messages_deleted = self.conn.execute(
            "DELETE FROM message_log WHERE timestamp < ?1",
            params![cutoff(policy.message_log_days)],
        )?;

        // VACUUM cannot run inside a transaction.
        self.conn.execute_batch("VACUUM")?;

        Ok(MaintenanceReport {
            events_deleted,
            sessions_deleted,
            messages_deleted,
        })
    }

    // ── Seeding ──────────────────────────────────────────────────────

    /// First-start launcher/gaming defaults, global and active.
    fn seed_default_patterns(&self) -> Result<(), DatabaseError> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM patterns", [], |row| row.get(0))?;
        if count > 0 {
            return Ok(());
        }

        let now = Utc::now().to_rfc3339();
        let defaults: &[(&str, &str, Category, Option<f32>)] = &[
            ("^steam$", "Steam Launcher", Category::Launcher, None),
            ("minecraft-launcher", "Minecraft Launcher", Category::Launcher, None),
            (r"java.*minecraft", "Minecraft", Category::Gaming, Some(5.0)),
            ("gamescope", "Steam Game", Category::Gaming, Some(5.0)),
            (r"\.exe$", "Proton Game", Category::Gaming, Some(10.0)),
            ("retroarch", "RetroArch", Category::Gaming, Some(5.0)),
        ];
        for (regex, name, category, cpu) in defaults {
            self.conn.execute(
                "INSERT INTO patterns (owner, pattern_type, pattern_regex, display_name,
                     category, monitor_state, priority, cpu_threshold, created_at, updated_at)
                 VALUES (NULL, 'process', ?1, ?2, ?3, 'active', 100, ?4, ?5, ?5)",
                params![regex, name, category.as_str(), cpu, now],
            )?;
        }
        Ok(())
    }

    /// One enabled variant per intention, in the narrator's voice.
    fn seed_default_templates(&self) -> Result<(), DatabaseError> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM templates", [], |row| row.get(0))?;
        if count > 0 {
            return Ok(());
        }

        let seeds: &[(&str, &str, &str, &str)] = &[
            (
                "process_start",
                "Game On",
                "Ah, {process}! Your timer starts now. {time_left} minutes of gaming left today. Have fun!",
                "normal",
            ),
            (
                "process_end",
                "Game Over",
                "{process} has closed. {time_left} minutes of gaming still on the table.",
                "low",
            ),
            (
                "time_warning_30",
                "Time Check",
                "30 minutes of gaming left for today. Might want to start thinking about a good stopping point.",
                "normal",
            ),
            (
                "time_warning_15",
                "Time Check",
                "15 minutes left. I'll need to close {process} soon - wrap up what you're doing!",
                "normal",
            ),
            (
                "time_warning_5",
                "Five Minutes",
                "5 minutes! {process} closes in 5 minutes. Seriously, save now.",
                "critical",
            ),
            (
                "time_expired",
                "Time's Up",
                "That's your gaming time for today, {user}. {process} will close shortly. Need help with homework? I'm actually pretty good at that.",
                "critical",
            ),
            (
                "enforcement",
                "Closed",
                "Time's up. {process} has been closed. You did good today - see you tomorrow!",
                "critical",
            ),
            (
                "blocked_launch",
                "Nice Try",
                "Gaming time is done for today. {process} isn't happening. Maybe go outside? I hear the graphics are incredible.",
                "critical",
            ),
            (
                "outside_hours_enter",
                "Not Now",
                "Gaming isn't allowed right now on a {day}. Check the schedule - see you at the next open slot.",
                "critical",
            ),
            (
                "day_reset",
                "Fresh Day",
                "New day, fresh timers. {time_limit} minutes of gaming today. Use them wisely!",
                "low",
            ),
            (
                "discovery",
                "New Application Detected",
                "I noticed {process} keeping the CPU busy. I've put it on the review list.",
                "low",
            ),
            (
                "unknown_process",
                "Unknown Application",
                "I don't recognize {process}. It will be closed soon unless it gets approved.",
                "critical",
            ),
        ];
        for (intention, title, body, urgency) in seeds {
            self.conn.execute(
                "INSERT INTO templates (intention, variant, title, body, icon, urgency, enabled)
                 VALUES (?1, 1, ?2, ?3, 'dialog-information', ?4, 1)",
                params![intention, title, body, urgency],
            )?;
        }
        Ok(())
    }
}

fn row_to_audit(row: &rusqlite::Row<'_>) -> rusqlite::Result<AuditEntry> {
    Ok(AuditEntry {
        id: row.get(0)?,
        timestamp: parse_ts(row.get(1)?).unwrap_or_else(Utc::now),
        user: row.get(2)?,
        pid: row.get(3)?,
        process_name: row.get(4)?,
        pattern_id: row.get(5)?,
        reason: row.get(6)?,
        signal_sent: row.get(7)?,
        exit_observed: row.get::<_, i64>(8)? != 0,
    })
}

fn row_to_pattern(row: &rusqlite::Row<'_>) -> rusqlite::Result<Pattern> {
    let pattern_type: String = row.get(2)?;
    let category: String = row.get(5)?;
    let monitor_state: String = row.get(6)?;
    Ok(Pattern {
        id: row.get(0)?,
        owner: row.get(1)?,
        pattern_type: pattern_type.parse().unwrap_or(PatternType::Process),
        regex: row.get(3)?,
        display_name: row.get(4)?,
        category: category.parse().unwrap_or(Category::Ignored),
        monitor_state: monitor_state.parse().unwrap_or(MonitorState::Ignored),
        priority: row.get(7)?,
        browser: row.get(8)?,
        cpu_threshold: row.get(9)?,
        sample_window_sec: row.get(10)?,
        min_samples: row.get(11)?,
        discovered_cmdline: row.get(12)?,
        times_seen: row.get(13)?,
        total_runtime_sec: row.get(14)?,
    })
}

fn row_to_candidate(row: &rusqlite::Row<'_>) -> rusqlite::Result<DiscoveryCandidate> {
    let pattern_type: String = row.get(2)?;
    Ok(DiscoveryCandidate {
        id: row.get(0)?,
        owner: row.get(1)?,
        pattern_type: pattern_type.parse().unwrap_or(PatternType::Process),
        key: row.get(3)?,
        first_seen: parse_ts(row.get(4)?).unwrap_or_else(Utc::now),
        last_seen: parse_ts(row.get(5)?).unwrap_or_else(Utc::now),
        samples: row.get(6)?,
        accumulated_runtime_sec: row.get(7)?,
        cmdline: row.get(8)?,
    })
}

fn row_to_template(row: &rusqlite::Row<'_>) -> rusqlite::Result<MessageTemplate> {
    let urgency: String = row.get(6)?;
    Ok(MessageTemplate {
        id: row.get(0)?,
        intention: row.get(1)?,
        variant: row.get(2)?,
        title: row.get(3)?,
        body: row.get(4)?,
        icon: row.get(5)?,
        urgency: urgency.parse().unwrap_or(Urgency::Normal),
        enabled: row.get::<_, i64>(7)? != 0,
    })
}

/// RFC 3339 text → UTC timestamp; bad or missing text is `None`.
pub fn parse_ts(value: Option<String>) -> Option<DateTime<Utc>> {
    value
        .as_deref()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn db() -> Database {
        Database::open_in_memory().unwrap()
    }

    #[test]
    fn upsert_user_creates_limits_row() {
        let db = db();
        db.upsert_user("anders", 1000, true).unwrap();
        let limits = db.get_limits("anders").unwrap().unwrap();
        assert_eq!(limits.gaming_limit_min, 120);
        assert_eq!(
            db.get_schedule("anders").unwrap().unwrap(),
            WeekSchedule::all_allowed()
        );
    }

    #[test]
    fn per_day_override_wins_over_base_limit() {
        let db = db();
        db.upsert_user("anders", 1000, true).unwrap();
        let mut limits = db.get_limits("anders").unwrap().unwrap();
        limits.per_day_gaming_min[5] = Some(240); // Saturday
        db.set_limits(&limits).unwrap();

        let limits = db.get_limits("anders").unwrap().unwrap();
        assert_eq!(limits.effective_gaming_limit_min(0), 120);
        assert_eq!(limits.effective_gaming_limit_min(5), 240);
    }

    #[test]
    fn daily_summary_upsert_keeps_one_row_per_day() {
        let db = db();
        let date = NaiveDate::from_ymd_opt(2026, 8, 1).unwrap();
        let mut summary = DailySummary::fresh("anders", date);
        summary.gaming_time_sec = 30;
        db.save_daily_summary(&summary).unwrap();
        summary.gaming_time_sec = 60;
        summary.warned_30 = true;
        db.save_daily_summary(&summary).unwrap();

        let count: i64 = db
            .conn()
            .query_row("SELECT COUNT(*) FROM daily_summary", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);

        let loaded = db.load_daily_summary("anders", date).unwrap().unwrap();
        assert_eq!(loaded.gaming_time_sec, 60);
        assert!(loaded.warned_30);
        assert!(!loaded.warned_15);
    }

    #[test]
    fn sessions_seal_with_duration() {
        let db = db();
        let start = Utc::now();
        let id = db.open_session("anders", 1, start).unwrap();
        db.close_session(id, start + chrono::Duration::seconds(90), EndReason::Natural)
            .unwrap();

        let (duration, reason): (i64, String) = db
            .conn()
            .query_row(
                "SELECT duration_sec, end_reason FROM sessions WHERE id = ?1",
                params![id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!(duration, 90);
        assert_eq!(reason, "natural");
    }

    #[test]
    fn stale_open_sessions_seal_as_unknown() {
        let db = db();
        db.open_session("anders", 1, Utc::now()).unwrap();
        db.open_session("anders", 2, Utc::now()).unwrap();
        let sealed = db
            .close_all_open_sessions(Utc::now(), EndReason::Unknown)
            .unwrap();
        assert_eq!(sealed, 2);
        let open: i64 = db
            .conn()
            .query_row(
                "SELECT COUNT(*) FROM sessions WHERE ended_at IS NULL",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(open, 0);
    }

    #[test]
    fn insert_pattern_rejects_bad_regex() {
        let db = db();
        let result = db.insert_pattern(&NewPattern {
            owner: None,
            pattern_type: PatternType::Process,
            regex: "steam(".into(),
            display_name: "Broken".into(),
            category: Category::Gaming,
            monitor_state: MonitorState::Active,
            priority: 100,
            browser: None,
            cpu_threshold: None,
            discovered_cmdline: None,
        });
        assert!(result.is_err());
    }

    #[test]
    fn candidate_promotion_creates_discovered_pattern() {
        let db = db();
        let now = Utc::now();
        let mut candidate = None;
        for _ in 0..3 {
            candidate = Some(
                db.record_candidate_sample(
                    "anders",
                    PatternType::Process,
                    "FalloutNV",
                    30,
                    Some("wine FalloutNV.exe"),
                    120,
                    now,
                )
                .unwrap(),
            );
        }
        let candidate = candidate.unwrap();
        assert_eq!(candidate.samples, 3);
        assert_eq!(candidate.accumulated_runtime_sec, 90);

        let pattern_id = db
            .promote_candidate(&candidate, Category::Gaming, Some(5.0))
            .unwrap();
        let pattern = db.get_pattern(pattern_id).unwrap().unwrap();
        assert_eq!(pattern.monitor_state, MonitorState::Discovered);
        assert_eq!(pattern.category, Category::Gaming);
        assert_eq!(pattern.display_name, "FalloutNV");
        assert!(db.list_candidates().unwrap().is_empty());
    }

    #[test]
    fn stale_candidate_window_restarts() {
        let db = db();
        let t0 = Utc::now();
        db.record_candidate_sample("anders", PatternType::Process, "osu", 30, None, 120, t0)
            .unwrap();
        // Next sample lands past the window; counters restart.
        let t1 = t0 + chrono::Duration::seconds(300);
        let candidate = db
            .record_candidate_sample("anders", PatternType::Process, "osu", 30, None, 120, t1)
            .unwrap();
        assert_eq!(candidate.samples, 1);
        assert_eq!(candidate.first_seen, candidate.last_seen);
    }

    #[test]
    fn seeded_defaults_are_present_once() {
        let db = db();
        let patterns = db.list_patterns(None).unwrap();
        assert!(patterns.iter().any(|p| p.display_name == "Proton Game"));
        let templates = db.list_templates(None).unwrap();
        for intention in ["time_warning_30", "enforcement", "blocked_launch"] {
            assert!(
                templates.iter().any(|t| t.intention == intention && t.enabled),
                "missing seeded template for {intention}"
            );
        }
    }

    #[test]
    fn maintenance_purges_by_window() {
        let db = db();
        let old = (Utc::now() - chrono::Duration::days(40)).to_rfc3339();
        db.conn()
            .execute(
                "INSERT INTO events (timestamp, user, event_type) VALUES (?1, 'anders', 'x')",
                params![old],
            )
            .unwrap();
        db.append_event("anders", "fresh", None, None, None, None)
            .unwrap();

        let report = db.maintenance(&RetentionPolicy::default()).unwrap();
        assert_eq!(report.events_deleted, 1);
        let remaining: i64 = db
            .conn()
            .query_row("SELECT COUNT(*) FROM events", [], |r| r.get(0))
            .unwrap();
        assert_eq!(remaining, 1);
    }

    #[test]
    fn epoch_moves_on_admin_writes() {
        let db = db();
        let before = db.change_epoch().unwrap();
        db.upsert_user("anders", 1000, true).unwrap();
        assert!(db.change_epoch().unwrap() > before);
    }
}
