//! Database schema migrations for playtime.
//!
//! Migrations are versioned and applied automatically when opening the
//! database. The `schema_version` table tracks the current migration
//! version; migrations are forward-only and idempotent per version.

use rusqlite::{params, Connection, Result as SqliteResult};

/// Apply all pending migrations.
///
/// # Errors
/// Returns an error if a migration fails; the transaction for the
/// failing version is rolled back and the version row is untouched.
pub fn migrate(conn: &Connection) -> SqliteResult<()> {
    create_schema_version_table(conn)?;

    let current_version = get_schema_version(conn);

    if current_version < 1 {
        migrate_v1(conn)?;
    }
    if current_version < 2 {
        migrate_v2(conn)?;
    }
    if current_version < 3 {
        migrate_v3(conn)?;
    }

    Ok(())
}

fn create_schema_version_table(conn: &Connection) -> SqliteResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        );",
    )
}

/// Current schema version, 0 for a fresh database.
pub fn get_schema_version(conn: &Connection) -> i32 {
    conn.query_row("SELECT version FROM schema_version", [], |row| {
        row.get::<_, i32>(0)
    })
    .unwrap_or(0)
}

fn set_schema_version(tx: &rusqlite::Transaction<'_>, version: i32) -> SqliteResult<()> {
    tx.execute("DELETE FROM schema_version", [])?;
    tx.execute(
        "INSERT INTO schema_version (version) VALUES (?1)",
        [version],
    )?;
    Ok(())
}

/// Migration v1: baseline schema.
///
/// Users, limits (with the legacy per-day-type window columns),
/// patterns, discovery candidates, sessions, daily summaries, events,
/// audit, templates, and the message log.
fn migrate_v1(conn: &Connection) -> SqliteResult<()> {
    let tx = conn.unchecked_transaction()?;

    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS meta (
            key   TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS users (
            id      INTEGER PRIMARY KEY AUTOINCREMENT,
            name    TEXT NOT NULL UNIQUE,
            uid     INTEGER NOT NULL,
            enabled INTEGER NOT NULL DEFAULT 1
        );

        CREATE TABLE IF NOT EXISTS limits (
            id               INTEGER PRIMARY KEY AUTOINCREMENT,
            user             TEXT NOT NULL UNIQUE,
            gaming_limit_min INTEGER NOT NULL DEFAULT 120,
            gaming_limit_mon INTEGER,
            gaming_limit_tue INTEGER,
            gaming_limit_wed INTEGER,
            gaming_limit_thu INTEGER,
            gaming_limit_fri INTEGER,
            gaming_limit_sat INTEGER,
            gaming_limit_sun INTEGER,
            daily_total_min  INTEGER,
            grace_period_sec INTEGER,
            weekday_start    TEXT,
            weekday_end      TEXT,
            weekend_start    TEXT,
            weekend_end      TEXT
        );

        CREATE TABLE IF NOT EXISTS patterns (
            id                 INTEGER PRIMARY KEY AUTOINCREMENT,
            owner              TEXT,
            pattern_regex      TEXT NOT NULL,
            display_name       TEXT NOT NULL,
            category           TEXT NOT NULL,
            monitor_state      TEXT NOT NULL DEFAULT 'active',
            priority           INTEGER NOT NULL DEFAULT 100,
            cpu_threshold      REAL,
            sample_window_sec  INTEGER,
            min_samples        INTEGER,
            discovered_cmdline TEXT,
            times_seen         INTEGER NOT NULL DEFAULT 0,
            total_runtime_sec  INTEGER NOT NULL DEFAULT 0,
            last_seen_at       TEXT,
            created_at         TEXT NOT NULL,
            updated_at         TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS discovery_candidates (
            id                      INTEGER PRIMARY KEY AUTOINCREMENT,
            owner                   TEXT NOT NULL,
            pattern_type            TEXT NOT NULL,
            key                     TEXT NOT NULL,
            first_seen              TEXT NOT NULL,
            last_seen               TEXT NOT NULL,
            samples                 INTEGER NOT NULL DEFAULT 0,
            accumulated_runtime_sec INTEGER NOT NULL DEFAULT 0,
            cmdline                 TEXT,
            UNIQUE(owner, pattern_type, key)
        );

        CREATE TABLE IF NOT EXISTS sessions (
            id           INTEGER PRIMARY KEY AUTOINCREMENT,
            user         TEXT NOT NULL,
            pattern_id   INTEGER NOT NULL,
            started_at   TEXT NOT NULL,
            ended_at     TEXT,
            duration_sec INTEGER,
            end_reason   TEXT
        );

        CREATE TABLE IF NOT EXISTS daily_summary (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            date            TEXT NOT NULL,
            user            TEXT NOT NULL,
            gaming_time_sec INTEGER NOT NULL DEFAULT 0,
            total_time_sec  INTEGER NOT NULL DEFAULT 0,
            UNIQUE(date, user)
        );

        CREATE TABLE IF NOT EXISTS events (
            id         INTEGER PRIMARY KEY AUTOINCREMENT,
            timestamp  TEXT NOT NULL,
            user       TEXT NOT NULL,
            event_type TEXT NOT NULL,
            process    TEXT,
            category   TEXT,
            details    TEXT,
            pid        INTEGER
        );

        CREATE TABLE IF NOT EXISTS audit (
            id            INTEGER PRIMARY KEY AUTOINCREMENT,
            timestamp     TEXT NOT NULL,
            user          TEXT NOT NULL,
            pid           INTEGER NOT NULL,
            process_name  TEXT NOT NULL,
            pattern_id    INTEGER,
            reason        TEXT NOT NULL,
            signal_sent   TEXT NOT NULL,
            exit_observed INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS templates (
            id        INTEGER PRIMARY KEY AUTOINCREMENT,
            intention TEXT NOT NULL,
            variant   INTEGER NOT NULL,
            title     TEXT NOT NULL,
            body      TEXT NOT NULL,
            icon      TEXT NOT NULL DEFAULT 'dialog-information',
            urgency   TEXT NOT NULL DEFAULT 'normal',
            enabled   INTEGER NOT NULL DEFAULT 1,
            UNIQUE(intention, variant)
        );

        CREATE TABLE IF NOT EXISTS message_log (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            timestamp       TEXT NOT NULL,
            user            TEXT NOT NULL,
            intention       TEXT NOT NULL,
            template_id     INTEGER,
            rendered_title  TEXT NOT NULL,
            rendered_body   TEXT NOT NULL,
            backend         TEXT NOT NULL,
            notification_id INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_sessions_user_started
            ON sessions(user, started_at);
        CREATE INDEX IF NOT EXISTS idx_daily_user_date
            ON daily_summary(user, date);
        CREATE INDEX IF NOT EXISTS idx_patterns_state
            ON patterns(monitor_state);
        CREATE INDEX IF NOT EXISTS idx_events_user_time
            ON events(user, timestamp);",
    )?;

    set_schema_version(&tx, 1)?;
    tx.commit()
}

/// Migration v2: kernel state flags and browser-aware patterns.
///
/// Adds the per-day state machine columns to `daily_summary` and the
/// `pattern_type`/`browser` columns to `patterns`.
fn migrate_v2(conn: &Connection) -> SqliteResult<()> {
    let tx = conn.unchecked_transaction()?;

    tx.execute_batch(
        "ALTER TABLE daily_summary ADD COLUMN state TEXT NOT NULL DEFAULT 'available';
         ALTER TABLE daily_summary ADD COLUMN gaming_active INTEGER NOT NULL DEFAULT 0;
         ALTER TABLE daily_summary ADD COLUMN gaming_started_at TEXT;
         ALTER TABLE daily_summary ADD COLUMN last_poll_at TEXT;
         ALTER TABLE daily_summary ADD COLUMN warned_30 INTEGER NOT NULL DEFAULT 0;
         ALTER TABLE daily_summary ADD COLUMN warned_15 INTEGER NOT NULL DEFAULT 0;
         ALTER TABLE daily_summary ADD COLUMN warned_5 INTEGER NOT NULL DEFAULT 0;
         ALTER TABLE daily_summary ADD COLUMN grace_started_at TEXT;
         ALTER TABLE daily_summary ADD COLUMN last_state_change TEXT;
         ALTER TABLE patterns ADD COLUMN pattern_type TEXT NOT NULL DEFAULT 'process';
         ALTER TABLE patterns ADD COLUMN browser TEXT;",
    )?;

    set_schema_version(&tx, 2)?;
    tx.commit()
}

/// Migration v3: 168-slot schedule grid.
///
/// Adds `limits.schedule` and synthesizes it from the legacy
/// `weekday_*`/`weekend_*` window columns where those are set;
/// otherwise the grid defaults to all-allowed.
fn migrate_v3(conn: &Connection) -> SqliteResult<()> {
    let tx = conn.unchecked_transaction()?;

    tx.execute_batch("ALTER TABLE limits ADD COLUMN schedule TEXT;")?;

    // Backfill from the legacy window columns.
    let rows: Vec<(String, Option<String>, Option<String>, Option<String>, Option<String>)> = {
        let mut stmt = tx.prepare(
            "SELECT user, weekday_start, weekday_end, weekend_start, weekend_end FROM limits",
        )?;
        let mapped = stmt.query_map([], |row| {
            Ok((
                row.get(0)?,
                row.get(1)?,
                row.get(2)?,
                row.get(3)?,
                row.get(4)?,
            ))
        })?;
        mapped.collect::<SqliteResult<Vec<_>>>()?
    };

    for (user, wd_start, wd_end, we_start, we_end) in rows {
        let grid = synthesize_grid(
            wd_start.as_deref(),
            wd_end.as_deref(),
            we_start.as_deref(),
            we_end.as_deref(),
        );
        tx.execute(
            "UPDATE limits SET schedule = ?1 WHERE user = ?2",
            params![grid, user],
        )?;
    }

    set_schema_version(&tx, 3)?;
    tx.commit()
}

/// Build a 168-char grid from legacy HH:MM windows. `None` windows
/// mean the whole day-type is allowed.
fn synthesize_grid(
    weekday_start: Option<&str>,
    weekday_end: Option<&str>,
    weekend_start: Option<&str>,
    weekend_end: Option<&str>,
) -> String {
    let weekday = day_slots(weekday_start, weekday_end);
    let weekend = day_slots(weekend_start, weekend_end);

    let mut grid = String::with_capacity(168);
    for day in 0..7usize {
        let slots = if day >= 5 { &weekend } else { &weekday };
        grid.push_str(slots);
    }
    grid
}

/// 24 slots for one day. An hour is allowed if it overlaps
/// [start, end); an unparseable or absent window allows every hour.
fn day_slots(start: Option<&str>, end: Option<&str>) -> String {
    let (Some(start), Some(end)) = (parse_hour(start), parse_hour(end)) else {
        return "1".repeat(24);
    };
    (0..24u32)
        .map(|h| if h >= start && h < end { '1' } else { '0' })
        .collect()
}

fn parse_hour(value: Option<&str>) -> Option<u32> {
    let text = value?;
    let hour: u32 = text.split(':').next()?.parse().ok()?;
    (hour < 24).then_some(hour)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrate_from_scratch_reaches_v3() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();
        assert_eq!(get_schema_version(&conn), 3);

        // Columns added by later migrations must exist.
        conn.prepare("SELECT state, warned_30, grace_started_at FROM daily_summary")
            .unwrap();
        conn.prepare("SELECT pattern_type, browser FROM patterns")
            .unwrap();
        conn.prepare("SELECT schedule FROM limits").unwrap();
    }

    #[test]
    fn migrate_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();
        migrate(&conn).unwrap();
        assert_eq!(get_schema_version(&conn), 3);
    }

    #[test]
    fn legacy_windows_become_schedule_grid() {
        let conn = Connection::open_in_memory().unwrap();
        create_schema_version_table(&conn).unwrap();
        migrate_v1(&conn).unwrap();
        migrate_v2(&conn).unwrap();

        conn.execute(
            "INSERT INTO limits (user, weekday_start, weekday_end, weekend_start, weekend_end)
             VALUES ('anders', '16:00', '21:00', '09:00', '22:00')",
            [],
        )
        .unwrap();

        migrate(&conn).unwrap();

        let grid: String = conn
            .query_row(
                "SELECT schedule FROM limits WHERE user = 'anders'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(grid.len(), 168);
        // Monday 15:00 denied, 16:00 allowed, 21:00 denied again.
        assert_eq!(&grid[15..16], "0");
        assert_eq!(&grid[16..17], "1");
        assert_eq!(&grid[21..22], "0");
        // Saturday (day 5) 09:00 allowed.
        assert_eq!(&grid[5 * 24 + 9..5 * 24 + 10], "1");
        assert_eq!(&grid[5 * 24 + 8..5 * 24 + 9], "0");
    }

    #[test]
    fn missing_windows_default_to_all_allowed() {
        let conn = Connection::open_in_memory().unwrap();
        create_schema_version_table(&conn).unwrap();
        migrate_v1(&conn).unwrap();
        migrate_v2(&conn).unwrap();

        conn.execute("INSERT INTO limits (user) VALUES ('kari')", [])
            .unwrap();
        migrate(&conn).unwrap();

        let grid: String = conn
            .query_row(
                "SELECT schedule FROM limits WHERE user = 'kari'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(grid, "1".repeat(168));
    }
}
