//! Discovery of persistent unknown activities.
//!
//! Unclassified activities accumulate candidate samples; a candidate
//! that reaches `min_samples` within the sample window is promoted to
//! a `discovered` pattern for admin review. Discovered patterns never
//! participate in enforcement until promoted to `active`.

use chrono::{DateTime, Utc};

use crate::config::DiscoverySection;
use crate::detect::DetectedActivity;
use crate::error::DatabaseError;
use crate::pattern::Pattern;
use crate::storage::Database;

/// Record one observation of an unknown activity; returns the new
/// `discovered` pattern when this observation crossed the promotion
/// threshold.
pub fn record_observation(
    db: &Database,
    config: &DiscoverySection,
    owner: &str,
    activity: &DetectedActivity,
    runtime_sec: i64,
    now: DateTime<Utc>,
) -> Result<Option<Pattern>, DatabaseError> {
    if !config.enabled {
        return Ok(None);
    }

    // Already flagged (discovered or ignored): keep stats fresh, do
    // not flag again.
    if let Some(existing) =
        db.find_pattern_by_key(owner, activity.pattern_type(), &activity.key)?
    {
        db.touch_pattern_stats(existing.id, runtime_sec, now)?;
        return Ok(None);
    }

    let candidate = db.record_candidate_sample(
        owner,
        activity.pattern_type(),
        &activity.key,
        runtime_sec,
        activity.cmdline.as_deref(),
        config.sample_window_seconds as i64,
        now,
    )?;

    let within_window =
        (now - candidate.first_seen).num_seconds() <= config.sample_window_seconds as i64;
    if candidate.samples < config.min_samples as i64 || !within_window {
        return Ok(None);
    }

    let pattern_id = db.promote_candidate(&candidate, activity.default_category(), None)?;
    tracing::info!(
        owner,
        key = %activity.key,
        pattern_id,
        samples = candidate.samples,
        "promoted discovery candidate"
    );
    Ok(db.get_pattern(pattern_id)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::ActivitySource;
    use crate::pattern::{Category, MonitorState};

    fn activity(key: &str) -> DetectedActivity {
        DetectedActivity {
            key: key.into(),
            source: ActivitySource::Proton,
            pid: Some(900),
            cpu_percent: Some(40.0),
            cmdline: Some(format!("wine {key}.exe")),
        }
    }

    fn config() -> DiscoverySection {
        DiscoverySection {
            enabled: true,
            cpu_threshold: 25.0,
            sample_window_seconds: 120,
            min_samples: 3,
        }
    }

    #[test]
    fn promotes_after_min_samples_in_window() {
        let db = Database::open_in_memory().unwrap();
        let now = Utc::now();
        let a = activity("FalloutNV");

        assert!(record_observation(&db, &config(), "anders", &a, 30, now)
            .unwrap()
            .is_none());
        assert!(record_observation(&db, &config(), "anders", &a, 30, now)
            .unwrap()
            .is_none());
        let pattern = record_observation(&db, &config(), "anders", &a, 30, now)
            .unwrap()
            .expect("third sample should promote");

        assert_eq!(pattern.display_name, "FalloutNV");
        assert_eq!(pattern.monitor_state, MonitorState::Discovered);
        assert_eq!(pattern.category, Category::Gaming);
        assert_eq!(pattern.owner.as_deref(), Some("anders"));
        // The key is escaped into a literal-match regex.
        assert!(pattern.regex.contains("FalloutNV"));
    }

    #[test]
    fn slow_trickle_never_promotes() {
        let db = Database::open_in_memory().unwrap();
        let a = activity("updater");
        let t0 = Utc::now();
        // One sample every 5 minutes: the window restarts each time.
        for i in 0..6 {
            let at = t0 + chrono::Duration::seconds(i * 300);
            let promoted = record_observation(&db, &config(), "anders", &a, 30, at).unwrap();
            assert!(promoted.is_none());
        }
    }

    #[test]
    fn already_flagged_keys_are_not_reflagged() {
        let db = Database::open_in_memory().unwrap();
        let now = Utc::now();
        let a = activity("FalloutNV");
        for _ in 0..3 {
            record_observation(&db, &config(), "anders", &a, 30, now).unwrap();
        }
        // Promoted to `discovered`; six more observations must not
        // start a second candidate or pattern.
        for _ in 0..6 {
            let promoted = record_observation(&db, &config(), "anders", &a, 30, now).unwrap();
            assert!(promoted.is_none());
        }
        assert!(db.list_candidates().unwrap().is_empty());
        let count = db
            .list_patterns(None)
            .unwrap()
            .into_iter()
            .filter(|p| p.display_name == "FalloutNV")
            .count();
        assert_eq!(count, 1);
    }

    #[test]
    fn disabled_discovery_records_nothing() {
        let db = Database::open_in_memory().unwrap();
        let mut cfg = config();
        cfg.enabled = false;
        for _ in 0..5 {
            record_observation(&db, &cfg, "anders", &activity("osu"), 30, Utc::now()).unwrap();
        }
        assert!(db.list_candidates().unwrap().is_empty());
    }
}
