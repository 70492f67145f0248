//! Firefox browser worker.
//!
//! Title resolution mirrors the Chrome worker: signature table first,
//! then a copy of `places.sqlite` from the default profile. Firefox's
//! recovery file is lz4-framed and is not read; window titles and
//! history cover the open-tab set. Firefox titles use an em-dash
//! separator, with a plain hyphen on some builds.

use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;

use crate::error::WorkerError;
use crate::passwd;
use crate::storage::UserRecord;

use super::signatures::match_signature;
use super::windows::WindowCache;
use super::{history_lookup, strip_notification_count, strip_title_suffix};
use crate::detect::{ActivitySource, DetectedActivity, DetectionWorker};

const WINDOW_SUFFIXES: &[(&str, &'static str)] = &[
    (" — Mozilla Firefox", "firefox"),
    (" — Firefox", "firefox"),
    (" - Mozilla Firefox", "firefox"),
    (" - Firefox", "firefox"),
];

const HISTORY_QUERY: &str =
    "SELECT url FROM moz_places WHERE title LIKE ?1 ORDER BY last_visit_date DESC LIMIT 1";

/// Detection worker for Firefox.
pub struct FirefoxWorker {
    windows: Rc<RefCell<WindowCache>>,
    home_override: Option<PathBuf>,
}

impl FirefoxWorker {
    pub fn new(windows: Rc<RefCell<WindowCache>>) -> Self {
        Self {
            windows,
            home_override: None,
        }
    }

    pub fn with_home(windows: Rc<RefCell<WindowCache>>, home: PathBuf) -> Self {
        Self {
            windows,
            home_override: Some(home),
        }
    }

    fn home_for(&self, user: &UserRecord) -> Option<PathBuf> {
        self.home_override
            .clone()
            .or_else(|| passwd::by_uid(user.uid).map(|a| a.home))
    }

    /// Default profile's `places.sqlite`, if any.
    fn places_path(&self, home: &PathBuf) -> Option<PathBuf> {
        let firefox_dir = home.join(".mozilla/firefox");
        let entries = std::fs::read_dir(&firefox_dir).ok()?;
        for entry in entries.flatten() {
            let name = entry.file_name();
            let is_default = name
                .to_str()
                .is_some_and(|n| n.to_ascii_lowercase().contains("default"));
            if !is_default {
                continue;
            }
            let places = entry.path().join("places.sqlite");
            if places.exists() {
                return Some(places);
            }
        }
        None
    }

    fn resolve_title(&self, home: &PathBuf, title: &str) -> Option<String> {
        if let Some(domain) = match_signature(title) {
            return Some(domain.to_string());
        }
        let places = self.places_path(home)?;
        history_lookup(&places, HISTORY_QUERY, title)
    }
}

impl DetectionWorker for FirefoxWorker {
    fn name(&self) -> &'static str {
        "firefox"
    }

    fn is_available(&self) -> bool {
        true
    }

    fn scan(&mut self, user: &UserRecord) -> Result<Vec<DetectedActivity>, WorkerError> {
        let Some(home) = self.home_for(user) else {
            return Ok(Vec::new());
        };
        let windows = self.windows.borrow_mut().get(user);

        let mut activities: Vec<DetectedActivity> = Vec::new();
        for window in &windows {
            let Some((raw_title, browser)) = strip_title_suffix(&window.title, WINDOW_SUFFIXES)
            else {
                continue;
            };
            let title = strip_notification_count(raw_title);
            let Some(domain) = self.resolve_title(&home, title) else {
                tracing::debug!(title, "unresolved browser title");
                continue;
            };
            if activities.iter().any(|a| a.key == domain) {
                continue;
            }
            activities.push(DetectedActivity {
                key: domain,
                source: ActivitySource::Browser(browser.to_string()),
                pid: None,
                cpu_percent: None,
                cmdline: None,
            });
        }
        Ok(activities)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::browser::windows::{WindowEnumerator, WindowInfo};
    use rusqlite::Connection;

    struct FixedWindows(Vec<WindowInfo>);

    impl WindowEnumerator for FixedWindows {
        fn list_windows(&self, _user: &UserRecord) -> Result<Vec<WindowInfo>, WorkerError> {
            Ok(self.0.clone())
        }
    }

    fn cache(titles: Vec<&str>) -> Rc<RefCell<WindowCache>> {
        Rc::new(RefCell::new(WindowCache::new(Box::new(FixedWindows(
            titles
                .into_iter()
                .map(|title| WindowInfo {
                    title: title.into(),
                    app_id: "firefox".into(),
                })
                .collect(),
        )))))
    }

    fn user() -> UserRecord {
        UserRecord {
            id: 1,
            name: "anders".into(),
            uid: 1000,
            enabled: true,
        }
    }

    #[test]
    fn em_dash_suffix_is_recognized() {
        let home = tempfile::tempdir().unwrap();
        let cache = cache(vec!["IXL | Maths practice — Mozilla Firefox"]);
        let mut worker = FirefoxWorker::with_home(cache, home.path().to_path_buf());
        let activities = worker.scan(&user()).unwrap();
        assert_eq!(activities.len(), 1);
        assert_eq!(activities[0].key, "ixl.com");
        assert_eq!(
            activities[0].source,
            ActivitySource::Browser("firefox".into())
        );
    }

    #[test]
    fn places_fallback_resolves_unknown_titles() {
        let home = tempfile::tempdir().unwrap();
        let profile = home.path().join(".mozilla/firefox/abc123.default-release");
        std::fs::create_dir_all(&profile).unwrap();
        let conn = Connection::open(profile.join("places.sqlite")).unwrap();
        conn.execute_batch(
            "CREATE TABLE moz_places (url TEXT, title TEXT, last_visit_date INTEGER);
             INSERT INTO moz_places VALUES ('https://khanacademy.org/math', 'Algebra basics', 7);",
        )
        .unwrap();
        drop(conn);

        let cache = cache(vec!["Algebra basics - Mozilla Firefox"]);
        let mut worker = FirefoxWorker::with_home(cache, home.path().to_path_buf());
        let activities = worker.scan(&user()).unwrap();
        assert_eq!(activities[0].key, "khanacademy.org");
    }

    #[test]
    fn unresolvable_titles_are_dropped() {
        let home = tempfile::tempdir().unwrap();
        let cache = cache(vec!["Something nobody knows — Mozilla Firefox"]);
        let mut worker = FirefoxWorker::with_home(cache, home.path().to_path_buf());
        assert!(worker.scan(&user()).unwrap().is_empty());
    }
}
