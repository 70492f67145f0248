//! Chrome-family browser worker.
//!
//! Covers Chrome, Chromium, Brave, and Edge. Window titles resolve
//! through the signature table, then the profile's History database;
//! domains from the newest session file are merged in so tabs hidden
//! behind an uninformative window title still count.

use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;

use regex::Regex;

use crate::error::WorkerError;
use crate::passwd;
use crate::storage::UserRecord;

use super::signatures::{match_signature, registrable_domain};
use super::windows::WindowCache;
use super::{history_lookup, host_of_url, strip_notification_count, strip_title_suffix};
use crate::detect::{ActivitySource, DetectedActivity, DetectionWorker};

/// Window title suffixes per Chrome-family variant.
const WINDOW_SUFFIXES: &[(&str, &'static str)] = &[
    (" - Google Chrome", "chrome"),
    (" - Chromium", "chromium"),
    (" - Brave", "brave"),
    (" - Microsoft Edge", "edge"),
];

/// Profile directories per variant, relative to the user's home.
const PROFILE_PATHS: &[(&str, &str)] = &[
    ("chrome", ".config/google-chrome"),
    ("chromium", ".config/chromium"),
    ("brave", ".config/BraveSoftware/Brave-Browser"),
    ("edge", ".config/microsoft-edge"),
];

const HISTORY_QUERY: &str =
    "SELECT url FROM urls WHERE title LIKE ?1 ORDER BY last_visit_time DESC LIMIT 1";

/// Detection worker for Chrome-family browsers.
pub struct ChromeWorker {
    windows: Rc<RefCell<WindowCache>>,
    home_override: Option<PathBuf>,
}

impl ChromeWorker {
    pub fn new(windows: Rc<RefCell<WindowCache>>) -> Self {
        Self {
            windows,
            home_override: None,
        }
    }

    /// Use a fixed home directory instead of the passwd lookup (tests).
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

    /// Is this window one of ours? Recognizes both suffixed titles
    /// and Chrome PWA windows by their `chrome-<id>-Default` app id.
    fn claim_window<'t>(&self, title: &'t str, app_id: &str) -> Option<(&'t str, &'static str)> {
        if let Some(hit) = strip_title_suffix(title, WINDOW_SUFFIXES) {
            return Some(hit);
        }
        if app_id.starts_with("chrome-") && app_id.contains("-Default") {
            return Some((title, "chrome"));
        }
        None
    }

    fn resolve_title(&self, home: &PathBuf, title: &str) -> Option<String> {
        if let Some(domain) = match_signature(title) {
            return Some(domain.to_string());
        }
        for (_, profile) in PROFILE_PATHS {
            let history = home.join(profile).join("Default/History");
            if let Some(domain) = history_lookup(&history, HISTORY_QUERY, title) {
                return Some(domain);
            }
        }
        None
    }

    /// Domains open per the newest session file, read directly off
    /// disk so a root daemon needs no session bus for this path.
    fn session_domains(&self, home: &PathBuf) -> Vec<String> {
        let url_pattern = Regex::new(r#"https?://[^\s"<>]+"#).expect("static regex");
        for (_, profile) in PROFILE_PATHS {
            let sessions_dir = home.join(profile).join("Default/Sessions");
            let Ok(entries) = std::fs::read_dir(&sessions_dir) else {
                continue;
            };
            let newest = entries
                .flatten()
                .filter(|e| {
                    e.file_name()
                        .to_str()
                        .is_some_and(|n| n.starts_with("Session_"))
                })
                .max_by_key(|e| {
                    e.metadata()
                        .and_then(|m| m.modified())
                        .unwrap_or(std::time::UNIX_EPOCH)
                });
            let Some(newest) = newest else { continue };
            let Ok(bytes) = std::fs::read(newest.path()) else {
                continue;
            };
            let text = String::from_utf8_lossy(&bytes);
            let mut domains = Vec::new();
            for hit in url_pattern.find_iter(&text) {
                let Some(host) = host_of_url(hit.as_str()) else {
                    continue;
                };
                if host.starts_with("chrome") {
                    continue;
                }
                if let Some(domain) = registrable_domain(host) {
                    if !domains.contains(&domain) {
                        domains.push(domain);
                    }
                }
            }
            // First variant with a session file wins.
            return domains;
        }
        Vec::new()
    }
}

impl DetectionWorker for ChromeWorker {
    fn name(&self) -> &'static str {
        "chrome"
    }

    fn is_available(&self) -> bool {
        true
    }

    fn scan(&mut self, user: &UserRecord) -> Result<Vec<DetectedActivity>, WorkerError> {
        let Some(home) = self.home_for(user) else {
            return Ok(Vec::new());
        };
        let windows = self.windows.borrow_mut().get(user);

        let mut seen = Vec::new();
        let mut activities = Vec::new();
        let mut push = |domain: String, browser: &str, activities: &mut Vec<DetectedActivity>| {
            if !seen.contains(&domain) {
                seen.push(domain.clone());
                activities.push(DetectedActivity {
                    key: domain,
                    source: ActivitySource::Browser(browser.to_string()),
                    pid: None,
                    cpu_percent: None,
                    cmdline: None,
                });
            }
        };

        let mut claimed_any = false;
        for window in &windows {
            let Some((raw_title, browser)) = self.claim_window(&window.title, &window.app_id)
            else {
                continue;
            };
            claimed_any = true;
            let title = strip_notification_count(raw_title);
            match self.resolve_title(&home, title) {
                Some(domain) => push(domain, browser, &mut activities),
                None => {
                    tracing::debug!(title, "unresolved browser title");
                }
            }
        }

        // Merge session-file tabs whenever the browser shows signs of
        // life on this machine.
        if claimed_any || !activities.is_empty() {
            for domain in self.session_domains(&home) {
                push(domain, "chrome", &mut activities);
            }
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

    fn cache(windows: Vec<(&str, &str)>) -> Rc<RefCell<WindowCache>> {
        Rc::new(RefCell::new(WindowCache::new(Box::new(FixedWindows(
            windows
                .into_iter()
                .map(|(title, app_id)| WindowInfo {
                    title: title.into(),
                    app_id: app_id.into(),
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
    fn signature_title_resolves_without_history() {
        let home = tempfile::tempdir().unwrap();
        let cache = cache(vec![("general | Discord - Google Chrome", "google-chrome")]);
        let mut worker = ChromeWorker::with_home(cache, home.path().to_path_buf());
        let activities = worker.scan(&user()).unwrap();
        assert_eq!(activities.len(), 1);
        assert_eq!(activities[0].key, "discord.com");
        assert_eq!(activities[0].source, ActivitySource::Browser("chrome".into()));
    }

    #[test]
    fn unknown_title_falls_back_to_history() {
        let home = tempfile::tempdir().unwrap();
        let profile = home.path().join(".config/google-chrome/Default");
        std::fs::create_dir_all(&profile).unwrap();
        let conn = Connection::open(profile.join("History")).unwrap();
        conn.execute_batch(
            "CREATE TABLE urls (url TEXT, title TEXT, last_visit_time INTEGER);
             INSERT INTO urls VALUES ('https://www.coolmathgames.com/0-run-3', 'Run 3 - Play it now', 9);",
        )
        .unwrap();
        drop(conn);

        let cache = cache(vec![("Run 3 - Play it now - Chromium", "chromium")]);
        let mut worker = ChromeWorker::with_home(cache, home.path().to_path_buf());
        let activities = worker.scan(&user()).unwrap();
        assert_eq!(activities.len(), 1);
        assert_eq!(activities[0].key, "coolmathgames.com");
        assert_eq!(
            activities[0].source,
            ActivitySource::Browser("chromium".into())
        );
    }

    #[test]
    fn session_file_domains_are_merged() {
        let home = tempfile::tempdir().unwrap();
        let sessions = home.path().join(".config/google-chrome/Default/Sessions");
        std::fs::create_dir_all(&sessions).unwrap();
        std::fs::write(
            sessions.join("Session_13399"),
            b"\x00\x01https://poki.com/en/g/game\x00junk\x02https://www.poki.com/other\x00",
        )
        .unwrap();

        let cache = cache(vec![("cat videos - YouTube - Google Chrome", "google-chrome")]);
        let mut worker = ChromeWorker::with_home(cache, home.path().to_path_buf());
        let activities = worker.scan(&user()).unwrap();
        let keys: Vec<&str> = activities.iter().map(|a| a.key.as_str()).collect();
        // Title hit plus deduplicated session domain.
        assert_eq!(keys, vec!["youtube.com", "poki.com"]);
    }

    #[test]
    fn pwa_window_is_claimed_by_app_id() {
        let home = tempfile::tempdir().unwrap();
        let cache = cache(vec![(
            "YouTube Music",
            "chrome-cinhimbnkkaeohfgghhklpknlkffjgod-Default",
        )]);
        let mut worker = ChromeWorker::with_home(cache, home.path().to_path_buf());
        let activities = worker.scan(&user()).unwrap();
        assert_eq!(activities[0].key, "music.youtube.com");
    }

    #[test]
    fn foreign_windows_are_ignored() {
        let home = tempfile::tempdir().unwrap();
        let cache = cache(vec![("IXL | Math — Mozilla Firefox", "firefox")]);
        let mut worker = ChromeWorker::with_home(cache, home.path().to_path_buf());
        assert!(worker.scan(&user()).unwrap().is_empty());
    }
}
