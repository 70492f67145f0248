//! Browser activity detection.
//!
//! Browser workers resolve compositor window titles to registrable
//! domains. Resolution order per title: the shared signature table,
//! then the browser's own history database (copied first to dodge its
//! lock), and finally the browser's session files for tabs whose
//! windows carry no usable title. Chrome and Firefox run as separate
//! workers and the daemon unions their results, so one browser's
//! findings can never mask the other's.

pub mod chrome;
pub mod firefox;
pub mod signatures;
pub mod windows;

use std::path::Path;

use rusqlite::{Connection, OpenFlags};

/// Strip a known browser suffix from a window title. Returns the
/// cleaned title and the browser id the suffix identifies.
pub(crate) fn strip_title_suffix<'t>(
    title: &'t str,
    suffixes: &[(&str, &'static str)],
) -> Option<(&'t str, &'static str)> {
    for &(suffix, browser) in suffixes {
        if let Some(clean) = title.strip_suffix(suffix) {
            return Some((clean, browser));
        }
    }
    None
}

/// Drop a leading unread-count marker like `(3) `.
pub(crate) fn strip_notification_count(title: &str) -> &str {
    let trimmed = title.trim_start();
    if let Some(rest) = trimmed.strip_prefix('(') {
        if let Some(close) = rest.find(") ") {
            if rest[..close].chars().all(|c| c.is_ascii_digit()) && close > 0 {
                return &rest[close + 2..];
            }
        }
    }
    trimmed
}

/// Host portion of a URL, without a URL-parsing dependency.
pub(crate) fn host_of_url(url: &str) -> Option<&str> {
    let rest = url.split_once("://").map(|(_, r)| r).unwrap_or(url);
    let host = rest.split(['/', '?', '#']).next()?;
    let host = host.rsplit('@').next()?;
    (!host.is_empty()).then_some(host)
}

/// Look a title up in a copied browser history database.
///
/// The live file is locked by the running browser, so it is copied to
/// a scratch path first; the copy is removed with its temp directory.
pub(crate) fn history_lookup(
    history_path: &Path,
    query: &str,
    title: &str,
) -> Option<String> {
    if !history_path.exists() {
        return None;
    }
    let scratch = tempfile::tempdir().ok()?;
    let copy_path = scratch.path().join("history-copy.sqlite");
    std::fs::copy(history_path, &copy_path).ok()?;

    let conn =
        Connection::open_with_flags(&copy_path, OpenFlags::SQLITE_OPEN_READ_ONLY).ok()?;
    let prefix: String = title.chars().take(50).collect();
    let needle = format!("%{prefix}%");
    let url: Option<String> = conn
        .query_row(query, rusqlite::params![needle], |row| row.get(0))
        .ok();
    let url = url?;
    host_of_url(&url).and_then(signatures::registrable_domain)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notification_count_is_stripped() {
        assert_eq!(strip_notification_count("(3) general | Discord"), "general | Discord");
        assert_eq!(strip_notification_count("(abc) not a count"), "(abc) not a count");
        assert_eq!(strip_notification_count("plain title"), "plain title");
    }

    #[test]
    fn host_extraction_handles_common_shapes() {
        assert_eq!(host_of_url("https://www.ixl.com/math"), Some("www.ixl.com"));
        assert_eq!(host_of_url("http://reddit.com"), Some("reddit.com"));
        assert_eq!(host_of_url("https://user@host.com/x"), Some("host.com"));
        assert_eq!(host_of_url("notaurl"), Some("notaurl"));
    }

    #[test]
    fn history_lookup_reads_a_copy() {
        let dir = tempfile::tempdir().unwrap();
        let history = dir.path().join("History");
        let conn = Connection::open(&history).unwrap();
        conn.execute_batch(
            "CREATE TABLE urls (url TEXT, title TEXT, last_visit_time INTEGER);
             INSERT INTO urls VALUES ('https://www.ixl.com/math/grade-7', 'IXL | Grade 7 math', 2);
             INSERT INTO urls VALUES ('https://old.example.com/', 'IXL | Grade 7 math', 1);",
        )
        .unwrap();
        drop(conn);

        let domain = history_lookup(
            &history,
            "SELECT url FROM urls WHERE title LIKE ?1 ORDER BY last_visit_time DESC LIMIT 1",
            "IXL | Grade 7 math",
        );
        assert_eq!(domain.as_deref(), Some("ixl.com"));
    }
}
