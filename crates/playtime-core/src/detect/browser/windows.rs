//! Compositor window enumeration.
//!
//! The contract with the compositor is `list_windows() → [{title,
//! app_id}]` on the target user's session bus; which service answers
//! is a deployment concern. The KWin implementation queries the
//! windows runner interface as the target user with a bounded helper
//! command, since root cannot attach to a user session bus directly.

use regex::Regex;
use std::process::Command;
use std::time::Duration;

use crate::error::WorkerError;
use crate::passwd;
use crate::storage::UserRecord;
use crate::subproc::run_with_deadline;

/// One open window as the compositor reports it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowInfo {
    pub title: String,
    /// Icon/application id; Chrome PWAs are recognizable here.
    pub app_id: String,
}

/// Source of the user's open windows.
pub trait WindowEnumerator {
    fn list_windows(&self, user: &UserRecord) -> Result<Vec<WindowInfo>, WorkerError>;
}

/// KWin-backed enumerator (KDE Plasma, Wayland and X11).
pub struct KWinWindowEnumerator;

const QUERY_DEADLINE: Duration = Duration::from_secs(5);

impl WindowEnumerator for KWinWindowEnumerator {
    fn list_windows(&self, user: &UserRecord) -> Result<Vec<WindowInfo>, WorkerError> {
        if !passwd::session_bus_path(user.uid).exists() {
            return Err(WorkerError::Unavailable {
                worker: "kwin-windows".into(),
                message: format!("no session bus for uid {}", user.uid),
            });
        }
        let mut cmd = Command::new("sudo");
        cmd.arg("-u")
            .arg(&user.name)
            .arg("--preserve-env=DBUS_SESSION_BUS_ADDRESS")
            .args([
                "qdbus6",
                "--literal",
                "org.kde.KWin",
                "/WindowsRunner",
                "org.kde.krunner1.Match",
                "",
            ])
            .env(
                "DBUS_SESSION_BUS_ADDRESS",
                passwd::session_bus_address(user.uid),
            );
        let output = run_with_deadline(cmd, QUERY_DEADLINE, "kwin-windows")?;
        if !output.success() {
            return Err(WorkerError::ScanFailed {
                worker: "kwin-windows".into(),
                message: format!("query exited {}", output.status),
            });
        }
        Ok(parse_windows_reply(&output.stdout))
    }
}

/// Pull `(window_id, title, icon)` tuples out of the literal D-Bus
/// reply text.
fn parse_windows_reply(output: &str) -> Vec<WindowInfo> {
    let pattern =
        Regex::new(r#"\[Argument: \(sssida\{sv\}\) "[^"]*", "([^"]*)", "([^"]*)""#)
            .expect("static regex");
    pattern
        .captures_iter(output)
        .map(|caps| WindowInfo {
            title: caps[1].to_string(),
            app_id: caps[2].to_string(),
        })
        .collect()
}

/// Per-tick memo of the window list, shared by the browser workers so
/// one compositor round-trip serves both. Owned by the daemon loop,
/// which clears it at each tick boundary.
pub struct WindowCache {
    enumerator: Box<dyn WindowEnumerator>,
    cached: Option<(u32, Vec<WindowInfo>)>,
}

impl WindowCache {
    pub fn new(enumerator: Box<dyn WindowEnumerator>) -> Self {
        Self {
            enumerator,
            cached: None,
        }
    }

    /// Drop the memo; called at each tick boundary.
    pub fn invalidate(&mut self) {
        self.cached = None;
    }

    /// Windows for `user`, memoized within the tick. Errors degrade to
    /// an empty list after a log entry.
    pub fn get(&mut self, user: &UserRecord) -> Vec<WindowInfo> {
        if let Some((uid, windows)) = &self.cached {
            if *uid == user.uid {
                return windows.clone();
            }
        }
        let windows = match self.enumerator.list_windows(user) {
            Ok(windows) => windows,
            Err(e) => {
                tracing::debug!(user = %user.name, error = %e, "window query failed");
                Vec::new()
            }
        };
        self.cached = Some((user.uid, windows.clone()));
        windows
    }
}
