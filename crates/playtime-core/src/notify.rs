//! Notification delivery.
//!
//! Backends form an ordered chain (Clippy widget, freedesktop desktop
//! notifications, log-only) walked per send; the first available
//! backend that returns a non-zero id wins, and the log-only terminal
//! backend always succeeds. Desktop delivery targets the user's own
//! session bus at the well-known per-uid socket path, invoked as that
//! user with a bounded helper command.

use std::collections::HashMap;
use std::fmt;
use std::process::Command;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::passwd;
use crate::pattern::PatternError;
use crate::storage::UserRecord;
use crate::subproc::run_with_deadline;

/// Notification urgency, mapped to the freedesktop byte values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Urgency {
    Low,
    Normal,
    Critical,
}

impl Urgency {
    pub fn as_str(self) -> &'static str {
        match self {
            Urgency::Low => "low",
            Urgency::Normal => "normal",
            Urgency::Critical => "critical",
        }
    }

    /// Wire value for the `urgency` hint.
    pub fn as_byte(self) -> u8 {
        match self {
            Urgency::Low => 0,
            Urgency::Normal => 1,
            Urgency::Critical => 2,
        }
    }
}

impl FromStr for Urgency {
    type Err = PatternError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Urgency::Low),
            "normal" => Ok(Urgency::Normal),
            "critical" => Ok(Urgency::Critical),
            other => Err(PatternError::UnknownState(other.into())),
        }
    }
}

impl fmt::Display for Urgency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A rendered notification ready for delivery.
#[derive(Debug, Clone)]
pub struct Notification {
    pub title: String,
    pub body: String,
    pub icon: String,
    pub urgency: Urgency,
}

/// One delivery backend in the chain.
pub trait NotificationBackend {
    fn name(&self) -> &'static str;

    /// Can this backend plausibly reach the user right now?
    fn is_available(&mut self, user: &UserRecord) -> bool;

    /// Deliver; returns the backend's notification id, or 0 on
    /// failure (the dispatcher then falls through to the next
    /// backend).
    fn send(&mut self, user: &UserRecord, notification: &Notification) -> i64;

    /// Dismiss a previously sent notification.
    fn close(&mut self, user: &UserRecord, notification_id: i64) -> bool;
}

/// Deadline for every helper invocation.
const SEND_DEADLINE: Duration = Duration::from_secs(5);

/// Run a `gdbus` call on the user's session bus, as the user.
fn gdbus_as_user(user: &UserRecord, args: &[&str], label: &str) -> Option<String> {
    let mut cmd = Command::new("sudo");
    cmd.arg("-u")
        .arg(&user.name)
        .arg("--preserve-env=DBUS_SESSION_BUS_ADDRESS")
        .arg("gdbus")
        .args(args)
        .env(
            "DBUS_SESSION_BUS_ADDRESS",
            passwd::session_bus_address(user.uid),
        );
    match run_with_deadline(cmd, SEND_DEADLINE, label) {
        Ok(output) if output.success() => Some(output.stdout),
        Ok(output) => {
            tracing::debug!(label, stderr = %output.stderr.trim(), "gdbus call failed");
            None
        }
        Err(e) => {
            tracing::debug!(label, error = %e, "gdbus call errored");
            None
        }
    }
}

/// Parse `(uint32 7,)` style gdbus output.
fn parse_uint32_reply(output: &str) -> Option<i64> {
    let start = output.find("uint32 ")? + "uint32 ".len();
    let rest = &output[start..];
    let end = rest
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(rest.len());
    rest[..end].parse().ok()
}

// ── Clippy backend ───────────────────────────────────────────────────

/// Animated desktop-widget backend, served by a companion applet at
/// `org.playtime.Clippy` on the user's session bus.
pub struct ClippyBackend {
    /// uid → (bus was present, applet owned the name). Re-probed when
    /// the bus presence flips (login/logout) and dropped on send
    /// failure.
    available: HashMap<u32, (bool, bool)>,
}

const CLIPPY_SERVICE: &str = "org.playtime.Clippy";
const CLIPPY_PATH: &str = "/org/playtime/Clippy";
const CLIPPY_INTERFACE: &str = "org.playtime.Clippy";

impl ClippyBackend {
    pub fn new() -> Self {
        Self {
            available: HashMap::new(),
        }
    }
}

impl Default for ClippyBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationBackend for ClippyBackend {
    fn name(&self) -> &'static str {
        "clippy"
    }

    fn is_available(&mut self, user: &UserRecord) -> bool {
        let bus_up = passwd::session_bus_path(user.uid).exists();
        if let Some((cached_bus, owned)) = self.available.get(&user.uid) {
            if *cached_bus == bus_up {
                return *owned;
            }
        }
        let owned = bus_up
            && gdbus_as_user(
                user,
                &[
                    "call",
                    "--session",
                    "--dest",
                    "org.freedesktop.DBus",
                    "--object-path",
                    "/org/freedesktop/DBus",
                    "--method",
                    "org.freedesktop.DBus.GetNameOwner",
                    CLIPPY_SERVICE,
                ],
                "clippy-probe",
            )
            .is_some();
        self.available.insert(user.uid, (bus_up, owned));
        owned
    }

    fn send(&mut self, user: &UserRecord, notification: &Notification) -> i64 {
        let method = format!("{CLIPPY_INTERFACE}.ShowMessage");
        let urgency = notification.urgency.as_byte().to_string();
        let reply = gdbus_as_user(
            user,
            &[
                "call",
                "--session",
                "--dest",
                CLIPPY_SERVICE,
                "--object-path",
                CLIPPY_PATH,
                "--method",
                method.as_str(),
                notification.title.as_str(),
                notification.body.as_str(),
                urgency.as_str(),
            ],
            "clippy-send",
        );
        match reply.as_deref().and_then(parse_uint32_reply) {
            Some(id) if id > 0 => id,
            _ => {
                self.available.remove(&user.uid);
                0
            }
        }
    }

    fn close(&mut self, user: &UserRecord, notification_id: i64) -> bool {
        let method = format!("{CLIPPY_INTERFACE}.DismissMessage");
        let id = notification_id.to_string();
        gdbus_as_user(
            user,
            &[
                "call",
                "--session",
                "--dest",
                CLIPPY_SERVICE,
                "--object-path",
                CLIPPY_PATH,
                "--method",
                method.as_str(),
                id.as_str(),
            ],
            "clippy-close",
        )
        .is_some()
    }
}

// ── Freedesktop backend ──────────────────────────────────────────────

/// Standard `org.freedesktop.Notifications` backend (KDE Plasma,
/// GNOME, and other compliant environments).
///
/// Availability follows the session bus socket directly, so a logout
/// or login is picked up on the next send without restart.
pub struct FreedesktopBackend {
    app_name: String,
}

const NOTIFY_DEST: &str = "org.freedesktop.Notifications";
const NOTIFY_PATH: &str = "/org/freedesktop/Notifications";

impl FreedesktopBackend {
    pub fn new(app_name: &str) -> Self {
        Self {
            app_name: app_name.to_string(),
        }
    }
}

impl NotificationBackend for FreedesktopBackend {
    fn name(&self) -> &'static str {
        "freedesktop"
    }

    fn is_available(&mut self, user: &UserRecord) -> bool {
        passwd::session_bus_path(user.uid).exists()
    }

    fn send(&mut self, user: &UserRecord, notification: &Notification) -> i64 {
        let method = format!("{NOTIFY_DEST}.Notify");
        let hints = format!("{{'urgency': <byte {}>}}", notification.urgency.as_byte());
        let reply = gdbus_as_user(
            user,
            &[
                "call",
                "--session",
                "--dest",
                NOTIFY_DEST,
                "--object-path",
                NOTIFY_PATH,
                "--method",
                method.as_str(),
                self.app_name.as_str(),
                "0",
                notification.icon.as_str(),
                notification.title.as_str(),
                notification.body.as_str(),
                "[]",
                hints.as_str(),
                "-1",
            ],
            "notify-send",
        );
        match reply.as_deref().and_then(parse_uint32_reply) {
            Some(id) if id > 0 => id,
            _ => {
                tracing::debug!(user = %user.name, "desktop notification declined");
                0
            }
        }
    }

    fn close(&mut self, user: &UserRecord, notification_id: i64) -> bool {
        let method = format!("{NOTIFY_DEST}.CloseNotification");
        let id = notification_id.to_string();
        gdbus_as_user(
            user,
            &[
                "call",
                "--session",
                "--dest",
                NOTIFY_DEST,
                "--object-path",
                NOTIFY_PATH,
                "--method",
                method.as_str(),
                id.as_str(),
            ],
            "notify-close",
        )
        .is_some()
    }
}

// ── Log-only backend ─────────────────────────────────────────────────

/// Terminal backend: always succeeds, writes to the daemon log.
#[derive(Debug, Default)]
pub struct LogOnlyBackend;

/// Sentinel id reported by the log-only backend.
pub const LOG_ONLY_ID: i64 = -1;

impl NotificationBackend for LogOnlyBackend {
    fn name(&self) -> &'static str {
        "log"
    }

    fn is_available(&mut self, _user: &UserRecord) -> bool {
        true
    }

    fn send(&mut self, user: &UserRecord, notification: &Notification) -> i64 {
        tracing::info!(
            user = %user.name,
            urgency = %notification.urgency,
            title = %notification.title,
            body = %notification.body,
            "notification (log only)"
        );
        LOG_ONLY_ID
    }

    fn close(&mut self, _user: &UserRecord, _notification_id: i64) -> bool {
        true
    }
}

// ── Dispatcher ───────────────────────────────────────────────────────

/// Walks the backend chain in priority order.
pub struct Dispatcher {
    backends: Vec<Box<dyn NotificationBackend>>,
}

impl Dispatcher {
    /// Standard chain: Clippy → Freedesktop → LogOnly.
    pub fn standard(app_name: &str) -> Self {
        Self {
            backends: vec![
                Box::new(ClippyBackend::new()),
                Box::new(FreedesktopBackend::new(app_name)),
                Box::new(LogOnlyBackend),
            ],
        }
    }

    /// Custom chain, for tests and alternative deployments.
    pub fn with_backends(backends: Vec<Box<dyn NotificationBackend>>) -> Self {
        Self { backends }
    }

    /// Deliver through the first backend that is available and
    /// returns a non-zero id. Returns `(notification_id, backend)`.
    pub fn send(&mut self, user: &UserRecord, notification: &Notification) -> (i64, &'static str) {
        for backend in &mut self.backends {
            if !backend.is_available(user) {
                continue;
            }
            let id = backend.send(user, notification);
            if id != 0 {
                return (id, backend.name());
            }
            tracing::debug!(backend = backend.name(), "backend declined, falling through");
        }
        (0, "none")
    }
}
