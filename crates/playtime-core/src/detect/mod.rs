//! Detection workers.
//!
//! Each worker samples one class of user activity per tick and reports
//! a normalized stream of [`DetectedActivity`] values. Workers never
//! block past their deadline; a failed or timed-out scan degrades to an
//! empty result at the call site.

pub mod browser;
pub mod process;
pub mod proton;

use serde::{Deserialize, Serialize};

use crate::error::WorkerError;
use crate::pattern::{Category, PatternType};
use crate::storage::UserRecord;

/// Where an activity observation came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActivitySource {
    /// Native process, keyed by executable basename.
    Process,
    /// Wine/Proton-wrapped Windows title, keyed by `.exe` basename.
    Proton,
    /// Browser activity, keyed by domain; carries the browser id.
    Browser(String),
}

/// A normalized observation of something the user is doing right now.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectedActivity {
    /// Canonical key: process basename, registrable domain, or
    /// extracted `.exe` basename.
    pub key: String,
    pub source: ActivitySource,
    pub pid: Option<i32>,
    /// Smoothed CPU usage; `None` until the second sample for a PID.
    pub cpu_percent: Option<f32>,
    pub cmdline: Option<String>,
}

impl DetectedActivity {
    /// Which pattern partition classifies this activity.
    pub fn pattern_type(&self) -> PatternType {
        match self.source {
            ActivitySource::Process | ActivitySource::Proton => PatternType::Process,
            ActivitySource::Browser(_) => PatternType::BrowserDomain,
        }
    }

    /// Category a discovered pattern inherits from this worker.
    pub fn default_category(&self) -> Category {
        match self.source {
            ActivitySource::Process | ActivitySource::Proton => Category::Gaming,
            ActivitySource::Browser(_) => Category::Social,
        }
    }

    /// Browser id for browser activities.
    pub fn browser(&self) -> Option<&str> {
        match &self.source {
            ActivitySource::Browser(b) => Some(b.as_str()),
            _ => None,
        }
    }
}

/// Uniform worker contract: the daemon runs every available worker in
/// sequence each tick and unions the results by `(user, key)`.
pub trait DetectionWorker {
    fn name(&self) -> &'static str;

    /// Cheap availability probe; unavailable workers are skipped
    /// without logging noise.
    fn is_available(&self) -> bool;

    /// Sample the user's current activity. Must complete within the
    /// tick budget; long-running I/O inside carries its own deadline.
    fn scan(&mut self, user: &UserRecord) -> Result<Vec<DetectedActivity>, WorkerError>;
}

/// Session infrastructure and shells that are never monitored, never
/// killed, and never surface as discovery candidates.
pub const PROTECTED_PROCESSES: &[&str] = &[
    "systemd",
    "dbus-daemon",
    "dbus-broker",
    "pipewire",
    "pulseaudio",
    "wireplumber",
    "kwin",
    "kwin_wayland",
    "kwin_x11",
    "plasmashell",
    "kded5",
    "kded6",
    "Xorg",
    "Xwayland",
    "gnome-shell",
    "mutter",
    "sddm",
    "gdm",
    "gdm-session",
    "lightdm",
    "login",
    "agetty",
    "sudo",
    "su",
    "ssh",
    "sshd",
    "notify-send",
    "gdbus",
    "dbus-launch",
    "polkitd",
    "upowerd",
    "thermald",
    "acpid",
    "bash",
    "zsh",
    "fish",
    "sh",
    "dash",
    "csh",
    "tcsh",
];

/// Is `name` on the never-touch list?
pub fn is_protected(name: &str) -> bool {
    PROTECTED_PROCESSES.iter().any(|p| *p == name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protected_covers_session_plumbing_and_shells() {
        assert!(is_protected("kwin_wayland"));
        assert!(is_protected("bash"));
        assert!(!is_protected("factorio"));
    }

    #[test]
    fn sources_map_to_pattern_types() {
        let proc = DetectedActivity {
            key: "steam".into(),
            source: ActivitySource::Process,
            pid: Some(1),
            cpu_percent: None,
            cmdline: None,
        };
        assert_eq!(proc.pattern_type(), PatternType::Process);

        let tab = DetectedActivity {
            key: "ixl.com".into(),
            source: ActivitySource::Browser("firefox".into()),
            pid: None,
            cpu_percent: None,
            cmdline: None,
        };
        assert_eq!(tab.pattern_type(), PatternType::BrowserDomain);
        assert_eq!(tab.browser(), Some("firefox"));
    }
}
