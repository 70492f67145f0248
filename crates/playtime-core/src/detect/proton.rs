//! Wine/Proton game detection.
//!
//! A Windows game under Proton shows up as a generic wine process; the
//! actual game is buried in the argument vector as a `.exe` path. This
//! worker extracts that basename so distinct games separate instead of
//! collapsing into one "Proton Game" bucket.

use std::path::{Path, PathBuf};

use crate::error::WorkerError;
use crate::storage::UserRecord;

use super::process::list_processes;
use super::{ActivitySource, DetectedActivity, DetectionWorker};

/// Process names that indicate a Wine/Proton wrapper.
const WINE_PARENTS: &[&str] = &[
    "wine",
    "wine64",
    "wine-preloader",
    "wine64-preloader",
    "proton",
    "pressure-vessel-wrap",
];

/// Wine plumbing that never wraps a game.
const WINE_SERVICES: &[&str] = &["wineserver", "winedevice.exe", "services.exe", "explorer.exe"];

/// Detection worker for Proton/Wine-wrapped games.
pub struct ProtonWorker {
    proc_root: PathBuf,
}

impl ProtonWorker {
    pub fn new() -> Self {
        Self::with_proc_root(PathBuf::from("/proc"))
    }

    pub fn with_proc_root(proc_root: PathBuf) -> Self {
        Self { proc_root }
    }
}

impl Default for ProtonWorker {
    fn default() -> Self {
        Self::new()
    }
}

impl DetectionWorker for ProtonWorker {
    fn name(&self) -> &'static str {
        "proton"
    }

    fn is_available(&self) -> bool {
        self.proc_root.is_dir()
    }

    fn scan(&mut self, user: &UserRecord) -> Result<Vec<DetectedActivity>, WorkerError> {
        let mut activities = Vec::new();
        for entry in list_processes(&self.proc_root, user.uid) {
            if WINE_SERVICES.iter().any(|s| entry.comm.eq_ignore_ascii_case(s)) {
                continue;
            }
            let wrapped = WINE_PARENTS.iter().any(|w| entry.comm.starts_with(w))
                || entry.comm.to_ascii_lowercase().ends_with(".exe")
                || entry.cmdline.to_ascii_lowercase().contains("proton");
            if !wrapped {
                continue;
            }
            let Some(game) = extract_exe_basename(&entry.cmdline).or_else(|| {
                // The comm itself may be the truncated exe name.
                exe_stem(&entry.comm)
            }) else {
                continue;
            };
            activities.push(DetectedActivity {
                key: game,
                source: ActivitySource::Proton,
                pid: Some(entry.pid),
                cpu_percent: None,
                cmdline: Some(entry.cmdline.clone()),
            });
        }
        Ok(activities)
    }
}

/// First `.exe` argument in a command line, reduced to its stem.
/// Handles both Unix and Windows path separators, since Proton mixes
/// `Z:\...`-style paths into the argv.
fn extract_exe_basename(cmdline: &str) -> Option<String> {
    cmdline
        .split_whitespace()
        .find(|arg| arg.to_ascii_lowercase().ends_with(".exe"))
        .and_then(exe_stem)
}

fn exe_stem<S: AsRef<str>>(arg: S) -> Option<String> {
    let arg = arg.as_ref();
    if !arg.to_ascii_lowercase().ends_with(".exe") {
        return None;
    }
    let basename = arg
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(arg);
    let stem = &basename[..basename.len() - ".exe".len()];
    (!stem.is_empty()).then(|| stem.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::MetadataExt;

    #[test]
    fn extracts_windows_style_paths() {
        assert_eq!(
            extract_exe_basename(r"wine Z:\games\FalloutNV\FalloutNV.exe -windowed"),
            Some("FalloutNV".to_string())
        );
        assert_eq!(
            extract_exe_basename("/usr/bin/wine64 /home/anders/games/Stardew.exe"),
            Some("Stardew".to_string())
        );
        assert_eq!(extract_exe_basename("wine --help"), None);
    }

    #[test]
    fn case_insensitive_exe_suffix() {
        assert_eq!(exe_stem("GAME.EXE"), Some("GAME".to_string()));
        assert_eq!(exe_stem("game.exenot"), None);
    }

    fn fake_proc(dir: &Path, pid: i32, comm: &str, cmdline: &[&str]) {
        let proc_dir = dir.join(pid.to_string());
        std::fs::create_dir_all(&proc_dir).unwrap();
        std::fs::write(proc_dir.join("cmdline"), cmdline.join("\0") + "\0").unwrap();
        let stat = format!(
            "{pid} ({comm}) S 1 {pid} {pid} 0 -1 0 0 0 0 0 10 10 0 0 20 0 1 0 50 0 0 0"
        );
        std::fs::write(proc_dir.join("stat"), stat).unwrap();
    }

    #[test]
    fn wine_game_is_keyed_by_exe_stem() {
        let dir = tempfile::tempdir().unwrap();
        fake_proc(
            dir.path(),
            300,
            "FalloutNV.exe",
            &["Z:\\games\\FalloutNV\\FalloutNV.exe"],
        );
        fake_proc(dir.path(), 301, "wineserver", &["wineserver"]);
        fake_proc(dir.path(), 302, "factorio", &["/usr/bin/factorio"]);

        let mut worker = ProtonWorker::with_proc_root(dir.path().to_path_buf());
        let user = UserRecord {
            id: 1,
            name: "anders".into(),
            uid: std::fs::metadata(dir.path()).unwrap().uid(),
            enabled: true,
        };
        let activities = worker.scan(&user).unwrap();
        assert_eq!(activities.len(), 1);
        assert_eq!(activities[0].key, "FalloutNV");
        assert_eq!(activities[0].source, ActivitySource::Proton);
    }
}
