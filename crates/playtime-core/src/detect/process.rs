//! Native process detection.
//!
//! Enumerates the target user's processes from the proc filesystem and
//! reports them with a smoothed CPU figure. CPU measurement needs two
//! samples at least a tick apart; the first sighting of a PID seeds
//! the counter and reports no CPU, so it can never clear a threshold
//! gate on its own.

use std::collections::HashMap;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::error::WorkerError;
use crate::storage::UserRecord;

use super::{is_protected, ActivitySource, DetectedActivity, DetectionWorker};

/// One parsed proc entry.
#[derive(Debug, Clone)]
pub(crate) struct ProcEntry {
    pub pid: i32,
    pub comm: String,
    pub cmdline: String,
    /// utime + stime in clock ticks.
    pub cpu_ticks: u64,
    /// Process start time in clock ticks since boot; distinguishes
    /// PID reuse.
    pub starttime: u64,
}

/// Enumerate processes under `proc_root` owned by `uid`. Kernel
/// threads (empty cmdline) are skipped.
pub(crate) fn list_processes(proc_root: &Path, uid: u32) -> Vec<ProcEntry> {
    let Ok(entries) = std::fs::read_dir(proc_root) else {
        return Vec::new();
    };
    let mut processes = Vec::new();
    for entry in entries.flatten() {
        let Some(pid) = entry
            .file_name()
            .to_str()
            .and_then(|n| n.parse::<i32>().ok())
        else {
            continue;
        };
        let dir = entry.path();
        let Ok(meta) = std::fs::metadata(&dir) else {
            continue;
        };
        if meta.uid() != uid {
            continue;
        }
        let Ok(cmdline_raw) = std::fs::read(dir.join("cmdline")) else {
            continue;
        };
        if cmdline_raw.is_empty() {
            continue; // kernel thread
        }
        let cmdline = String::from_utf8_lossy(&cmdline_raw)
            .split('\0')
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        let Ok(stat) = std::fs::read_to_string(dir.join("stat")) else {
            continue;
        };
        let Some((comm, cpu_ticks, starttime)) = parse_stat(&stat) else {
            continue;
        };
        processes.push(ProcEntry {
            pid,
            comm,
            cmdline,
            cpu_ticks,
            starttime,
        });
    }
    processes
}

/// Pull comm, utime+stime, and starttime out of a `stat` line.
/// The comm field is parenthesized and may itself contain spaces and
/// parentheses, so everything is indexed from its closing paren.
fn parse_stat(stat: &str) -> Option<(String, u64, u64)> {
    let open = stat.find('(')?;
    let close = stat.rfind(')')?;
    let comm = stat.get(open + 1..close)?.to_string();
    let fields: Vec<&str> = stat.get(close + 2..)?.split_whitespace().collect();
    // Post-comm indexes: state=0 ... utime=11, stime=12, starttime=19.
    let utime: u64 = fields.get(11)?.parse().ok()?;
    let stime: u64 = fields.get(12)?.parse().ok()?;
    let starttime: u64 = fields.get(19)?.parse().ok()?;
    Some((comm, utime + stime, starttime))
}

#[derive(Debug, Clone, Copy)]
struct CpuSample {
    cpu_ticks: u64,
    starttime: u64,
    at: Instant,
}

/// Detection worker for native processes.
pub struct ProcessWorker {
    proc_root: PathBuf,
    ticks_per_sec: f64,
    own_pid: i32,
    /// pid → previous CPU sample for smoothing.
    samples: HashMap<i32, CpuSample>,
}

impl ProcessWorker {
    pub fn new() -> Self {
        Self::with_proc_root(PathBuf::from("/proc"))
    }

    /// Point at an alternative proc tree (tests).
    pub fn with_proc_root(proc_root: PathBuf) -> Self {
        let ticks = unsafe { libc::sysconf(libc::_SC_CLK_TCK) };
        Self {
            proc_root,
            ticks_per_sec: if ticks > 0 { ticks as f64 } else { 100.0 },
            own_pid: std::process::id() as i32,
            samples: HashMap::new(),
        }
    }

    /// Smoothed CPU% for an entry, seeding the counter on first sight.
    fn smooth_cpu(&mut self, entry: &ProcEntry, now: Instant) -> Option<f32> {
        let prev = self.samples.insert(
            entry.pid,
            CpuSample {
                cpu_ticks: entry.cpu_ticks,
                starttime: entry.starttime,
                at: now,
            },
        );
        let prev = prev.filter(|p| p.starttime == entry.starttime)?;
        let wall = now.duration_since(prev.at).as_secs_f64();
        if wall <= 0.0 {
            return None;
        }
        let used = entry.cpu_ticks.saturating_sub(prev.cpu_ticks) as f64 / self.ticks_per_sec;
        Some(((used / wall) * 100.0) as f32)
    }

    /// Forget PIDs that vanished, so reused PIDs start fresh.
    fn prune_samples(&mut self, seen: &[ProcEntry]) {
        let live: std::collections::HashSet<i32> = seen.iter().map(|e| e.pid).collect();
        self.samples.retain(|pid, _| live.contains(pid));
    }
}

impl Default for ProcessWorker {
    fn default() -> Self {
        Self::new()
    }
}

impl DetectionWorker for ProcessWorker {
    fn name(&self) -> &'static str {
        "process"
    }

    fn is_available(&self) -> bool {
        self.proc_root.is_dir()
    }

    fn scan(&mut self, user: &UserRecord) -> Result<Vec<DetectedActivity>, WorkerError> {
        let now = Instant::now();
        let entries = list_processes(&self.proc_root, user.uid);
        self.prune_samples(&entries);

        let mut activities = Vec::new();
        for entry in &entries {
            if entry.pid == self.own_pid || is_protected(&entry.comm) {
                continue;
            }
            let cpu = self.smooth_cpu(entry, now);
            activities.push(DetectedActivity {
                key: entry.comm.clone(),
                source: ActivitySource::Process,
                pid: Some(entry.pid),
                cpu_percent: cpu,
                cmdline: Some(entry.cmdline.clone()),
            });
        }
        Ok(activities)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_proc(dir: &Path, pid: i32, comm: &str, cmdline: &[&str], cpu_ticks: u64) {
        let proc_dir = dir.join(pid.to_string());
        std::fs::create_dir_all(&proc_dir).unwrap();
        let args = cmdline.join("\0") + "\0";
        std::fs::write(proc_dir.join("cmdline"), args).unwrap();
        // Field layout mirrors a real stat line; utime/stime land at
        // post-comm indexes 11/12, starttime at 19.
        let stat = format!(
            "{pid} ({comm}) S 1 {pid} {pid} 0 -1 4194304 100 0 0 0 {utime} {stime} 0 0 20 0 1 0 777 1000000 500 18446744073709551615",
            pid = pid,
            comm = comm,
            utime = cpu_ticks / 2,
            stime = cpu_ticks - cpu_ticks / 2,
        );
        std::fs::write(proc_dir.join("stat"), stat).unwrap();
    }

    fn test_user(dir: &Path) -> UserRecord {
        UserRecord {
            id: 1,
            name: "anders".into(),
            uid: std::fs::metadata(dir).unwrap().uid(),
            enabled: true,
        }
    }

    #[test]
    fn parse_stat_survives_parens_in_comm() {
        let stat = "42 (Web (Content)) S 1 42 42 0 -1 0 0 0 0 0 300 200 0 0 20 0 1 0 999 0 0 0";
        let (comm, ticks, starttime) = parse_stat(stat).unwrap();
        assert_eq!(comm, "Web (Content)");
        assert_eq!(ticks, 500);
        assert_eq!(starttime, 999);
    }

    #[test]
    fn first_sample_reports_no_cpu() {
        let dir = tempfile::tempdir().unwrap();
        fake_proc(dir.path(), 100, "factorio", &["/usr/bin/factorio"], 1000);
        let mut worker = ProcessWorker::with_proc_root(dir.path().to_path_buf());
        let user = test_user(dir.path());

        let activities = worker.scan(&user).unwrap();
        assert_eq!(activities.len(), 1);
        assert_eq!(activities[0].key, "factorio");
        assert!(activities[0].cpu_percent.is_none());
    }

    #[test]
    fn second_sample_yields_smoothed_cpu() {
        let dir = tempfile::tempdir().unwrap();
        fake_proc(dir.path(), 100, "factorio", &["/usr/bin/factorio"], 0);
        let mut worker = ProcessWorker::with_proc_root(dir.path().to_path_buf());
        let user = test_user(dir.path());
        worker.scan(&user).unwrap();

        std::thread::sleep(std::time::Duration::from_millis(100));
        // Process burned 100 ticks (~1s at 100Hz) in ~0.1s of wall time.
        fake_proc(dir.path(), 100, "factorio", &["/usr/bin/factorio"], 100);
        let activities = worker.scan(&user).unwrap();
        let cpu = activities[0].cpu_percent.expect("second sample has cpu");
        assert!(cpu > 50.0, "expected busy process, got {cpu}");
    }

    #[test]
    fn kernel_threads_and_protected_names_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        // Kernel thread: empty cmdline.
        let kthread = dir.path().join("7");
        std::fs::create_dir_all(&kthread).unwrap();
        std::fs::write(kthread.join("cmdline"), b"").unwrap();
        std::fs::write(kthread.join("stat"), "7 (kthreadd) S 0 0 0 0 -1 0 0 0 0 0 0 0 0 0 20 0 1 0 5 0 0 0").unwrap();
        fake_proc(dir.path(), 100, "bash", &["-bash"], 10);
        fake_proc(dir.path(), 101, "retroarch", &["retroarch"], 10);

        let mut worker = ProcessWorker::with_proc_root(dir.path().to_path_buf());
        let activities = worker.scan(&test_user(dir.path())).unwrap();
        let keys: Vec<&str> = activities.iter().map(|a| a.key.as_str()).collect();
        assert_eq!(keys, vec!["retroarch"]);
    }
}
