/*!
 * Resource Monitor
 * Per-invocation polling thread that watches one process tree and kills it
 * on limit breach; introspection failure is fail-safe (kill, never fail-open)
 */

use super::types::{ExecLimits, KilledReason};
use crate::core::Pid;
use log::{debug, warn};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Poll cadence; tens of milliseconds keeps overshoot bounded without
/// measurable overhead on the hot path
pub(crate) const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

struct Shared {
    done: AtomicBool,
    verdict: Mutex<Option<KilledReason>>,
}

/// Handle to one monitor thread. The executor spawns one per invocation;
/// independent runs share no state.
pub(crate) struct ResourceMonitor {
    shared: Arc<Shared>,
    thread: Option<thread::JoinHandle<()>>,
}

impl ResourceMonitor {
    pub fn spawn(pid: Pid, limits: ExecLimits, interval: Duration) -> Self {
        let shared = Arc::new(Shared {
            done: AtomicBool::new(false),
            verdict: Mutex::new(None),
        });

        let state = Arc::clone(&shared);
        let thread = thread::Builder::new()
            .name(format!("sandbox-monitor-{}", pid))
            .spawn(move || monitor_loop(pid, limits, interval, state));

        let thread = match thread {
            Ok(t) => Some(t),
            Err(e) => {
                // No monitor means no ceiling; kill rather than run unbounded
                warn!("failed to spawn monitor thread for pid {}: {}", pid, e);
                *shared.verdict.lock() = Some(KilledReason::MonitorError);
                kill_tree(pid);
                None
            }
        };

        Self { shared, thread }
    }

    /// Signal that the child has been reaped and collect the verdict.
    /// Joins the monitor thread, so the verdict is final.
    pub fn finish(mut self) -> Option<KilledReason> {
        self.shared.done.store(true, Ordering::Release);
        if let Some(t) = self.thread.take() {
            let _ = t.join();
        }
        *self.shared.verdict.lock()
    }
}

fn monitor_loop(pid: Pid, limits: ExecLimits, interval: Duration, shared: Arc<Shared>) {
    let start = Instant::now();

    loop {
        if shared.done.load(Ordering::Acquire) {
            return;
        }

        if let Some(wall) = limits.wall_time {
            if start.elapsed() > wall {
                debug!("pid {} exceeded wall time {:?}", pid, wall);
                record_and_kill(pid, &shared, KilledReason::WallTimeExceeded);
                return;
            }
        }

        // CPU/RSS need tree introspection; available on Linux. Elsewhere the
        // kernel rlimits applied at spawn are the enforcement for these two.
        #[cfg(target_os = "linux")]
        if limits.cpu_time.is_some() || limits.max_rss_mb.is_some() {
            match tree::sample(pid) {
                Ok(Some(sample)) => {
                    if let Some(cpu) = limits.cpu_time {
                        if sample.cpu > cpu {
                            debug!(
                                "pid {} tree cpu {:?} exceeded limit {:?}",
                                pid, sample.cpu, cpu
                            );
                            record_and_kill(pid, &shared, KilledReason::CpuTimeExceeded);
                            return;
                        }
                    }
                    if let Some(mb) = limits.max_rss_mb {
                        if sample.max_rss_bytes > mb * 1024 * 1024 {
                            debug!(
                                "pid {} tree rss {} exceeded limit {}MB",
                                pid, sample.max_rss_bytes, mb
                            );
                            record_and_kill(pid, &shared, KilledReason::RssExceeded);
                            return;
                        }
                    }
                }
                // Root is gone: the child exited and the executor is
                // collecting the result
                Ok(None) => return,
                Err(e) => {
                    warn!("monitor introspection failed for pid {}: {}", pid, e);
                    record_and_kill(pid, &shared, KilledReason::MonitorError);
                    return;
                }
            }
        }

        thread::sleep(interval);
    }
}

fn record_and_kill(pid: Pid, shared: &Shared, reason: KilledReason) {
    *shared.verdict.lock() = Some(reason);
    kill_tree(pid);
}

/// Kill a supervised process tree: known descendants first, then the process
/// group as a unit, then the root. Signals to already-gone processes are
/// ignored.
#[cfg(unix)]
pub(crate) fn kill_tree(pid: Pid) {
    use nix::sys::signal::{kill, killpg, Signal};
    use nix::unistd::Pid as NixPid;

    #[cfg(target_os = "linux")]
    for child in tree::descendants(pid) {
        let _ = kill(NixPid::from_raw(child as i32), Signal::SIGKILL);
    }

    // The executor placed the child in its own process group
    let _ = killpg(NixPid::from_raw(pid as i32), Signal::SIGKILL);
    let _ = kill(NixPid::from_raw(pid as i32), Signal::SIGKILL);
}

#[cfg(windows)]
pub(crate) fn kill_tree(pid: Pid) {
    // taskkill /T takes the whole tree down with the root
    let _ = std::process::Command::new("taskkill")
        .args(["/T", "/F", "/PID", &pid.to_string()])
        .output();
}

#[cfg(not(any(unix, windows)))]
pub(crate) fn kill_tree(_pid: Pid) {}

/// Process-tree introspection via /proc. Reads only; never mutates global
/// state. Individual processes racing away mid-scan are skipped.
#[cfg(target_os = "linux")]
mod tree {
    use std::collections::HashMap;
    use std::time::Duration;
    use std::{fs, io};

    pub struct TreeSample {
        /// user + system CPU time summed over root and current descendants
        pub cpu: Duration,
        /// max resident memory over root and current descendants
        pub max_rss_bytes: u64,
    }

    struct ProcStat {
        ppid: u32,
        cpu_ticks: u64,
        rss_pages: u64,
    }

    /// Sample the tree rooted at `root`. `Ok(None)` means the root has
    /// already exited.
    pub fn sample(root: u32) -> io::Result<Option<TreeSample>> {
        let stats = scan()?;
        if !stats.contains_key(&root) {
            return Ok(None);
        }

        let members = members_of(root, &stats);
        let tck = clock_ticks_per_sec();
        let page = page_size();

        let mut total_ticks = 0u64;
        let mut max_rss_pages = 0u64;
        for pid in &members {
            if let Some(st) = stats.get(pid) {
                total_ticks += st.cpu_ticks;
                max_rss_pages = max_rss_pages.max(st.rss_pages);
            }
        }

        Ok(Some(TreeSample {
            cpu: Duration::from_millis(total_ticks.saturating_mul(1000) / tck),
            max_rss_bytes: max_rss_pages.saturating_mul(page),
        }))
    }

    /// Current descendants of `root`, depth-first so leaves come before
    /// their parents
    pub fn descendants(root: u32) -> Vec<u32> {
        let stats = match scan() {
            Ok(s) => s,
            Err(_) => return Vec::new(),
        };
        let mut members = members_of(root, &stats);
        members.retain(|p| *p != root);
        members.reverse();
        members
    }

    fn members_of(root: u32, stats: &HashMap<u32, ProcStat>) -> Vec<u32> {
        let mut children: HashMap<u32, Vec<u32>> = HashMap::new();
        for (pid, st) in stats {
            children.entry(st.ppid).or_default().push(*pid);
        }

        let mut members = vec![root];
        let mut cursor = 0;
        while cursor < members.len() {
            if let Some(kids) = children.get(&members[cursor]) {
                members.extend(kids.iter().copied());
            }
            cursor += 1;
        }
        members
    }

    fn scan() -> io::Result<HashMap<u32, ProcStat>> {
        let mut stats = HashMap::new();
        for entry in fs::read_dir("/proc")? {
            let entry = entry?;
            let name = entry.file_name();
            let Ok(pid) = name.to_string_lossy().parse::<u32>() else {
                continue;
            };
            // Processes may exit between readdir and read; skip them
            if let Ok(content) = fs::read_to_string(format!("/proc/{}/stat", pid)) {
                if let Some(st) = parse_stat(&content) {
                    stats.insert(pid, st);
                }
            }
        }
        Ok(stats)
    }

    /// Parse /proc/<pid>/stat. The comm field may contain spaces and
    /// parentheses, so split on the last ')' first.
    fn parse_stat(content: &str) -> Option<ProcStat> {
        let (_, rest) = content.rsplit_once(')')?;
        let fields: Vec<&str> = rest.split_whitespace().collect();
        // After comm: fields[1]=ppid, [11]=utime, [12]=stime, [21]=rss
        if fields.len() < 22 {
            return None;
        }
        let ppid = fields[1].parse().ok()?;
        let utime: u64 = fields[11].parse().ok()?;
        let stime: u64 = fields[12].parse().ok()?;
        let rss_pages = fields[21].parse::<i64>().ok()?.max(0) as u64;
        Some(ProcStat {
            ppid,
            cpu_ticks: utime + stime,
            rss_pages,
        })
    }

    fn clock_ticks_per_sec() -> u64 {
        // Safety: sysconf is always safe to call
        let tck = unsafe { nix::libc::sysconf(nix::libc::_SC_CLK_TCK) };
        if tck > 0 {
            tck as u64
        } else {
            100
        }
    }

    fn page_size() -> u64 {
        // Safety: sysconf is always safe to call
        let page = unsafe { nix::libc::sysconf(nix::libc::_SC_PAGESIZE) };
        if page > 0 {
            page as u64
        } else {
            4096
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_parse_stat_plain() {
            let line = "1234 (sleep) S 1 1234 1234 0 -1 4194304 100 0 0 0 \
                        7 3 0 0 20 0 1 0 100 1000000 256 18446744073709551615";
            let st = parse_stat(line).unwrap();
            assert_eq!(st.ppid, 1);
            assert_eq!(st.cpu_ticks, 10);
            assert_eq!(st.rss_pages, 256);
        }

        #[test]
        fn test_parse_stat_comm_with_spaces() {
            let line = "42 (tmux: server) S 7 42 42 0 -1 4194304 100 0 0 0 \
                        1 1 0 0 20 0 1 0 100 1000000 64 18446744073709551615";
            let st = parse_stat(line).unwrap();
            assert_eq!(st.ppid, 7);
            assert_eq!(st.cpu_ticks, 2);
        }

        #[test]
        fn test_sample_own_process() {
            let pid = std::process::id();
            let sample = sample(pid).unwrap().expect("self should be alive");
            assert!(sample.max_rss_bytes > 0);
        }

        #[test]
        fn test_sample_dead_pid_is_none() {
            // PIDs near the u32 max are far above any default pid_max
            assert!(sample(u32::MAX - 1).unwrap().is_none());
        }
    }
}
