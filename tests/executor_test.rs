/*!
 * Executor Tests
 * End-to-end resource-limit enforcement against real child processes
 */

use adaos_exec::core::KILLED_EXIT_CODE;
use adaos_exec::sandbox::{ExecLimits, ExecRequest, KilledReason, ProcSandbox};
use pretty_assertions::assert_eq;
use serial_test::serial;
use std::time::{Duration, Instant};
use tempfile::tempdir;

fn sandbox(dir: &tempfile::TempDir) -> ProcSandbox {
    let _ = env_logger::builder().is_test(true).try_init();
    ProcSandbox::new(dir.path()).unwrap()
}

#[test]
fn test_unbounded_run_completes() {
    let dir = tempdir().unwrap();
    let res = sandbox(&dir)
        .run(&ExecRequest::new(["echo", "done"]))
        .unwrap();

    assert_eq!(res.exit_code, 0);
    assert_eq!(res.stdout.trim(), "done");
    assert!(!res.timed_out);
    assert_eq!(res.killed_reason, None);
}

#[test]
#[serial]
fn test_wall_clock_limit_kills_promptly() {
    let dir = tempdir().unwrap();
    let started = Instant::now();

    let res = sandbox(&dir)
        .run(
            &ExecRequest::new(["sleep", "5"])
                .with_limits(ExecLimits::default().with_wall_time(Duration::from_millis(200))),
        )
        .unwrap();
    let elapsed = started.elapsed();

    assert!(res.timed_out);
    assert_eq!(res.killed_reason, Some(KilledReason::WallTimeExceeded));
    assert_ne!(res.exit_code, 0);
    // killed near the ceiling, far before the sleep would finish
    assert!(elapsed < Duration::from_secs(3), "took {:?}", elapsed);
}

#[cfg(target_os = "linux")]
#[test]
#[serial]
fn test_cpu_limit_kills_busy_loop() {
    let dir = tempdir().unwrap();

    let res = sandbox(&dir)
        .run(
            &ExecRequest::new(["sh", "-c", "while :; do :; done"]).with_limits(
                ExecLimits::default()
                    .with_cpu_time(Duration::from_millis(300))
                    .with_wall_time(Duration::from_secs(20)),
            ),
        )
        .unwrap();

    assert!(res.timed_out);
    assert_eq!(res.killed_reason, Some(KilledReason::CpuTimeExceeded));
}

#[cfg(target_os = "linux")]
#[test]
#[serial]
fn test_cpu_limit_counts_children() {
    let dir = tempdir().unwrap();

    // The shell sleeps while its child burns cpu; only tree-wide
    // accounting catches this
    let res = sandbox(&dir)
        .run(
            &ExecRequest::new([
                "sh",
                "-c",
                "sh -c 'while :; do :; done' & wait",
            ])
            .with_limits(
                ExecLimits::default()
                    .with_cpu_time(Duration::from_millis(300))
                    .with_wall_time(Duration::from_secs(20)),
            ),
        )
        .unwrap();

    assert!(res.timed_out);
    assert_eq!(res.killed_reason, Some(KilledReason::CpuTimeExceeded));
}

#[cfg(target_os = "linux")]
#[test]
#[serial]
fn test_rss_limit_kills_memory_hog() {
    let dir = tempdir().unwrap();

    // sort buffers unbounded stdin in memory
    let res = sandbox(&dir)
        .run(
            &ExecRequest::new(["sh", "-c", "sort /dev/zero"]).with_limits(
                ExecLimits::default()
                    .with_max_rss_mb(32)
                    .with_wall_time(Duration::from_secs(20)),
            ),
        )
        .unwrap();

    // Either the monitor saw the tree cross the ceiling or the kernel
    // backstop refused the allocation first; both count as enforcement
    assert_ne!(res.exit_code, 0);
    if res.timed_out {
        assert_eq!(res.killed_reason, Some(KilledReason::RssExceeded));
    }
}

#[test]
fn test_nonzero_exit_is_data_not_error() {
    let dir = tempdir().unwrap();
    let res = sandbox(&dir)
        .run(&ExecRequest::new(["sh", "-c", "exit 3"]))
        .unwrap();

    assert_eq!(res.exit_code, 3);
    assert!(!res.success());
    assert!(!res.timed_out);
}

#[test]
#[serial]
fn test_killed_run_reports_sentinel_or_signal() {
    let dir = tempdir().unwrap();
    let res = sandbox(&dir)
        .run(
            &ExecRequest::new(["sleep", "5"])
                .with_limits(ExecLimits::default().with_wall_time(Duration::from_millis(200))),
        )
        .unwrap();

    // On unix the SIGKILL shows up as a signal exit; the sentinel covers
    // platforms without a code at all
    assert!(res.exit_code == KILLED_EXIT_CODE || res.exit_code != 0);
}

#[test]
fn test_stderr_captured_separately() {
    let dir = tempdir().unwrap();
    let res = sandbox(&dir)
        .run(&ExecRequest::new(["sh", "-c", "echo out; echo err >&2"]))
        .unwrap();

    assert_eq!(res.stdout.trim(), "out");
    assert_eq!(res.stderr.trim(), "err");
}
