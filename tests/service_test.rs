/*!
 * Sandbox Service Tests
 * Capability gate, profiles, and bus events wired to the real executor
 */

use adaos_exec::capabilities::StaticCapabilities;
use adaos_exec::events::MemoryBus;
use adaos_exec::sandbox::{
    ExecLimits, ProcSandbox, SandboxError, SandboxRequest, SandboxService, CAP_PROC_RUN,
};
use pretty_assertions::assert_eq;
use serial_test::serial;
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;

fn wired(dir: &tempfile::TempDir) -> (SandboxService, Arc<StaticCapabilities>, Arc<MemoryBus>) {
    let _ = env_logger::builder().is_test(true).try_init();
    let runner = Arc::new(ProcSandbox::new(dir.path()).unwrap());
    let caps = Arc::new(StaticCapabilities::new());
    let bus = Arc::new(MemoryBus::new());
    let svc = SandboxService::new(runner, caps.clone(), bus.clone());
    (svc, caps, bus)
}

#[test]
fn test_granted_subject_runs_real_command() {
    let dir = tempdir().unwrap();
    let (svc, caps, bus) = wired(&dir);
    caps.grant("core", CAP_PROC_RUN);

    let res = svc
        .run("core", &SandboxRequest::new(["echo", "via-service"]))
        .unwrap();

    assert_eq!(res.exit_code, 0);
    assert_eq!(res.stdout.trim(), "via-service");
    assert_eq!(bus.topics(), vec!["sandbox.start", "sandbox.end"]);
}

#[test]
fn test_denied_subject_gets_no_process_and_no_events() {
    let dir = tempdir().unwrap();
    let (svc, _caps, bus) = wired(&dir);

    let err = svc
        .run("untrusted-skill", &SandboxRequest::new(["echo", "hi"]))
        .unwrap_err();

    assert!(matches!(err, SandboxError::CapabilityDenied { .. }));
    assert!(bus.topics().is_empty());
}

#[test]
#[serial]
fn test_timeout_emits_killed_between_start_and_end() {
    let dir = tempdir().unwrap();
    let (svc, caps, bus) = wired(&dir);
    caps.grant("core", CAP_PROC_RUN);

    let req = SandboxRequest::new(["sleep", "5"])
        .with_limits(ExecLimits::unbounded().with_wall_time(Duration::from_millis(200)));
    let res = svc.run("core", &req).unwrap();

    assert!(res.timed_out);
    assert_eq!(
        bus.topics(),
        vec!["sandbox.start", "sandbox.killed", "sandbox.end"]
    );

    let events = bus.snapshot();
    assert_eq!(events[1].1["reason"], "wall_time_exceeded");
    assert_eq!(events[2].1["timed_out"], true);
    // duration is real elapsed time, well under the sleep target
    assert!(events[2].1["duration"].as_f64().unwrap() < 3.0);
}

#[test]
fn test_profile_limits_flow_through() {
    let dir = tempdir().unwrap();
    let (svc, caps, bus) = wired(&dir);
    caps.grant("core", CAP_PROC_RUN);

    svc.run("core", &SandboxRequest::new(["true"]).with_profile("tool"))
        .unwrap();

    let events = bus.snapshot();
    assert_eq!(events[0].0, "sandbox.start");
    assert_eq!(events[0].1["profile"], "tool");
    assert_eq!(events[0].1["limits"]["wall"], 15.0);
    assert_eq!(events[0].1["limits"]["rss"], 512);
}

#[test]
fn test_service_env_reaches_child() {
    let dir = tempdir().unwrap();
    let (svc, caps, _bus) = wired(&dir);
    caps.grant("core", CAP_PROC_RUN);

    let req = SandboxRequest::new(["sh", "-c", "echo $GREETING"])
        .with_env(vec![("GREETING".to_string(), "salve".to_string())]);
    let res = svc.run("core", &req).unwrap();

    assert_eq!(res.stdout.trim(), "salve");
}

#[test]
fn test_cwd_containment_enforced_through_service() {
    let dir = tempdir().unwrap();
    let (svc, caps, bus) = wired(&dir);
    caps.grant("core", CAP_PROC_RUN);

    let err = svc
        .run("core", &SandboxRequest::new(["pwd"]).with_cwd("/"))
        .unwrap_err();

    assert!(matches!(err, SandboxError::CwdOutsideBase { .. }));
    // start was emitted before the executor rejected the cwd
    assert_eq!(bus.topics(), vec!["sandbox.start"]);
}
