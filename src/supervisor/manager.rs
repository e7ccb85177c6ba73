/*!
 * Process Supervisor
 * Owns the lifecycle of long-running commands and in-process tasks:
 * state machine, graceful/forced stop, crash-loop-protected restart
 */

use super::types::{
    ProcInfo, ProcState, ProcessSpec, ProcessTarget, SupervisorConfig, SupervisorResult,
};
use crate::core::{Handle, KILLED_EXIT_CODE};
use crate::events::{emit, EventBus};
use dashmap::DashMap;
use log::{info, warn};
use serde_json::json;
use std::process::Stdio;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};

/// Grace period added on top of the caller's stop timeout when waiting for
/// the record to settle after a forced kill
const SETTLE_GRACE: Duration = Duration::from_secs(2);

struct StopRequest {
    timeout: Duration,
}

/// Registry entry: the supervise task owns the full record; the registry
/// keeps only what `status()`/`stop()` need
struct ProcEntry {
    name: String,
    state_rx: watch::Receiver<ProcState>,
    ctl_tx: mpsc::UnboundedSender<StopRequest>,
    restarts: Arc<AtomicU32>,
}

/// Asynchronous supervisor. Each `start()` spawns one independent tokio
/// task that exclusively owns its record; the registry is only touched for
/// registration and lookup.
pub struct ProcessSupervisor {
    bus: Arc<dyn EventBus>,
    config: SupervisorConfig,
    records: DashMap<Handle, ProcEntry>,
}

impl ProcessSupervisor {
    pub fn new(bus: Arc<dyn EventBus>) -> Self {
        Self::with_config(bus, SupervisorConfig::default())
    }

    pub fn with_config(bus: Arc<dyn EventBus>, config: SupervisorConfig) -> Self {
        info!(
            "process supervisor initialized (restart_on_crash={}, max_restarts={})",
            config.restart_on_crash, config.max_restarts
        );
        Self {
            bus,
            config,
            records: DashMap::new(),
        }
    }

    /// Register and launch a supervised run. Returns immediately; the launch
    /// outcome is observable via events and `status()`. Must be called from
    /// within a tokio runtime.
    pub fn start(&self, spec: ProcessSpec) -> SupervisorResult<Handle> {
        spec.validate()?;

        let handle = Handle::generate();
        let (state_tx, state_rx) = watch::channel(ProcState::Init);
        let (ctl_tx, ctl_rx) = mpsc::unbounded_channel();
        let restarts = Arc::new(AtomicU32::new(0));

        self.records.insert(
            handle,
            ProcEntry {
                name: spec.name.clone(),
                state_rx,
                ctl_tx,
                restarts: Arc::clone(&restarts),
            },
        );

        let bus = Arc::clone(&self.bus);
        let config = self.config.clone();
        tokio::spawn(supervise(bus, config, spec, handle, state_tx, ctl_rx, restarts));

        Ok(handle)
    }

    /// Current state of a handle. Unknown handles report the `Error`
    /// sentinel so polling callers never need error handling.
    pub fn status(&self, handle: &Handle) -> ProcState {
        self.records
            .get(handle)
            .map(|entry| *entry.state_rx.borrow())
            .unwrap_or(ProcState::Error)
    }

    /// Request termination: graceful first, forced after `timeout`. Waits
    /// for the record to reach a terminal state. Safe to call repeatedly
    /// and on already-terminal or unknown handles.
    pub async fn stop(&self, handle: &Handle, timeout: Duration) {
        let (mut state_rx, ctl_tx) = match self.records.get(handle) {
            Some(entry) => (entry.state_rx.clone(), entry.ctl_tx.clone()),
            None => return,
        };

        if state_rx.borrow().is_terminal() {
            return;
        }

        // The supervise task may have finished in the meantime; the closed
        // channel just means there is nothing left to stop
        let _ = ctl_tx.send(StopRequest { timeout });

        let settle = timeout + SETTLE_GRACE;
        let waited = tokio::time::timeout(settle, async {
            while !state_rx.borrow_and_update().is_terminal() {
                if state_rx.changed().await.is_err() {
                    break;
                }
            }
        })
        .await;

        if waited.is_err() {
            warn!("stop({}): record did not settle within {:?}", handle, settle);
        }
    }

    /// Snapshot of all known handles
    pub fn list(&self) -> Vec<ProcInfo> {
        self.records
            .iter()
            .map(|entry| ProcInfo {
                handle: *entry.key(),
                name: entry.name.clone(),
                state: *entry.state_rx.borrow(),
                restarts: entry.restarts.load(Ordering::Relaxed),
            })
            .collect()
    }

    /// Stop every non-terminal handle; used for orderly platform teardown
    pub async fn shutdown(&self, timeout: Duration) {
        let handles: Vec<Handle> = self.records.iter().map(|e| *e.key()).collect();
        for handle in handles {
            self.stop(&handle, timeout).await;
        }
    }
}

/// One run attempt in flight
enum Attempt {
    Proc(tokio::process::Child),
    Task(tokio::task::JoinHandle<anyhow::Result<()>>),
}

/// Result of one run attempt
struct AttemptOutcome {
    returncode: Option<i32>,
    error: Option<String>,
}

impl Attempt {
    fn launch(spec: &ProcessSpec) -> std::io::Result<Self> {
        match &spec.target {
            ProcessTarget::Command(argv) => {
                let mut cmd = tokio::process::Command::new(&argv[0]);
                cmd.args(&argv[1..])
                    .stdin(Stdio::null())
                    .stdout(Stdio::null())
                    .stderr(Stdio::null())
                    .kill_on_drop(true);
                if !spec.env.is_empty() {
                    cmd.env_clear();
                    cmd.envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())));
                }
                Ok(Attempt::Proc(cmd.spawn()?))
            }
            ProcessTarget::Task(entry) => Ok(Attempt::Task(tokio::spawn(entry()))),
        }
    }

    async fn wait(&mut self) -> AttemptOutcome {
        match self {
            Attempt::Proc(child) => match child.wait().await {
                Ok(status) => AttemptOutcome {
                    returncode: Some(exit_code_of(status)),
                    error: None,
                },
                Err(e) => AttemptOutcome {
                    returncode: None,
                    error: Some(format!("wait_error: {}", e)),
                },
            },
            Attempt::Task(task) => match task.await {
                Ok(Ok(())) => AttemptOutcome {
                    returncode: Some(0),
                    error: None,
                },
                Ok(Err(e)) => AttemptOutcome {
                    returncode: Some(-1),
                    error: Some(format!("entry_error: {}", e)),
                },
                Err(e) if e.is_cancelled() => AttemptOutcome {
                    returncode: None,
                    error: None,
                },
                Err(e) => AttemptOutcome {
                    returncode: Some(-1),
                    error: Some(format!("entry_panic: {}", e)),
                },
            },
        }
    }

    /// Graceful termination, escalating to a forced kill after `timeout`.
    /// External processes get a terminate signal; tasks get a cooperative
    /// abort. Both paths tolerate already-finished attempts.
    async fn shutdown(&mut self, timeout: Duration) {
        match self {
            Attempt::Proc(child) => {
                terminate(child);
                if tokio::time::timeout(timeout, child.wait()).await.is_err() {
                    let _ = child.kill().await;
                }
            }
            Attempt::Task(task) => {
                task.abort();
                // Cancellation or completion both count as settled
                let _ = tokio::time::timeout(timeout, &mut *task).await;
            }
        }
    }
}

#[cfg(unix)]
fn terminate(child: &tokio::process::Child) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid as NixPid;

    if let Some(pid) = child.id() {
        let _ = kill(NixPid::from_raw(pid as i32), Signal::SIGTERM);
    }
}

#[cfg(not(unix))]
fn terminate(_child: &tokio::process::Child) {
    // No graceful signal available; the escalation path kills shortly
}

fn exit_code_of(status: std::process::ExitStatus) -> i32 {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        status
            .code()
            .or_else(|| status.signal().map(|sig| -sig))
            .unwrap_or(KILLED_EXIT_CODE)
    }
    #[cfg(not(unix))]
    {
        status.code().unwrap_or(KILLED_EXIT_CODE)
    }
}

/// Per-handle supervise loop. Exclusive owner of the record once spawned;
/// every state transition and event for this handle flows through here, in
/// order.
async fn supervise(
    bus: Arc<dyn EventBus>,
    config: SupervisorConfig,
    spec: ProcessSpec,
    handle: Handle,
    state_tx: watch::Sender<ProcState>,
    mut ctl_rx: mpsc::UnboundedReceiver<StopRequest>,
    restarts: Arc<AtomicU32>,
) {
    let mut consecutive = 0u32;

    loop {
        let _ = state_tx.send(ProcState::Starting);
        emit(
            bus.as_ref(),
            "proc.starting",
            json!({ "handle": handle.to_string(), "name": spec.name }),
        );
        let attempt_started = Instant::now();

        let mut attempt = match Attempt::launch(&spec) {
            Ok(attempt) => attempt,
            Err(e) => {
                warn!("'{}' ({}): launch failed: {}", spec.name, handle, e);
                let _ = state_tx.send(ProcState::Error);
                emit(
                    bus.as_ref(),
                    "proc.error",
                    json!({
                        "handle": handle.to_string(),
                        "name": spec.name,
                        "error": format!("start_error: {}", e),
                    }),
                );
                return;
            }
        };

        let _ = state_tx.send(ProcState::Running);
        emit(
            bus.as_ref(),
            "proc.running",
            json!({ "handle": handle.to_string(), "name": spec.name }),
        );

        let outcome = tokio::select! {
            outcome = attempt.wait() => outcome,
            Some(req) = ctl_rx.recv() => {
                let _ = state_tx.send(ProcState::Stopping);
                emit(
                    bus.as_ref(),
                    "proc.stopping",
                    json!({ "handle": handle.to_string(), "name": spec.name }),
                );
                attempt.shutdown(req.timeout).await;
                let _ = state_tx.send(ProcState::Stopped);
                emit(
                    bus.as_ref(),
                    "proc.stopped",
                    json!({ "handle": handle.to_string(), "name": spec.name }),
                );
                return;
            }
        };

        emit(
            bus.as_ref(),
            "proc.exited",
            json!({
                "handle": handle.to_string(),
                "name": spec.name,
                "returncode": outcome.returncode,
                "error": outcome.error,
            }),
        );

        let crashed = outcome.error.is_some() || outcome.returncode.map_or(true, |c| c != 0);

        if !(config.restart_on_crash && crashed) {
            let _ = state_tx.send(ProcState::Stopped);
            emit(
                bus.as_ref(),
                "proc.stopped",
                json!({ "handle": handle.to_string(), "name": spec.name }),
            );
            return;
        }

        // Crash-loop discrimination: a run that survived past the window is
        // an isolated failure, not a continuation of the loop
        if attempt_started.elapsed() > config.crash_window {
            consecutive = 0;
        }
        consecutive += 1;
        restarts.store(consecutive, Ordering::Relaxed);

        if consecutive > config.max_restarts {
            warn!(
                "'{}' ({}): crash loop, giving up after {} restarts",
                spec.name, handle, config.max_restarts
            );
            let _ = state_tx.send(ProcState::Error);
            emit(
                bus.as_ref(),
                "proc.error",
                json!({
                    "handle": handle.to_string(),
                    "name": spec.name,
                    "error": format!("crash_loop: restarts>{}", config.max_restarts),
                }),
            );
            return;
        }

        let delay = config.backoff_delay(consecutive);
        emit(
            bus.as_ref(),
            "proc.restart",
            json!({
                "handle": handle.to_string(),
                "name": spec.name,
                "attempt": consecutive,
                "delay": delay.as_secs_f64(),
            }),
        );

        // A stop during backoff settles the record without another attempt
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            Some(_req) = ctl_rx.recv() => {
                let _ = state_tx.send(ProcState::Stopping);
                emit(
                    bus.as_ref(),
                    "proc.stopping",
                    json!({ "handle": handle.to_string(), "name": spec.name }),
                );
                let _ = state_tx.send(ProcState::Stopped);
                emit(
                    bus.as_ref(),
                    "proc.stopped",
                    json!({ "handle": handle.to_string(), "name": spec.name }),
                );
                return;
            }
        }
    }
}
