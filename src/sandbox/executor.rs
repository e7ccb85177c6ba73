/*!
 * Process Sandbox
 * Blocking, resource-limited command execution with working-directory
 * containment and a per-invocation monitor thread
 */

use super::monitor::{ResourceMonitor, DEFAULT_POLL_INTERVAL};
use super::rlimits::{KernelLimiter, ResourceLimiter};
use super::types::{ExecRequest, ExecResult, SandboxError, SandboxResult};
use super::Sandbox;
use crate::core::KILLED_EXIT_CODE;
use log::{debug, info};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

/// Runs one command to completion while a dedicated monitor thread enforces
/// the configured ceilings. Independent invocations share nothing beyond the
/// read-only base configuration.
pub struct ProcSandbox {
    base: PathBuf,
    limiter: KernelLimiter,
    poll_interval: Duration,
}

impl ProcSandbox {
    /// Create a sandbox rooted at `base`. The directory must exist; all
    /// working directories passed to [`run`](Self::run) must resolve under it.
    pub fn new(base: impl AsRef<Path>) -> SandboxResult<Self> {
        let base = base
            .as_ref()
            .canonicalize()
            .map_err(|e| SandboxError::Io(format!("sandbox base: {}", e)))?;
        info!("process sandbox initialized at {}", base.display());
        Ok(Self {
            base,
            limiter: KernelLimiter::new(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        })
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    /// Containment check runs before any OS call is attempted
    fn checked_cwd(&self, cwd: &Path) -> SandboxResult<PathBuf> {
        let resolved = cwd.canonicalize().unwrap_or_else(|_| cwd.to_path_buf());
        if resolved.starts_with(&self.base) {
            Ok(resolved)
        } else {
            Err(SandboxError::CwdOutsideBase { path: resolved })
        }
    }

    /// Run one command to completion, blocking the caller.
    ///
    /// Resource-limit violations are reported as data on the result, never
    /// as errors; spawn failures and containment violations are errors.
    pub fn run(&self, req: &ExecRequest) -> SandboxResult<ExecResult> {
        let limits = req.limits.clone().unwrap_or_default();
        let program = req
            .cmd
            .first()
            .ok_or_else(|| SandboxError::InvalidCommand("empty argv".to_string()))?;

        let cwd = match &req.cwd {
            Some(dir) => Some(self.checked_cwd(dir)?),
            None => None,
        };

        // Clean environment slate; the caller supplies exactly what the
        // child may see
        let mut cmd = Command::new(program);
        cmd.args(&req.cmd[1..]);
        cmd.env_clear();
        cmd.envs(req.env.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        if let Some(dir) = &cwd {
            cmd.current_dir(dir);
        }
        cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
        cmd.stdin(if req.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });

        self.limiter.prepare(&mut cmd, &limits);

        debug!("sandbox exec: {:?} limits={:?}", req.cmd, limits);
        let mut child = cmd
            .spawn()
            .map_err(|e| SandboxError::Spawn(format!("{}: {}", program, e)))?;

        if let Some(input) = &req.stdin {
            if let Some(mut stdin) = child.stdin.take() {
                // A child that exits without reading breaks the pipe; that
                // shows up in its exit status, not here
                let _ = stdin.write_all(input);
            }
        }

        let pid = child.id();
        let monitor = ResourceMonitor::spawn(pid, limits, self.poll_interval);

        let output = match child.wait_with_output() {
            Ok(output) => output,
            Err(e) => {
                let _ = monitor.finish();
                return Err(SandboxError::Io(format!("wait failed: {}", e)));
            }
        };
        let killed_reason = monitor.finish();

        Ok(ExecResult {
            exit_code: output.status.code().unwrap_or(KILLED_EXIT_CODE),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            timed_out: killed_reason.is_some(),
            killed_reason,
        })
    }
}

impl Sandbox for ProcSandbox {
    fn run(&self, req: &ExecRequest) -> SandboxResult<ExecResult> {
        ProcSandbox::run(self, req)
    }
}
