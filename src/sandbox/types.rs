/*!
 * Sandbox Types
 * Limit and result contracts for bounded command execution
 */

use crate::capabilities::CapabilityError;
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Sandbox operation result
pub type SandboxResult<T> = Result<T, SandboxError>;

/// Sandbox errors. Resource-limit violations are *not* errors; they surface
/// as data on [`ExecResult`]. These variants cover policy violations and
/// OS-level usage failures only.
#[derive(Error, Debug, Clone, Diagnostic)]
pub enum SandboxError {
    #[error("working directory outside sandbox base: {path}")]
    #[diagnostic(
        code(sandbox::cwd_outside_base),
        help("Commands may only run inside the configured sandbox base directory.")
    )]
    CwdOutsideBase { path: PathBuf },

    #[error("capability '{capability}' denied for subject '{subject}'")]
    #[diagnostic(
        code(sandbox::capability_denied),
        help("The calling subject lacks the required capability grant.")
    )]
    CapabilityDenied { subject: String, capability: String },

    #[error("invalid command: {0}")]
    #[diagnostic(code(sandbox::invalid_command))]
    InvalidCommand(String),

    #[error("spawn failed: {0}")]
    #[diagnostic(
        code(sandbox::spawn_failed),
        help("Check that the executable exists and is runnable from the sandbox.")
    )]
    Spawn(String),

    #[error("I/O error: {0}")]
    #[diagnostic(code(sandbox::io_error))]
    Io(String),
}

impl From<CapabilityError> for SandboxError {
    fn from(err: CapabilityError) -> Self {
        let CapabilityError::Denied {
            subject,
            capability,
        } = err;
        SandboxError::CapabilityDenied {
            subject,
            capability,
        }
    }
}

/// Why a bounded execution was killed by the resource monitor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KilledReason {
    WallTimeExceeded,
    CpuTimeExceeded,
    RssExceeded,
    MonitorError,
}

impl KilledReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            KilledReason::WallTimeExceeded => "wall_time_exceeded",
            KilledReason::CpuTimeExceeded => "cpu_time_exceeded",
            KilledReason::RssExceeded => "rss_exceeded",
            KilledReason::MonitorError => "monitor_error",
        }
    }
}

/// Resource ceilings for one bounded execution. Absent fields are unbounded.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ExecLimits {
    /// Wall-clock ceiling measured from spawn
    pub wall_time: Option<Duration>,
    /// User + system CPU time summed over the whole process tree
    pub cpu_time: Option<Duration>,
    /// Max resident memory over the process tree, in megabytes
    pub max_rss_mb: Option<u64>,
}

impl ExecLimits {
    /// Fully unbounded limits
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn with_wall_time(mut self, limit: Duration) -> Self {
        self.wall_time = Some(limit);
        self
    }

    pub fn with_cpu_time(mut self, limit: Duration) -> Self {
        self.cpu_time = Some(limit);
        self
    }

    pub fn with_max_rss_mb(mut self, mb: u64) -> Self {
        self.max_rss_mb = Some(mb);
        self
    }

    /// True when no ceiling is configured at all
    pub fn is_unbounded(&self) -> bool {
        self.wall_time.is_none() && self.cpu_time.is_none() && self.max_rss_mb.is_none()
    }
}

/// Outcome of one bounded execution attempt; produced exactly once per run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ExecResult {
    /// Child exit code, or [`KILLED_EXIT_CODE`](crate::core::KILLED_EXIT_CODE)
    /// when the OS reports none
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    /// True when the resource monitor killed the process tree
    pub timed_out: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub killed_reason: Option<KilledReason>,
}

impl ExecResult {
    /// True for a clean, unkilled zero exit
    pub fn success(&self) -> bool {
        self.exit_code == 0 && !self.timed_out
    }
}

/// One command to execute under the sandbox, builder-style
#[derive(Debug, Clone)]
pub struct ExecRequest {
    pub cmd: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    pub limits: Option<ExecLimits>,
    pub stdin: Option<Vec<u8>>,
}

impl ExecRequest {
    pub fn new(cmd: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            cmd: cmd.into_iter().map(Into::into).collect(),
            cwd: None,
            env: Vec::new(),
            limits: None,
            stdin: None,
        }
    }

    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn with_env(mut self, env: Vec<(String, String)>) -> Self {
        self.env = env;
        self
    }

    pub fn with_limits(mut self, limits: ExecLimits) -> Self {
        self.limits = Some(limits);
        self
    }

    pub fn with_stdin(mut self, stdin: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(stdin.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::KILLED_EXIT_CODE;

    #[test]
    fn test_limits_default_unbounded() {
        let limits = ExecLimits::default();
        assert!(limits.is_unbounded());
    }

    #[test]
    fn test_limits_builder() {
        let limits = ExecLimits::unbounded()
            .with_wall_time(Duration::from_secs(30))
            .with_cpu_time(Duration::from_secs(5))
            .with_max_rss_mb(256);

        assert_eq!(limits.wall_time, Some(Duration::from_secs(30)));
        assert_eq!(limits.cpu_time, Some(Duration::from_secs(5)));
        assert_eq!(limits.max_rss_mb, Some(256));
        assert!(!limits.is_unbounded());
    }

    #[test]
    fn test_killed_reason_wire_names() {
        assert_eq!(
            serde_json::to_value(KilledReason::WallTimeExceeded).unwrap(),
            "wall_time_exceeded"
        );
        assert_eq!(KilledReason::MonitorError.as_str(), "monitor_error");
    }

    #[test]
    fn test_result_success() {
        let res = ExecResult {
            exit_code: 0,
            stdout: String::new(),
            stderr: String::new(),
            timed_out: false,
            killed_reason: None,
        };
        assert!(res.success());

        let killed = ExecResult {
            exit_code: KILLED_EXIT_CODE,
            stdout: String::new(),
            stderr: String::new(),
            timed_out: true,
            killed_reason: Some(KilledReason::WallTimeExceeded),
        };
        assert!(!killed.success());
    }
}
