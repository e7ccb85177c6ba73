/*!
 * Supervisor Types
 * Specs, states, and restart policy for supervised long-running work
 */

use crate::core::Handle;
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Supervisor operation result
pub type SupervisorResult<T> = Result<T, SupervisorError>;

/// Supervisor errors. Only structural spec problems are raised from
/// `start()`; launch failures surface asynchronously via events and state.
#[derive(Error, Debug, Clone, Diagnostic)]
pub enum SupervisorError {
    #[error("invalid process spec: {0}")]
    #[diagnostic(
        code(supervisor::invalid_spec),
        help("A spec needs a non-empty name and a non-empty command or a task entrypoint.")
    )]
    InvalidSpec(String),
}

/// Supervised run state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcState {
    Init,
    Starting,
    Running,
    Stopping,
    Stopped,
    Error,
}

impl ProcState {
    /// Terminal states are inert: no further transitions for this run
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProcState::Stopped | ProcState::Error)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProcState::Init => "init",
            ProcState::Starting => "starting",
            ProcState::Running => "running",
            ProcState::Stopping => "stopping",
            ProcState::Stopped => "stopped",
            ProcState::Error => "error",
        }
    }
}

/// Boxed future produced by an in-process entrypoint
pub type EntryFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;

/// Zero-argument async entrypoint; invoked once per run attempt
pub type EntryPoint = Arc<dyn Fn() -> EntryFuture + Send + Sync>;

/// What a supervised handle runs: exactly one of an external command or an
/// in-process task. The tagged union makes "both"/"neither" unrepresentable.
#[derive(Clone)]
pub enum ProcessTarget {
    /// External command, argv form
    Command(Vec<String>),
    /// In-process async task
    Task(EntryPoint),
}

impl fmt::Debug for ProcessTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessTarget::Command(argv) => f.debug_tuple("Command").field(argv).finish(),
            ProcessTarget::Task(_) => f.debug_tuple("Task").field(&"<entrypoint>").finish(),
        }
    }
}

/// Declarative description of one unit of supervised work
#[derive(Debug, Clone)]
pub struct ProcessSpec {
    pub name: String,
    pub target: ProcessTarget,
    /// Environment for external commands; commands see nothing else
    pub env: Vec<(String, String)>,
    /// Capability names this unit was granted; carried for the skill
    /// runtime, not interpreted here
    pub capabilities: HashSet<String>,
}

impl ProcessSpec {
    /// Spec for an external command
    pub fn command(
        name: impl Into<String>,
        argv: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            name: name.into(),
            target: ProcessTarget::Command(argv.into_iter().map(Into::into).collect()),
            env: Vec::new(),
            capabilities: HashSet::new(),
        }
    }

    /// Spec for an in-process async task
    pub fn task<F, Fut>(name: impl Into<String>, entry: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self {
            name: name.into(),
            target: ProcessTarget::Task(Arc::new(move || Box::pin(entry()) as EntryFuture)),
            env: Vec::new(),
            capabilities: HashSet::new(),
        }
    }

    pub fn with_env(mut self, env: Vec<(String, String)>) -> Self {
        self.env = env;
        self
    }

    pub fn with_capabilities(mut self, caps: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.capabilities = caps.into_iter().map(Into::into).collect();
        self
    }

    /// Structural validation; runs synchronously in `start()`
    pub(crate) fn validate(&self) -> SupervisorResult<()> {
        if self.name.trim().is_empty() {
            return Err(SupervisorError::InvalidSpec("empty name".to_string()));
        }
        if let ProcessTarget::Command(argv) = &self.target {
            if argv.is_empty() || argv[0].trim().is_empty() {
                return Err(SupervisorError::InvalidSpec(format!(
                    "'{}': empty command argv",
                    self.name
                )));
            }
        }
        Ok(())
    }
}

/// Restart and backoff policy for all handles of one supervisor
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Restart crashed runs automatically
    pub restart_on_crash: bool,
    /// Consecutive crashes tolerated before terminal `Error`
    pub max_restarts: u32,
    /// First backoff delay; doubles per consecutive crash
    pub backoff_base: Duration,
    /// Backoff ceiling
    pub backoff_max: Duration,
    /// Runs alive longer than this reset the crash counter
    pub crash_window: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            restart_on_crash: true,
            max_restarts: 3,
            backoff_base: Duration::from_millis(500),
            backoff_max: Duration::from_secs(5),
            crash_window: Duration::from_secs(10),
        }
    }
}

impl SupervisorConfig {
    pub fn with_restart_on_crash(mut self, restart: bool) -> Self {
        self.restart_on_crash = restart;
        self
    }

    pub fn with_max_restarts(mut self, max: u32) -> Self {
        self.max_restarts = max;
        self
    }

    pub fn with_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.backoff_base = base;
        self.backoff_max = max;
        self
    }

    pub fn with_crash_window(mut self, window: Duration) -> Self {
        self.crash_window = window;
        self
    }

    /// Delay before restart `attempt` (1-based): base * 2^(attempt-1),
    /// capped at `backoff_max`
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.backoff_base.saturating_mul(factor).min(self.backoff_max)
    }
}

/// Public snapshot of one supervised handle
#[derive(Debug, Clone)]
pub struct ProcInfo {
    pub handle: Handle,
    pub name: String,
    pub state: ProcState,
    pub restarts: u32,
}
