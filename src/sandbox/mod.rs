/*!
 * Sandbox Module
 * Resource-limited command execution: limit contracts, profile presets,
 * blocking executor, and the capability-gated service façade
 */

pub mod executor;
mod monitor;
pub mod profiles;
pub mod rlimits;
pub mod service;
pub mod types;

pub use executor::ProcSandbox;
pub use profiles::ProfileTable;
pub use rlimits::{KernelLimiter, ResourceLimiter};
pub use service::{EnvPolicy, SandboxRequest, SandboxService, CAP_PROC_RUN};
pub use types::{ExecLimits, ExecRequest, ExecResult, KilledReason, SandboxError, SandboxResult};

/// Contract for a blocking, bounded executor. The service façade consumes
/// this seam so product wiring can substitute instrumented runners.
pub trait Sandbox: Send + Sync {
    fn run(&self, req: &ExecRequest) -> SandboxResult<ExecResult>;
}
