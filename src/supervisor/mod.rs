/*!
 * Supervisor Module
 * Async lifecycle management for long-running commands and in-process
 * tasks, with crash-loop-protected restart
 */

pub mod manager;
pub mod types;

pub use manager::ProcessSupervisor;
pub use types::{
    EntryFuture, EntryPoint, ProcInfo, ProcState, ProcessSpec, ProcessTarget, SupervisorConfig,
    SupervisorError, SupervisorResult,
};
