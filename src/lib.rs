/*!
 * AdaOS Execution Library
 * Process execution and supervision core: resource-limited blocking
 * command execution plus async supervision of long-running work
 */

pub mod capabilities;
pub mod core;
pub mod events;
pub mod sandbox;
pub mod supervisor;

// Re-exports
pub use capabilities::{Capabilities, CapabilityError, StaticCapabilities};
pub use core::{Handle, Pid, KILLED_EXIT_CODE};
pub use events::{EventBus, MemoryBus, NoopBus};
pub use sandbox::{
    ExecLimits, ExecRequest, ExecResult, KilledReason, ProcSandbox, ProfileTable, Sandbox,
    SandboxError, SandboxRequest, SandboxService,
};
pub use supervisor::{ProcInfo, ProcState, ProcessSpec, ProcessSupervisor, SupervisorConfig};
