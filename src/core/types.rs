/*!
 * Core Types
 * Common types used across the execution core
 */

use std::fmt;
use uuid::Uuid;

/// OS-level process ID type
pub type Pid = u32;

/// Sentinel exit code reported when the OS provides none (process was killed
/// before it could exit). Distinguishable from legitimate exit codes, which are
/// non-negative on every supported platform.
pub const KILLED_EXIT_CODE: i32 = -9;

/// Opaque identifier for one supervised run.
///
/// Unique for the lifetime of the process and never reused; issued by the
/// supervisor on `start()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle(Uuid);

impl Handle {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}
