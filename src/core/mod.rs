/*!
 * Core Module
 * Shared primitive types used across the execution core
 */

pub mod types;

pub use types::{Handle, Pid, KILLED_EXIT_CODE};
