/*!
 * Capabilities Contract
 * Gate for privileged operations; the real capability table lives in the
 * platform layer, this module only defines the contract it must satisfy
 */

use log::warn;
use parking_lot::RwLock;
use std::collections::HashSet;
use thiserror::Error;

/// Capability check errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CapabilityError {
    #[error("capability '{capability}' denied for subject '{subject}'")]
    Denied { subject: String, capability: String },
}

/// Capability check result
pub type CapabilityResult = Result<(), CapabilityError>;

/// Contract consumed by the sandbox façade: `require` either passes or
/// returns a denial. Implementations must not block.
pub trait Capabilities: Send + Sync {
    fn require(&self, subject: &str, capability: &str) -> CapabilityResult;
}

/// Simple in-memory capability table keyed by (subject, capability).
///
/// The production table is injected by the platform; this one covers tests
/// and single-process embeddings.
#[derive(Default)]
pub struct StaticCapabilities {
    grants: RwLock<HashSet<(String, String)>>,
}

impl StaticCapabilities {
    pub fn new() -> Self {
        Self::default()
    }

    /// Grant a capability to a subject
    pub fn grant(&self, subject: impl Into<String>, capability: impl Into<String>) {
        self.grants
            .write()
            .insert((subject.into(), capability.into()));
    }

    /// Revoke a previously granted capability
    pub fn revoke(&self, subject: &str, capability: &str) {
        self.grants
            .write()
            .remove(&(subject.to_string(), capability.to_string()));
    }
}

impl Capabilities for StaticCapabilities {
    fn require(&self, subject: &str, capability: &str) -> CapabilityResult {
        let granted = self
            .grants
            .read()
            .contains(&(subject.to_string(), capability.to_string()));
        if granted {
            Ok(())
        } else {
            warn!("subject '{}' denied capability '{}'", subject, capability);
            Err(CapabilityError::Denied {
                subject: subject.to_string(),
                capability: capability.to_string(),
            })
        }
    }
}
