use anyhow::{Context, Result};
use caps::CapsHashSet;

pub(crate) use caps::{CapSet, Capability};

/// Represents the current state of process capabilities
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilitySnapshot {
    pub effective: CapsHashSet,
    pub permitted: CapsHashSet,
    pub inheritable: CapsHashSet,
    pub bounding: CapsHashSet,
    pub ambient: CapsHashSet,
}

impl CapabilitySnapshot {
    /// Get the current snapshot of all capability sets
    pub fn current() -> Result<Self> {
        Ok(Self {
            effective: read_capability_set(CapSet::Effective)?,
            permitted: read_capability_set(CapSet::Permitted)?,
            inheritable: read_capability_set(CapSet::Inheritable)?,
            bounding: read_capability_set(CapSet::Bounding)?,
            ambient: read_capability_set(CapSet::Ambient)?,
        })
    }

    #[inline]
    pub fn has_effective(&self, capability: Capability) -> bool {
        self.effective.contains(&capability)
    }
}

impl std::fmt::Display for CapabilitySnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Capabilities - ")?;
        write!(f, "Effective: {}, ", self.effective.len())?;
        write!(f, "Permitted: {}, ", self.permitted.len())?;
        write!(f, "Inheritable: {}, ", self.inheritable.len())?;
        write!(f, "Bounding: {}, ", self.bounding.len())?;
        write!(f, "Ambient: {}", self.ambient.len())
    }
}

fn read_capability_set(cap_set: CapSet) -> Result<CapsHashSet> {
    caps::read(None, cap_set).context(format!("Failed to read {:?} capability set", cap_set))
}

/// Returns `true` if the process may perform mounts in its namespace.
pub(crate) fn can_mount() -> Result<bool> {
    Ok(CapabilitySnapshot::current()?.has_effective(Capability::CAP_SYS_ADMIN))
}

#[macro_export]
macro_rules! log_capability_snapshot {
    ($label:expr) => {{
        use $crate::capabilities::CapabilitySnapshot;
        match CapabilitySnapshot::current() {
            Ok(snapshot) => tracing::debug!("{}: {}", $label, snapshot),
            Err(error) => tracing::debug!("{}: {:#}", $label, error),
        }
    }};
    () => {{
        $crate::log_capability_snapshot!("Capability snapshot")
    }};
}
