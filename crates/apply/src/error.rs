use std::time::Duration;

use kwait_core::{ClusterError, ConfigError, ErrorKind, ResourceIdentity, Timeout};

/// Which mutation a wait was confirming.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Upsert,
    Delete,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Phase::Upsert => "apply",
            Phase::Delete => "delete",
        })
    }
}

/// Failure of a lifecycle operation.
///
/// `Apply`, `Delete` and `Read` leave the cluster untouched. The wait
/// variants (and `Cancelled` with `after_mutation`) mean the mutation went
/// through and only its confirmation is missing; see [`LifecycleError::state_changed`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LifecycleError {
    #[error("apply {identity}: {source}")]
    Apply { identity: ResourceIdentity, source: ClusterError },
    #[error("delete {identity}: {source}")]
    Delete { identity: ResourceIdentity, source: ClusterError },
    #[error("read {identity}: {source}")]
    Read { identity: ResourceIdentity, source: ClusterError },
    #[error("{phase} of {identity} succeeded but `{condition}` did not hold within {budget} ({polls} polls over {elapsed:?})")]
    WaitTimeout {
        identity: ResourceIdentity,
        phase: Phase,
        condition: String,
        budget: Timeout,
        elapsed: Duration,
        polls: u32,
        last_error: Option<ClusterError>,
    },
    #[error("{phase} of {identity} succeeded but waiting failed: {source}")]
    Wait { identity: ResourceIdentity, phase: Phase, source: ClusterError },
    #[error("{identity}: cancelled{}", if *after_mutation { " after the object was changed" } else { "" })]
    Cancelled { identity: ResourceIdentity, after_mutation: bool },
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl LifecycleError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LifecycleError::Apply { source, .. }
            | LifecycleError::Delete { source, .. }
            | LifecycleError::Read { source, .. }
            | LifecycleError::Wait { source, .. } => source.kind(),
            LifecycleError::WaitTimeout { .. } => ErrorKind::WaitTimeout,
            LifecycleError::Cancelled { .. } => ErrorKind::Cancelled,
            LifecycleError::Config(_) => ErrorKind::Fatal,
        }
    }

    /// True when the cluster was mutated before the failure.
    pub fn state_changed(&self) -> bool {
        match self {
            LifecycleError::WaitTimeout { .. } | LifecycleError::Wait { .. } => true,
            LifecycleError::Cancelled { after_mutation, .. } => *after_mutation,
            _ => false,
        }
    }

    pub fn identity(&self) -> Option<&ResourceIdentity> {
        match self {
            LifecycleError::Apply { identity, .. }
            | LifecycleError::Delete { identity, .. }
            | LifecycleError::Read { identity, .. }
            | LifecycleError::WaitTimeout { identity, .. }
            | LifecycleError::Wait { identity, .. }
            | LifecycleError::Cancelled { identity, .. } => Some(identity),
            LifecycleError::Config(_) => None,
        }
    }
}
