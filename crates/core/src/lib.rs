//! kwait core types shared by the adapter, the wait engine and the orchestrator.

#![forbid(unsafe_code)]

mod condition;
pub mod config;
mod error;
mod identity;
mod timing;

pub use condition::{ApplyOptions, DeleteWait, FieldValidation, WaitCondition};
pub use config::{LifecycleConfig, ProviderConfig, WaitForDelete, WaitForUpsert};
pub use error::{ClusterError, ConfigError, Conflict, ErrorKind};
pub use identity::{parse_resource_key, ResourceIdentity};
pub use timing::{parse_poll_interval, Timeout, DEFAULT_POLL_INTERVAL, DEFAULT_TIMEOUT, ONE_WEEK};

/// Desired object state handed to server-side apply. Never interpreted here.
pub type ApplyPayload = serde_json::Value;

/// Object state as returned by the API server.
pub type LiveObject = serde_json::Value;

pub mod prelude {
    pub use super::{
        ApplyOptions, ApplyPayload, ClusterError, DeleteWait, ErrorKind, LiveObject, ResourceIdentity, Timeout,
        WaitCondition,
    };
}
