//! kwait apply: the resource lifecycle orchestrator.
//!
//! `upsert` applies once and then confirms each wait condition in order;
//! `tear_down` deletes and optionally waits for the object to disappear.
//! Nothing is retried except the Gets inside a wait, and nothing is rolled
//! back when a wait times out.

#![forbid(unsafe_code)]

use std::time::Instant;

use kwait_core::{
    ApplyOptions, ApplyPayload, DeleteWait, LifecycleConfig, LiveObject, ProviderConfig, ResourceIdentity,
    WaitCondition,
};
use kwait_kubehub::ClusterApi;
use kwait_wait::{wait_for_delete, wait_for_upsert, DeleteState, Expired, UpsertState, WaitError};
use metrics::{counter, histogram};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

mod diff;
mod error;
pub mod manifest;

pub use diff::{diff_summary, prune_server_fields, DiffSummary};
pub use error::{LifecycleError, Phase};

/// Drives apply/delete plus their waits against one [`ClusterApi`].
///
/// Provider defaults are borrowed, never global. The cancellation token is
/// checked before each mutation and throughout every wait.
pub struct Orchestrator<'a, C> {
    cluster: C,
    provider: &'a ProviderConfig,
    cancel: CancellationToken,
}

impl<'a, C: ClusterApi> Orchestrator<'a, C> {
    pub fn new(cluster: C, provider: &'a ProviderConfig) -> Self {
        Self { cluster, provider, cancel: CancellationToken::new() }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Apply `payload`, then wait for every condition in order.
    ///
    /// Each condition gets its own deadline starting when its wait begins.
    /// Returns the live object from the last satisfied condition, or the
    /// apply response when there are none.
    pub async fn upsert(
        &self,
        id: &ResourceIdentity,
        payload: &ApplyPayload,
        opts: &ApplyOptions,
        conditions: &[WaitCondition],
    ) -> Result<LiveObject, LifecycleError> {
        if self.cancel.is_cancelled() {
            return Err(LifecycleError::Cancelled { identity: id.clone(), after_mutation: false });
        }
        let t0 = Instant::now();
        let applied = self.cluster.apply(id, payload, opts).await;
        histogram!("kwait_apply_latency_ms", t0.elapsed().as_secs_f64() * 1000.0);
        let mut live = match applied {
            Ok(live) => {
                counter!("kwait_apply_total", 1u64, "outcome" => "ok");
                live
            }
            Err(source) => {
                counter!("kwait_apply_total", 1u64, "outcome" => "error");
                warn!(target_object = %id, kind = %source.kind(), error = %source, "apply failed");
                return Err(LifecycleError::Apply { identity: id.clone(), source });
            }
        };
        info!(
            target_object = %id,
            field_manager = %opts.field_manager,
            force = opts.force_conflicts,
            rv = live.pointer("/metadata/resourceVersion").and_then(|v| v.as_str()).unwrap_or(""),
            conditions = conditions.len(),
            "applied"
        );

        for cond in conditions {
            match wait_for_upsert(&self.cluster, id, cond, &self.cancel).await {
                Ok(UpsertState::Satisfied(obj)) => live = obj,
                Ok(UpsertState::TimedOut(expired)) => {
                    return Err(timed_out(id, Phase::Upsert, cond.to_string(), cond.timeout, expired));
                }
                Err(e) => return Err(wait_failed(id, Phase::Upsert, e)),
            }
        }
        Ok(live)
    }

    /// [`Orchestrator::upsert`] with options and conditions taken from a resource's configuration.
    pub async fn upsert_with(
        &self,
        id: &ResourceIdentity,
        payload: &ApplyPayload,
        cfg: &LifecycleConfig,
    ) -> Result<LiveObject, LifecycleError> {
        let opts = cfg.apply_options(self.provider);
        let conditions = cfg.upsert_conditions()?;
        self.upsert(id, payload, &opts, &conditions).await
    }

    /// Delete `id`; an already absent object counts as deleted. With `wait`,
    /// poll until Get reports NotFound.
    pub async fn tear_down(&self, id: &ResourceIdentity, wait: Option<&DeleteWait>) -> Result<(), LifecycleError> {
        if self.cancel.is_cancelled() {
            return Err(LifecycleError::Cancelled { identity: id.clone(), after_mutation: false });
        }
        match self.cluster.delete(id).await {
            Ok(()) => {
                counter!("kwait_delete_total", 1u64, "outcome" => "ok");
            }
            Err(source) if source.is_not_found() => {
                counter!("kwait_delete_total", 1u64, "outcome" => "absent");
            }
            Err(source) => {
                counter!("kwait_delete_total", 1u64, "outcome" => "error");
                warn!(target_object = %id, kind = %source.kind(), error = %source, "delete failed");
                return Err(LifecycleError::Delete { identity: id.clone(), source });
            }
        }
        info!(target_object = %id, wait = wait.is_some(), "delete requested");

        let Some(wait) = wait else {
            return Ok(());
        };
        match wait_for_delete(&self.cluster, id, wait, &self.cancel).await {
            Ok(DeleteState::Gone) => Ok(()),
            Ok(DeleteState::TimedOut(expired)) => {
                Err(timed_out(id, Phase::Delete, "deleted".to_string(), wait.timeout, expired))
            }
            Err(e) => Err(wait_failed(id, Phase::Delete, e)),
        }
    }

    /// [`Orchestrator::tear_down`] with the delete wait taken from a resource's configuration.
    pub async fn tear_down_with(&self, id: &ResourceIdentity, cfg: &LifecycleConfig) -> Result<(), LifecycleError> {
        let wait = cfg.delete_wait()?;
        self.tear_down(id, wait.as_ref()).await
    }

    /// Fetch the live object. Absence is an error here, unlike during waits.
    pub async fn read(&self, id: &ResourceIdentity) -> Result<LiveObject, LifecycleError> {
        self.cluster.get(id).await.map_err(|source| LifecycleError::Read { identity: id.clone(), source })
    }

    /// Resolve an import id (`namespace/name` or `name`) and read the object.
    pub async fn import(
        &self,
        group: &str,
        version: &str,
        resource: &str,
        import_id: &str,
    ) -> Result<(ResourceIdentity, LiveObject), LifecycleError> {
        let id = ResourceIdentity::from_import_id(group, version, resource, import_id)?;
        let live = self.read(&id).await?;
        info!(target_object = %id, "imported");
        Ok((id, live))
    }
}

fn timed_out(
    id: &ResourceIdentity,
    phase: Phase,
    condition: String,
    budget: kwait_core::Timeout,
    expired: Expired,
) -> LifecycleError {
    LifecycleError::WaitTimeout {
        identity: id.clone(),
        phase,
        condition,
        budget,
        elapsed: expired.elapsed,
        polls: expired.polls,
        last_error: expired.last_error,
    }
}

fn wait_failed(id: &ResourceIdentity, phase: Phase, err: WaitError) -> LifecycleError {
    match err {
        WaitError::Cancelled => LifecycleError::Cancelled { identity: id.clone(), after_mutation: true },
        WaitError::Cluster(source) => LifecycleError::Wait { identity: id.clone(), phase, source },
    }
}
