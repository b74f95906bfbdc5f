use std::time::Instant;

use async_trait::async_trait;
use kube::{
    api::{Api, DeleteParams, Patch, PatchParams, ValidationDirective},
    core::{ApiResource, DynamicObject, GroupVersionKind},
    Client,
};
use kwait_core::{ApplyOptions, ApplyPayload, ClusterError, FieldValidation, LiveObject, ResourceIdentity};
use metrics::{counter, histogram};
use tracing::debug;

use crate::{status::from_kube, ClusterApi};

/// [`ClusterApi`] over a kube client. Cheap to clone; holds no per-object state.
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Use the shared process-wide client.
    pub async fn try_default() -> anyhow::Result<Self> {
        Ok(Self::new(crate::get_kube_client().await?))
    }

    /// The URL only depends on group/version/plural, so no discovery round trip is needed.
    fn api(&self, id: &ResourceIdentity) -> Api<DynamicObject> {
        let gvk = GroupVersionKind::gvk(&id.group, &id.version, "");
        let ar = ApiResource::from_gvk_with_plural(&gvk, &id.resource);
        match id.namespace.as_deref() {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, &ar),
            None => Api::all_with(self.client.clone(), &ar),
        }
    }
}

fn patch_params(opts: &ApplyOptions) -> PatchParams {
    let mut pp = PatchParams::apply(&opts.field_manager);
    if opts.force_conflicts {
        pp = pp.force();
    }
    let directive = match opts.field_validation {
        FieldValidation::Strict => ValidationDirective::Strict,
        FieldValidation::Warn => ValidationDirective::Warn,
        FieldValidation::Ignore => ValidationDirective::Ignore,
    };
    pp.validation(directive)
}

fn to_live(obj: DynamicObject) -> Result<LiveObject, ClusterError> {
    serde_json::to_value(obj).map_err(|e| ClusterError::Fatal(format!("serializing live object: {}", e)))
}

#[async_trait]
impl ClusterApi for KubeCluster {
    async fn get(&self, id: &ResourceIdentity) -> Result<LiveObject, ClusterError> {
        let obj = self.api(id).get(&id.name).await.map_err(from_kube)?;
        to_live(obj)
    }

    async fn apply(
        &self,
        id: &ResourceIdentity,
        payload: &ApplyPayload,
        opts: &ApplyOptions,
    ) -> Result<LiveObject, ClusterError> {
        let t0 = Instant::now();
        let pp = patch_params(opts);
        let res = self.api(id).patch(&id.name, &pp, &Patch::Apply(payload)).await;
        histogram!("kwait_kube_apply_ms", t0.elapsed().as_secs_f64() * 1000.0);
        match res {
            Ok(obj) => {
                debug!(target_object = %id, rv = ?obj.metadata.resource_version, "server-side apply ok");
                to_live(obj)
            }
            Err(e) => {
                counter!("kwait_kube_apply_err", 1u64);
                Err(from_kube(e))
            }
        }
    }

    async fn delete(&self, id: &ResourceIdentity) -> Result<(), ClusterError> {
        match self.api(id).delete(&id.name, &DeleteParams::default()).await.map_err(from_kube) {
            Ok(_) => Ok(()),
            Err(ClusterError::NotFound(_)) => {
                debug!(target_object = %id, "delete: already gone");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patch_params_carry_manager_force_and_validation() {
        let opts = ApplyOptions::new("tf").force(true);
        let pp = patch_params(&opts);
        assert_eq!(pp.field_manager.as_deref(), Some("tf"));
        assert!(pp.force);
        assert!(matches!(pp.field_validation, Some(ValidationDirective::Strict)));

        let mut opts = ApplyOptions::new("tf");
        opts.field_validation = FieldValidation::Ignore;
        let pp = patch_params(&opts);
        assert!(!pp.force);
        assert!(matches!(pp.field_validation, Some(ValidationDirective::Ignore)));
    }
}
