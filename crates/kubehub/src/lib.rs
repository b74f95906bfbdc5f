//! kwait kubehub: the cluster adapter behind every lifecycle operation.
//!
//! [`ClusterApi`] is the seam: the orchestrator and wait engine only ever talk
//! to it. [`KubeCluster`] is the production implementation; with the `fake`
//! feature, [`fake::FakeCluster`] provides an in-memory stand-in.

#![forbid(unsafe_code)]

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use kube::{
    core::{ApiResource, GroupVersionKind},
    discovery::{Discovery, Scope},
    Client,
};
use kwait_core::{parse_resource_key, ApplyOptions, ApplyPayload, ClusterError, LiveObject, ResourceIdentity};
use tokio::sync::OnceCell;

mod kube_api;
mod status;

#[cfg(feature = "fake")]
pub mod fake;

pub use kube_api::KubeCluster;
pub use status::{classify_status, parse_conflict};

/// Generic get / server-side apply / delete against one object.
///
/// Implementations must be safe to share across tasks operating on distinct
/// identities.
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Fetch the live object. Absence is [`ClusterError::NotFound`].
    async fn get(&self, id: &ResourceIdentity) -> Result<LiveObject, ClusterError>;

    /// Server-side apply `payload` and return the resulting live object.
    async fn apply(
        &self,
        id: &ResourceIdentity,
        payload: &ApplyPayload,
        opts: &ApplyOptions,
    ) -> Result<LiveObject, ClusterError>;

    /// Delete the object. Deleting an absent object succeeds.
    async fn delete(&self, id: &ResourceIdentity) -> Result<(), ClusterError>;
}

#[async_trait]
impl<T: ClusterApi + ?Sized> ClusterApi for Arc<T> {
    async fn get(&self, id: &ResourceIdentity) -> Result<LiveObject, ClusterError> {
        (**self).get(id).await
    }

    async fn apply(
        &self,
        id: &ResourceIdentity,
        payload: &ApplyPayload,
        opts: &ApplyOptions,
    ) -> Result<LiveObject, ClusterError> {
        (**self).apply(id, payload, opts).await
    }

    async fn delete(&self, id: &ResourceIdentity) -> Result<(), ClusterError> {
        (**self).delete(id).await
    }
}

static CLIENT: OnceCell<Client> = OnceCell::const_new();

/// Process-wide client built from the ambient kubeconfig / in-cluster env.
pub async fn get_kube_client() -> Result<Client> {
    let client = CLIENT
        .get_or_try_init(|| async { Client::try_default().await.context("building kube client") })
        .await?;
    Ok(client.clone())
}

/// A served kind as found through discovery.
#[derive(Debug, Clone)]
pub struct ResolvedKind {
    pub resource: ApiResource,
    pub namespaced: bool,
}

/// Run API discovery once; resolve any number of kinds against the result.
pub async fn discover(client: Client) -> Result<Discovery> {
    Discovery::new(client).run().await.context("running API discovery")
}

fn find(discovery: &Discovery, pred: impl Fn(&ApiResource) -> bool) -> Option<ResolvedKind> {
    for group in discovery.groups() {
        for (ar, caps) in group.recommended_resources() {
            if pred(&ar) {
                let namespaced = matches!(caps.scope, Scope::Namespaced);
                return Some(ResolvedKind { resource: ar, namespaced });
            }
        }
    }
    None
}

/// Resolve `apiVersion` + `kind` (as found in a manifest) to its plural and scope.
pub fn resolve_kind(discovery: &Discovery, api_version: &str, kind: &str) -> Result<ResolvedKind> {
    let (group, version) = api_version.split_once('/').unwrap_or(("", api_version));
    let gvk = GroupVersionKind::gvk(group, version, kind);
    find(discovery, |ar| ar.group == gvk.group && ar.version == gvk.version && ar.kind == gvk.kind)
        .ok_or_else(|| anyhow!("kind not served by the cluster: {}/{}", api_version, kind))
}

/// Resolve a resource key (`v1/configmaps`, `apps/v1/deployments`) to its kind and scope.
pub fn resolve_resource(discovery: &Discovery, key: &str) -> Result<ResolvedKind> {
    let (group, version, plural) = parse_resource_key(key)?;
    find(discovery, |ar| ar.group == group && ar.version == version && ar.plural == plural)
        .ok_or_else(|| anyhow!("resource not served by the cluster: {}", key))
}

/// Identity for a resolved kind. Namespaced kinds require a namespace.
pub fn identity_for(resolved: &ResolvedKind, namespace: Option<&str>, name: &str) -> Result<ResourceIdentity> {
    let ar = &resolved.resource;
    let ns = if resolved.namespaced {
        Some(namespace.ok_or_else(|| anyhow!("namespace required for namespaced kind {}", ar.kind))?)
    } else {
        None
    };
    Ok(ResourceIdentity::new(ar.group.clone(), ar.version.clone(), ar.plural.clone(), ns, name))
}
