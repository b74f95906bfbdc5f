use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// Uniquely addresses one object in a cluster.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceIdentity {
    /// API group; empty for the core group.
    pub group: String,
    pub version: String,
    /// Plural resource name, e.g. `deployments`.
    pub resource: String,
    /// `None` for cluster-scoped resources.
    pub namespace: Option<String>,
    pub name: String,
}

impl ResourceIdentity {
    pub fn new(
        group: impl Into<String>,
        version: impl Into<String>,
        resource: impl Into<String>,
        namespace: Option<&str>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            group: group.into(),
            version: version.into(),
            resource: resource.into(),
            namespace: namespace.filter(|ns| !ns.is_empty()).map(str::to_string),
            name: name.into(),
        }
    }

    /// Build from a resource key (`v1/configmaps`, `apps/v1/deployments`).
    pub fn from_key(key: &str, namespace: Option<&str>, name: impl Into<String>) -> Result<Self, ConfigError> {
        let (group, version, resource) = parse_resource_key(key)?;
        Ok(Self::new(group, version, resource, namespace, name))
    }

    /// Parse a Terraform-style import id: `namespace/name` or `name`.
    pub fn from_import_id(
        group: impl Into<String>,
        version: impl Into<String>,
        resource: impl Into<String>,
        id: &str,
    ) -> Result<Self, ConfigError> {
        let parts: Vec<_> = id.trim().split('/').collect();
        let (ns, name) = match parts.as_slice() {
            [name] if !name.is_empty() => (None, *name),
            [ns, name] if !ns.is_empty() && !name.is_empty() => (Some(*ns), *name),
            _ => return Err(ConfigError::ImportId(id.to_string())),
        };
        Ok(Self::new(group, version, resource, ns, name))
    }

    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }

    pub fn resource_key(&self) -> String {
        format!("{}/{}", self.api_version(), self.resource)
    }

    /// Inverse of [`ResourceIdentity::from_import_id`].
    pub fn import_id(&self) -> String {
        match &self.namespace {
            Some(ns) => format!("{}/{}", ns, self.name),
            None => self.name.clone(),
        }
    }
}

impl fmt::Display for ResourceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.resource_key(), self.import_id())
    }
}

/// Split `version/resource` or `group/version/resource`.
pub fn parse_resource_key(key: &str) -> Result<(String, String, String), ConfigError> {
    let parts: Vec<_> = key.split('/').collect();
    match parts.as_slice() {
        [version, resource] if !version.is_empty() && !resource.is_empty() => {
            Ok((String::new(), (*version).to_string(), (*resource).to_string()))
        }
        [group, version, resource] if !group.is_empty() && !version.is_empty() && !resource.is_empty() => {
            Ok(((*group).to_string(), (*version).to_string(), (*resource).to_string()))
        }
        _ => Err(ConfigError::ResourceKey(key.to_string())),
    }
}
