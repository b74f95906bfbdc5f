//! YAML manifests as handed to `kwaitctl apply -f`.
//!
//! Input is bounded by `KWAIT_MAX_YAML_BYTES` (default 1 MiB) and
//! `KWAIT_MAX_YAML_NODES` (default 100k JSON nodes per document).

use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;
use serde_json::Value as Json;

const DEFAULT_MAX_BYTES: usize = 1_000_000;
const DEFAULT_MAX_NODES: usize = 100_000;

fn env_limit(var: &str, default: usize) -> usize {
    std::env::var(var).ok().and_then(|s| s.parse::<usize>().ok()).unwrap_or(default)
}

/// One object from a manifest, ready for server-side apply.
#[derive(Debug, Clone, PartialEq)]
pub struct Manifest {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    pub namespace: Option<String>,
    pub payload: Json,
}

impl Manifest {
    pub fn group_version(&self) -> (&str, &str) {
        self.api_version.split_once('/').unwrap_or(("", self.api_version.as_str()))
    }

    /// Drop any namespace once the kind is known to be cluster-scoped, so the
    /// body agrees with the cluster-scoped request path.
    pub fn cluster_scoped(mut self) -> Self {
        self.namespace = None;
        if let Some(meta) = self.payload.get_mut("metadata").and_then(Json::as_object_mut) {
            meta.remove("namespace");
        }
        self
    }
}

/// Parse every non-empty document in `yaml`.
///
/// `ns_override` wins over `metadata.namespace` and is written into the
/// payload so the body agrees with the request path. Scope is unknown here;
/// callers strip it again with [`Manifest::cluster_scoped`] where needed.
pub fn parse_manifests(yaml: &str, ns_override: Option<&str>) -> Result<Vec<Manifest>> {
    let max_bytes = env_limit("KWAIT_MAX_YAML_BYTES", DEFAULT_MAX_BYTES);
    if yaml.len() > max_bytes {
        bail!("manifest too large (>{} bytes)", max_bytes);
    }
    let max_nodes = env_limit("KWAIT_MAX_YAML_NODES", DEFAULT_MAX_NODES);
    let mut out = Vec::new();
    for (i, doc) in serde_yaml::Deserializer::from_str(yaml).enumerate() {
        let value = serde_yaml::Value::deserialize(doc).with_context(|| format!("parsing YAML document {}", i + 1))?;
        if value.is_null() {
            continue;
        }
        let json = serde_json::to_value(value).with_context(|| format!("converting document {} to JSON", i + 1))?;
        if exceeds_nodes(&json, max_nodes) {
            bail!("document {} too complex (>{} nodes)", i + 1, max_nodes);
        }
        out.push(manifest_from_json(json, ns_override).with_context(|| format!("document {}", i + 1))?);
    }
    if out.is_empty() {
        bail!("manifest contains no objects");
    }
    Ok(out)
}

fn manifest_from_json(mut json: Json, ns_override: Option<&str>) -> Result<Manifest> {
    let field = |json: &Json, ptr: &str| json.pointer(ptr).and_then(Json::as_str).map(str::to_string);
    let api_version = field(&json, "/apiVersion").ok_or_else(|| anyhow!("missing apiVersion"))?;
    let kind = field(&json, "/kind").ok_or_else(|| anyhow!("missing kind"))?;
    let name = field(&json, "/metadata/name").ok_or_else(|| anyhow!("missing metadata.name"))?;
    let namespace = ns_override.map(str::to_string).or_else(|| field(&json, "/metadata/namespace"));
    if let (Some(ns), Some(meta)) = (ns_override, json.get_mut("metadata").and_then(Json::as_object_mut)) {
        meta.insert("namespace".into(), Json::String(ns.to_string()));
    }
    Ok(Manifest { api_version, kind, name, namespace, payload: json })
}

fn exceeds_nodes(v: &Json, max: usize) -> bool {
    let mut stack = vec![v];
    let mut seen = 0usize;
    while let Some(node) = stack.pop() {
        seen += 1;
        if seen > max {
            return true;
        }
        match node {
            Json::Object(map) => stack.extend(map.values()),
            Json::Array(items) => stack.extend(items.iter()),
            _ => {}
        }
    }
    false
}
