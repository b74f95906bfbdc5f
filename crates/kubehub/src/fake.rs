//! In-memory cluster with enough server-side-apply behaviour to exercise the
//! lifecycle code without an API server.
//!
//! Ownership is tracked per leaf field and field manager. Applying the same
//! payload twice with the same manager is a no-op (no resourceVersion bump);
//! applying a different value to a field owned by another manager is a
//! conflict unless forced. Tests can script Get behaviour per object
//! ([`FakeCluster::on_get`]), keep deleted objects visible for a number of
//! Gets ([`FakeCluster::linger_after_delete`]) and inject failures
//! ([`FakeCluster::fail_next`]).

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use kwait_core::{ApplyOptions, ApplyPayload, ClusterError, Conflict, LiveObject, ResourceIdentity};
use serde_json::{Map, Value as Json};

use crate::ClusterApi;

type Key = (String, Option<String>, String);
type Path = Vec<String>;
type GetHook = Box<dyn FnMut(usize, &mut Json) + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    Get,
    Apply,
    Delete,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub get: usize,
    pub apply: usize,
    pub delete: usize,
}

struct Stored {
    object: Json,
    owners: BTreeMap<Path, String>,
}

#[derive(Default)]
struct State {
    objects: BTreeMap<Key, Stored>,
    hooks: HashMap<Key, GetHook>,
    gets: HashMap<Key, usize>,
    linger_on_delete: HashMap<Key, usize>,
    lingering: HashMap<Key, (Json, usize)>,
    failures: HashMap<Verb, VecDeque<ClusterError>>,
    calls: CallCounts,
    next_uid: u64,
    next_rv: u64,
}

#[derive(Default)]
pub struct FakeCluster {
    state: Mutex<State>,
}

fn key(id: &ResourceIdentity) -> Key {
    (id.resource_key(), id.namespace.clone(), id.name.clone())
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Store `object` as if `manager` had applied it.
    pub fn seed(&self, id: &ResourceIdentity, object: Json, manager: &str) {
        let mut st = self.lock();
        let owners = leaves(&object).into_keys().map(|p| (p, manager.to_string())).collect();
        let object = st.materialize(id, object);
        st.objects.insert(key(id), Stored { object, owners });
    }

    /// Run `hook(n, live)` on every Get of `id`, `n` being the 1-based Get count for that object.
    pub fn on_get(&self, id: &ResourceIdentity, hook: impl FnMut(usize, &mut Json) + Send + 'static) {
        self.lock().hooks.insert(key(id), Box::new(hook));
    }

    /// After `id` is deleted, keep returning it for the next `gets` Gets.
    pub fn linger_after_delete(&self, id: &ResourceIdentity, gets: usize) {
        self.lock().linger_on_delete.insert(key(id), gets);
    }

    /// Fail the next call of `verb` with `err`. Queued failures are consumed in order.
    pub fn fail_next(&self, verb: Verb, err: ClusterError) {
        self.lock().failures.entry(verb).or_default().push_back(err);
    }

    /// Edit a stored object in place, e.g. to simulate a controller writing status.
    pub fn mutate(&self, id: &ResourceIdentity, f: impl FnOnce(&mut Json)) -> bool {
        match self.lock().objects.get_mut(&key(id)) {
            Some(stored) => {
                f(&mut stored.object);
                true
            }
            None => false,
        }
    }

    pub fn object(&self, id: &ResourceIdentity) -> Option<Json> {
        self.lock().objects.get(&key(id)).map(|s| s.object.clone())
    }

    pub fn calls(&self) -> CallCounts {
        self.lock().calls
    }

    pub fn gets_of(&self, id: &ResourceIdentity) -> usize {
        self.lock().gets.get(&key(id)).copied().unwrap_or(0)
    }

    /// Manager owning the field at `path` (dot separated), if any.
    pub fn owner_of(&self, id: &ResourceIdentity, path: &str) -> Option<String> {
        let p: Path = path.split('.').map(str::to_string).collect();
        self.lock().objects.get(&key(id)).and_then(|s| s.owners.get(&p).cloned())
    }
}

impl State {
    fn take_failure(&mut self, verb: Verb) -> Option<ClusterError> {
        self.failures.get_mut(&verb).and_then(VecDeque::pop_front)
    }

    fn bump_rv(&mut self) -> String {
        self.next_rv += 1;
        self.next_rv.to_string()
    }

    /// Fill server-owned metadata for a newly created object.
    fn materialize(&mut self, id: &ResourceIdentity, mut object: Json) -> Json {
        if !object.is_object() {
            object = Json::Object(Map::new());
        }
        self.next_uid += 1;
        let rv = self.bump_rv();
        if !object["metadata"].is_object() {
            object["metadata"] = Json::Object(Map::new());
        }
        let Some(meta) = object["metadata"].as_object_mut() else {
            return object;
        };
        meta.insert("name".into(), Json::String(id.name.clone()));
        match &id.namespace {
            Some(ns) => meta.insert("namespace".into(), Json::String(ns.clone())),
            None => meta.remove("namespace"),
        };
        meta.insert("uid".into(), Json::String(format!("00000000-0000-0000-0000-{:012}", self.next_uid)));
        meta.insert("resourceVersion".into(), Json::String(rv));
        meta.insert("generation".into(), Json::from(1));
        object
    }

    fn apply(&mut self, id: &ResourceIdentity, payload: &Json, opts: &ApplyOptions) -> Result<Json, ClusterError> {
        if !payload.is_object() {
            return Err(ClusterError::Fatal("apply payload must be a JSON object".into()));
        }
        if let Some(name) = payload.pointer("/metadata/name").and_then(Json::as_str) {
            if name != id.name {
                return Err(ClusterError::Fatal(format!(
                    "the name of the object ({}) does not match the name on the URL ({})",
                    name, id.name
                )));
            }
        }
        if let Some(ns) = payload.pointer("/metadata/namespace").and_then(Json::as_str) {
            if Some(ns) != id.namespace.as_deref() {
                return Err(ClusterError::Fatal(format!("namespace {} does not match the request namespace", ns)));
            }
        }

        let manager = opts.field_manager.as_str();
        let desired = leaves(payload);
        let k = key(id);

        let Some(stored) = self.objects.get(&k) else {
            let object = self.materialize(id, payload.clone());
            let owners = desired.into_keys().map(|p| (p, manager.to_string())).collect();
            self.objects.insert(k, Stored { object: object.clone(), owners });
            return Ok(object);
        };

        let mut contested: Vec<(String, String)> = Vec::new();
        for (path, value) in desired.iter() {
            if let Some(owner) = stored.owners.get(path) {
                if owner != manager && get_path(&stored.object, path) != Some(value) {
                    contested.push((format!(".{}", path.join(".")), owner.clone()));
                }
            }
        }
        if !contested.is_empty() && !opts.force_conflicts {
            let mut managers: Vec<String> = Vec::new();
            for (_, owner) in contested.iter() {
                if !managers.contains(owner) {
                    managers.push(owner.clone());
                }
            }
            let fields: Vec<String> = contested.into_iter().map(|(f, _)| f).collect();
            let message = format!("Apply failed with {} conflict(s): {}", fields.len(), fields.join(", "));
            return Err(ClusterError::Conflict(Conflict { managers, fields, message }));
        }

        let mut next = stored.object.clone();
        let mut owners = stored.owners.clone();
        let stale: Vec<Path> =
            owners.iter().filter(|(p, m)| m.as_str() == manager && !desired.contains_key(*p)).map(|(p, _)| p.clone()).collect();
        for p in stale {
            remove_path(&mut next, &p);
            owners.remove(&p);
        }
        for (path, value) in desired {
            set_path(&mut next, &path, value);
            owners.insert(path, manager.to_string());
        }

        let changed = next != stored.object;
        let spec_changed = without_server_fields(&next) != without_server_fields(&stored.object);
        let generation = stored.object.pointer("/metadata/generation").and_then(Json::as_i64).unwrap_or(1);
        if changed {
            let rv = self.bump_rv();
            next["metadata"]["resourceVersion"] = Json::String(rv);
            if spec_changed {
                next["metadata"]["generation"] = Json::from(generation + 1);
            }
        }
        self.objects.insert(k, Stored { object: next.clone(), owners });
        Ok(next)
    }
}

#[async_trait]
impl ClusterApi for FakeCluster {
    async fn get(&self, id: &ResourceIdentity) -> Result<LiveObject, ClusterError> {
        let mut guard = self.lock();
        let st = &mut *guard;
        st.calls.get += 1;
        let k = key(id);
        let n = {
            let count = st.gets.entry(k.clone()).or_default();
            *count += 1;
            *count
        };
        if let Some(err) = st.take_failure(Verb::Get) {
            return Err(err);
        }
        if let Some(stored) = st.objects.get_mut(&k) {
            if let Some(hook) = st.hooks.get_mut(&k) {
                hook(n, &mut stored.object);
            }
            return Ok(stored.object.clone());
        }
        if let Some((ghost, remaining)) = st.lingering.get_mut(&k) {
            if *remaining > 0 {
                *remaining -= 1;
                return Ok(ghost.clone());
            }
        }
        Err(ClusterError::NotFound(format!("{} not found", id)))
    }

    async fn apply(
        &self,
        id: &ResourceIdentity,
        payload: &ApplyPayload,
        opts: &ApplyOptions,
    ) -> Result<LiveObject, ClusterError> {
        let mut st = self.lock();
        st.calls.apply += 1;
        if let Some(err) = st.take_failure(Verb::Apply) {
            return Err(err);
        }
        st.apply(id, payload, opts)
    }

    async fn delete(&self, id: &ResourceIdentity) -> Result<(), ClusterError> {
        let mut st = self.lock();
        st.calls.delete += 1;
        if let Some(err) = st.take_failure(Verb::Delete) {
            return Err(err);
        }
        let k = key(id);
        if let Some(stored) = st.objects.remove(&k) {
            if let Some(gets) = st.linger_on_delete.remove(&k) {
                let mut ghost = stored.object;
                ghost["metadata"]["deletionTimestamp"] = Json::String("1970-01-01T00:00:00Z".into());
                st.lingering.insert(k, (ghost, gets));
            }
        }
        Ok(())
    }
}

/// Leaf fields of an applied document. Arrays are atomic; identity fields are excluded.
fn leaves(doc: &Json) -> BTreeMap<Path, Json> {
    fn walk(v: &Json, prefix: &mut Path, out: &mut BTreeMap<Path, Json>) {
        match v {
            Json::Object(map) if !map.is_empty() => {
                for (k, child) in map.iter() {
                    prefix.push(k.clone());
                    walk(child, prefix, out);
                    prefix.pop();
                }
            }
            other => {
                out.insert(prefix.clone(), other.clone());
            }
        }
    }
    let mut out = BTreeMap::new();
    walk(doc, &mut Vec::new(), &mut out);
    let identity: [&[&str]; 4] = [&["apiVersion"], &["kind"], &["metadata", "name"], &["metadata", "namespace"]];
    for skip in identity {
        let p: Path = skip.iter().map(|s| s.to_string()).collect();
        out.remove(&p);
    }
    out
}

fn get_path<'a>(doc: &'a Json, path: &[String]) -> Option<&'a Json> {
    path.iter().try_fold(doc, |cur, seg| cur.as_object()?.get(seg))
}

fn set_path(doc: &mut Json, path: &[String], value: Json) {
    let Some((first, rest)) = path.split_first() else {
        return;
    };
    if !doc.is_object() {
        *doc = Json::Object(Map::new());
    }
    let Some(map) = doc.as_object_mut() else {
        return;
    };
    if rest.is_empty() {
        // an empty map must not wipe children other managers own
        let keep_existing =
            matches!(&value, Json::Object(v) if v.is_empty()) && map.get(first).is_some_and(Json::is_object);
        if !keep_existing {
            map.insert(first.clone(), value);
        }
        return;
    }
    let child = map.entry(first.clone()).or_insert_with(|| Json::Object(Map::new()));
    set_path(child, rest, value);
}

fn remove_path(doc: &mut Json, path: &[String]) {
    let Some((last, parents)) = path.split_last() else {
        return;
    };
    let mut cur = doc;
    for seg in parents {
        match cur.get_mut(seg) {
            Some(next) => cur = next,
            None => return,
        }
    }
    if let Some(m) = cur.as_object_mut() {
        m.remove(last);
    }
}

fn without_server_fields(v: &Json) -> Json {
    let mut v = v.clone();
    if let Some(obj) = v.as_object_mut() {
        obj.remove("status");
        if let Some(meta) = obj.get_mut("metadata").and_then(Json::as_object_mut) {
            meta.remove("resourceVersion");
            meta.remove("generation");
            meta.remove("deletionTimestamp");
        }
    }
    v
}
