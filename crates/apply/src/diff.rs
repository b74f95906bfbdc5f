use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

/// Field-level change counts between a desired document and a base.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffSummary {
    pub adds: usize,
    pub updates: usize,
    pub removes: usize,
}

impl DiffSummary {
    pub fn is_empty(&self) -> bool {
        self.adds == 0 && self.updates == 0 && self.removes == 0
    }
}

const SERVER_METADATA: [&str; 5] = ["managedFields", "resourceVersion", "generation", "creationTimestamp", "uid"];

/// Drop fields the API server owns so a live object can be stored as state
/// or compared with what was applied.
pub fn prune_server_fields(mut live: Json) -> Json {
    if let Some(obj) = live.as_object_mut() {
        obj.remove("status");
        if let Some(meta) = obj.get_mut("metadata").and_then(Json::as_object_mut) {
            for field in SERVER_METADATA {
                meta.remove(field);
            }
        }
    }
    live
}

/// Count what applying `target` over `base` would add, change and drop.
///
/// Arrays compare index by index; a length difference counts as adds or removes.
pub fn diff_summary(target: &Json, base: &Json) -> DiffSummary {
    let mut sum = DiffSummary::default();
    tally(target, base, &mut sum);
    sum
}

fn tally(target: &Json, base: &Json, sum: &mut DiffSummary) {
    if target == base {
        return;
    }
    match (target, base) {
        (Json::Object(t), Json::Object(b)) => {
            for (k, tv) in t {
                match b.get(k) {
                    Some(bv) => tally(tv, bv, sum),
                    None => sum.adds += 1,
                }
            }
            sum.removes += b.keys().filter(|k| !t.contains_key(*k)).count();
        }
        (Json::Array(t), Json::Array(b)) => {
            sum.updates += t.iter().zip(b.iter()).filter(|(x, y)| x != y).count();
            sum.adds += t.len().saturating_sub(b.len());
            sum.removes += b.len().saturating_sub(t.len());
        }
        _ => sum.updates += 1,
    }
}
