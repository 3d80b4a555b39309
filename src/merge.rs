use crate::value::JsonMap;
use indexmap::IndexMap;
use serde_json::Value;

/// Update-operator document accumulated as operator -> path -> value.
///
/// Merging is associative: per-field documents can be combined in any
/// grouping and produce the same result, with later values winning on
/// scalar conflicts.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct UpdateDocument {
    ops: IndexMap<String, JsonMap>,
}

/// Merges `incoming` into `existing`. Objects merge key by key, anything
/// else is replaced.
pub fn deep_merge(existing: &mut Value, incoming: Value) {
    match (existing, incoming) {
        (Value::Object(current), Value::Object(incoming)) => {
            for (key, value) in incoming {
                match current.get_mut(&key) {
                    Some(slot) => deep_merge(slot, value),
                    None => {
                        current.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}

impl UpdateDocument {
    pub fn new() -> Self {
        Self::default()
    }

    /// Single-entry document `{ op: { path: value } }`
    pub fn with(op: &str, path: impl Into<String>, value: Value) -> Self {
        let mut doc = Self::new();
        doc.add(op, path, value);
        doc
    }

    pub fn add(&mut self, op: &str, path: impl Into<String>, value: Value) {
        let targets = self.ops.entry(op.to_string()).or_default();
        let path = path.into();
        match targets.get_mut(&path) {
            Some(existing) => deep_merge(existing, value),
            None => {
                targets.insert(path, value);
            }
        }
    }

    pub fn merge(&mut self, other: UpdateDocument) {
        for (op, targets) in other.ops {
            for (path, value) in targets {
                self.add(&op, path, value);
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.ops.values().all(JsonMap::is_empty)
    }

    pub fn get(&self, op: &str) -> Option<&JsonMap> {
        self.ops.get(op)
    }

    pub fn into_document(self) -> JsonMap {
        self.ops
            .into_iter()
            .filter(|(_, targets)| !targets.is_empty())
            .map(|(op, targets)| (op, Value::Object(targets)))
            .collect()
    }
}

impl FromIterator<UpdateDocument> for UpdateDocument {
    fn from_iter<I: IntoIterator<Item = UpdateDocument>>(iter: I) -> Self {
        let mut merged = Self::new();
        for doc in iter {
            merged.merge(doc);
        }
        merged
    }
}
