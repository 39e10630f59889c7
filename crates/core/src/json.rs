//! Safe path access over free-form cluster objects, and the `Found=False` markers that stand in
//! for objects that could not be resolved.

use serde_json::{json, Map, Value};

use crate::ObjectRef;

/// Optional-path accessors over `serde_json::Value`. Absence is `None`, never a panic.
pub trait ValueExt {
    fn at(&self, path: &[&str]) -> Option<&Value>;

    fn str_at(&self, path: &[&str]) -> Option<&str> {
        self.at(path).and_then(|v| v.as_str())
    }

    /// Non-empty string at `path`.
    fn non_empty_at(&self, path: &[&str]) -> Option<&str> {
        self.str_at(path).filter(|s| !s.is_empty())
    }

    fn bool_at(&self, path: &[&str]) -> Option<bool> {
        self.at(path).and_then(|v| v.as_bool())
    }

    fn array_at(&self, path: &[&str]) -> &[Value] {
        self.at(path).and_then(|v| v.as_array()).map(|a| a.as_slice()).unwrap_or(&[])
    }

    fn name(&self) -> Option<&str> { self.str_at(&["metadata", "name"]) }

    fn namespace(&self) -> Option<&str> { self.non_empty_at(&["metadata", "namespace"]) }

    fn owner_references(&self) -> &[Value] { self.array_at(&["metadata", "ownerReferences"]) }

    fn label(&self, key: &str) -> Option<&str> {
        self.at(&["metadata", "labels"]).and_then(|l| l.get(key)).and_then(|v| v.as_str())
    }
}

impl ValueExt for Value {
    fn at(&self, path: &[&str]) -> Option<&Value> {
        let mut cur = self;
        for seg in path {
            cur = cur.as_object()?.get(*seg)?;
        }
        Some(cur)
    }
}

/// Why a linked object is absent from a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FoundReason {
    /// The reference exists but names nothing yet.
    NameIsEmpty,
    /// The reference was well-formed but fetching it failed.
    FailedToGet,
}

impl FoundReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FoundReason::NameIsEmpty => "NameIsEmpty",
            FoundReason::FailedToGet => "FailedToGet",
        }
    }
}

/// Synthesize a placeholder object for `reference` carrying a `Found=False` condition.
pub fn found_false(reference: &ObjectRef, reason: FoundReason, message: &str) -> Value {
    let mut obj = json!({
        "apiVersion": reference.api_version(),
        "kind": reference.kind,
        "metadata": { "name": reference.name },
        "status": {
            "conditions": [{
                "type": "Found",
                "status": "False",
                "reason": reason.as_str(),
                "message": message,
            }]
        }
    });
    if let Some(ns) = &reference.namespace {
        obj["metadata"]["namespace"] = Value::String(ns.clone());
    }
    obj
}

/// Overwrite kind/name/namespace with what the caller asked for; dynamically typed fetches do not
/// reliably echo them back.
pub fn stamp_reference(obj: &mut Value, reference: &ObjectRef) {
    let Some(map) = obj.as_object_mut() else { return };
    map.insert("kind".into(), Value::String(reference.kind.clone()));
    if !map.get("apiVersion").and_then(|v| v.as_str()).is_some_and(|s| !s.is_empty()) {
        map.insert("apiVersion".into(), Value::String(reference.api_version()));
    }
    let meta = map.entry("metadata").or_insert_with(|| Value::Object(Map::new()));
    if let Some(meta) = meta.as_object_mut() {
        meta.insert("name".into(), Value::String(reference.name.clone()));
        if let Some(ns) = &reference.namespace {
            meta.insert("namespace".into(), Value::String(ns.clone()));
        }
    }
}

/// Returns the `(reason, message)` of a `Found=False` condition, if the object carries one.
pub fn found_condition(obj: &Value) -> Option<(&str, &str)> {
    obj.array_at(&["status", "conditions"]).iter().find_map(|c| {
        if c.str_at(&["type"]) == Some("Found") && c.str_at(&["status"]) == Some("False") {
            Some((c.str_at(&["reason"]).unwrap_or(""), c.str_at(&["message"]).unwrap_or("")))
        } else {
            None
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_access_never_panics() {
        let v = json!({ "spec": { "crossplane": { "compositionRef": { "name": "c1" } }, "list": [1] } });
        assert_eq!(v.str_at(&["spec", "crossplane", "compositionRef", "name"]), Some("c1"));
        assert_eq!(v.str_at(&["spec", "list", "0"]), None);
        assert_eq!(v.str_at(&["spec", "missing", "name"]), None);
        assert!(v.array_at(&["spec", "resourceRefs"]).is_empty());
        assert_eq!(json!("scalar").at(&["a"]), None);
    }

    #[test]
    fn marker_carries_reference_and_reason() {
        let r = ObjectRef::new("db.example.org", "v1", "XPostgres", Some("team-a"), "");
        let m = found_false(&r, FoundReason::NameIsEmpty, "name is empty");
        assert_eq!(m["kind"], "XPostgres");
        assert_eq!(m["apiVersion"], "db.example.org/v1");
        assert_eq!(m["metadata"]["namespace"], "team-a");
        assert_eq!(found_condition(&m), Some(("NameIsEmpty", "name is empty")));
    }

    #[test]
    fn stamping_overrides_identity_but_keeps_body() {
        let r = ObjectRef::new("g.io", "v1", "Bucket", None, "b1");
        let mut obj = json!({ "spec": { "x": 1 }, "metadata": { "uid": "u" } });
        stamp_reference(&mut obj, &r);
        assert_eq!(obj["kind"], "Bucket");
        assert_eq!(obj["apiVersion"], "g.io/v1");
        assert_eq!(obj["metadata"]["name"], "b1");
        assert_eq!(obj["metadata"]["uid"], "u");
        assert_eq!(obj["spec"]["x"], 1);
    }
}
