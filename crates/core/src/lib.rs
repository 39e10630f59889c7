//! kplane core types: references to cluster objects and the resource types behind them.

#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

pub mod json;
pub mod plural;

pub use json::{found_false, stamp_reference, FoundReason, ValueExt};
pub use plural::plural_of;

/// Crossplane package manager group (Provider, ProviderRevision, ...).
pub const PKG_GROUP: &str = "pkg.crossplane.io";
/// Crossplane composition machinery group (XRD, Composition).
pub const APIEXT_GROUP: &str = "apiextensions.crossplane.io";
/// Kubernetes CRD group.
pub const K8S_APIEXT_GROUP: &str = "apiextensions.k8s.io";

pub const PROVIDER_KIND: &str = "Provider";
pub const PROVIDER_CONFIG_KIND: &str = "ProviderConfig";
pub const PROVIDER_CONFIG_USAGE_KIND: &str = "ProviderConfigUsage";
pub const COMPOSITION_KIND: &str = "Composition";
pub const XRD_KIND: &str = "CompositeResourceDefinition";

/// Split `group/version` into its parts; core types (`v1`) have an empty group.
pub fn split_api_version(api_version: &str) -> (String, String) {
    match api_version.split_once('/') {
        Some((g, v)) => (g.to_string(), v.to_string()),
        None => (String::new(), api_version.to_string()),
    }
}

/// Join group and version the way `apiVersion` fields spell them.
pub fn join_api_version(group: &str, version: &str) -> String {
    if group.is_empty() { version.to_string() } else { format!("{}/{}", group, version) }
}

/// Reference to any cluster object.
///
/// An empty `name` is a valid "not resolved yet" reference; resolution turns it into a
/// `Found=False/NameIsEmpty` marker instead of an error.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ObjectRef {
    pub group: String,
    pub version: String,
    pub kind: String,
    pub namespace: Option<String>,
    pub name: String,
}

impl ObjectRef {
    pub fn new(group: &str, version: &str, kind: &str, namespace: Option<&str>, name: &str) -> Self {
        Self {
            group: group.to_string(),
            version: version.to_string(),
            kind: kind.to_string(),
            namespace: namespace.filter(|ns| !ns.is_empty()).map(|ns| ns.to_string()),
            name: name.to_string(),
        }
    }

    /// Build from the `{apiVersion, kind, name, namespace}` shape used by owner and resource references.
    pub fn from_api_version(api_version: &str, kind: &str, namespace: Option<&str>, name: &str) -> Self {
        let (group, version) = split_api_version(api_version);
        Self::new(&group, &version, kind, namespace, name)
    }

    /// Read a reference object (`resourceRef`, `claimRef`, an owner reference, ...).
    /// Missing fields become empty strings so the reference still resolves to a marker.
    pub fn from_value(v: &serde_json::Value) -> Self {
        Self::from_api_version(
            v.str_at(&["apiVersion"]).unwrap_or(""),
            v.str_at(&["kind"]).unwrap_or(""),
            v.str_at(&["namespace"]),
            v.str_at(&["name"]).unwrap_or(""),
        )
    }

    /// Reference pointing at an object that was already fetched.
    pub fn of_object(obj: &serde_json::Value) -> Self {
        Self::from_api_version(
            obj.str_at(&["apiVersion"]).unwrap_or(""),
            obj.str_at(&["kind"]).unwrap_or(""),
            obj.namespace(),
            obj.name().unwrap_or(""),
        )
    }

    pub fn api_version(&self) -> String { join_api_version(&self.group, &self.version) }

    pub fn is_unnamed(&self) -> bool { self.name.is_empty() }

    pub fn with_namespace(mut self, namespace: Option<&str>) -> Self {
        self.namespace = namespace.filter(|ns| !ns.is_empty()).map(|ns| ns.to_string());
        self
    }

    /// Same group and kind, ignoring version, namespace and name.
    pub fn same_group_kind(&self, group: &str, kind: &str) -> bool {
        self.group == group && self.kind == kind
    }
}

impl std::fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}/{}/{}", self.api_version(), self.kind, ns, self.name),
            None => write!(f, "{}/{}/{}", self.api_version(), self.kind, self.name),
        }
    }
}

/// A REST-addressable resource type: group/version/kind plus the plural used in URLs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ResourceType {
    pub group: String,
    pub version: String,
    pub kind: String,
    pub plural: String,
}

impl ResourceType {
    pub fn new(group: &str, version: &str, kind: &str, plural: &str) -> Self {
        Self { group: group.to_string(), version: version.to_string(), kind: kind.to_string(), plural: plural.to_string() }
    }

    /// Resource type whose plural comes from the naive heuristic.
    pub fn guessed(group: &str, version: &str, kind: &str) -> Self {
        Self::new(group, version, kind, &plural_of(kind))
    }

    pub fn api_version(&self) -> String { join_api_version(&self.group, &self.version) }

    pub fn gvk_key(&self) -> String {
        if self.group.is_empty() {
            format!("{}/{}", self.version, self.kind)
        } else {
            format!("{}/{}/{}", self.group, self.version, self.kind)
        }
    }

    pub fn providers() -> Self { Self::new(PKG_GROUP, "v1", PROVIDER_KIND, "providers") }

    pub fn compositions() -> Self { Self::new(APIEXT_GROUP, "v1", COMPOSITION_KIND, "compositions") }

    pub fn xrds(version: &str) -> Self {
        Self::new(APIEXT_GROUP, version, XRD_KIND, "compositeresourcedefinitions")
    }

    pub fn crds() -> Self { Self::new(K8S_APIEXT_GROUP, "v1", "CustomResourceDefinition", "customresourcedefinitions") }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_version_round_trips_core_and_grouped() {
        assert_eq!(split_api_version("v1"), (String::new(), "v1".to_string()));
        assert_eq!(split_api_version("s3.aws.upbound.io/v1beta1"), ("s3.aws.upbound.io".to_string(), "v1beta1".to_string()));
        assert_eq!(join_api_version("", "v1"), "v1");
        assert_eq!(ObjectRef::new("pkg.crossplane.io", "v1", "Provider", None, "aws").api_version(), "pkg.crossplane.io/v1");
    }

    #[test]
    fn reference_from_value_tolerates_missing_fields() {
        let r = ObjectRef::from_value(&serde_json::json!({ "apiVersion": "db.example.org/v1", "kind": "XPostgres" }));
        assert_eq!(r.group, "db.example.org");
        assert_eq!(r.kind, "XPostgres");
        assert!(r.is_unnamed());
        assert_eq!(r.namespace, None);
    }

    #[test]
    fn empty_namespace_is_treated_as_cluster_scope() {
        let r = ObjectRef::new("g", "v1", "K", Some(""), "n");
        assert_eq!(r.namespace, None);
        assert_eq!(r.to_string(), "g/v1/K/n");
    }
}
