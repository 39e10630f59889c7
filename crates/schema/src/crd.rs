//! Typed view over a CustomResourceDefinition, limited to what the provider index needs.

use kplane_core::{split_api_version, ResourceType, ValueExt, PKG_GROUP, PROVIDER_KIND};
use serde_json::Value;

use crate::pick_served_version;

/// Label Crossplane puts on managed resource CRDs.
pub const SCOPE_LABEL: &str = "crossplane.io/scope";

#[derive(Debug, Clone)]
pub struct Crd {
    pub name: String,
    pub group: String,
    pub kind: String,
    pub plural: String,
    /// `(name, served)` in declaration order.
    pub versions: Vec<(String, bool)>,
    pub namespaced: bool,
    pub raw: Value,
}

impl Crd {
    pub fn from_value(raw: Value) -> Self {
        let versions = raw
            .array_at(&["spec", "versions"])
            .iter()
            .filter_map(|v| Some((v.non_empty_at(&["name"])?.to_string(), v.bool_at(&["served"]).unwrap_or(false))))
            .collect();
        Self {
            name: raw.name().unwrap_or("").to_string(),
            group: raw.str_at(&["spec", "group"]).unwrap_or("").to_string(),
            kind: raw.str_at(&["spec", "names", "kind"]).unwrap_or("").to_string(),
            plural: raw.str_at(&["spec", "names", "plural"]).unwrap_or("").to_string(),
            versions,
            namespaced: raw.str_at(&["spec", "scope"]) == Some("Namespaced"),
            raw,
        }
    }

    pub fn served_version(&self) -> Option<String> {
        pick_served_version(self.versions.iter().map(|(n, s)| (n.as_str(), *s)))
    }

    /// Resource type at the served version. The CRD's declared plural wins over any guess.
    pub fn resource_type(&self) -> Option<ResourceType> {
        let version = self.served_version()?;
        let plural = if self.plural.is_empty() { kplane_core::plural_of(&self.kind) } else { self.plural.clone() };
        Some(ResourceType::new(&self.group, &version, &self.kind, &plural))
    }

    /// Names of the Providers listed as owners, in owner-reference order.
    pub fn provider_owners(&self) -> impl Iterator<Item = &str> {
        self.raw.owner_references().iter().filter_map(|o| {
            let (group, _) = split_api_version(o.str_at(&["apiVersion"]).unwrap_or(""));
            if group != PKG_GROUP || o.str_at(&["kind"]) != Some(PROVIDER_KIND) {
                return None;
            }
            o.non_empty_at(&["name"])
        })
    }

    /// Name of the first owning Provider among `installed`.
    pub fn owning_provider<'a>(&self, installed: &'a [String]) -> Option<&'a str> {
        self.provider_owners().find_map(|name| installed.iter().find(|p| p.as_str() == name).map(String::as_str))
    }

    pub fn is_labelled_managed(&self) -> bool {
        self.raw.label(SCOPE_LABEL) == Some("managed")
    }

    pub fn has_kind(&self, kind: &str) -> bool {
        self.kind == kind
    }
}
