//! Typed view over a CompositeResourceDefinition.

use kplane_core::{ResourceType, ValueExt};
use serde::Serialize;
use serde_json::Value;

use crate::pick_served_version;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct XrdNames {
    pub kind: String,
    pub plural: String,
}

impl XrdNames {
    fn from_value(v: Option<&Value>) -> Option<Self> {
        let v = v?;
        let kind = v.non_empty_at(&["kind"])?.to_string();
        let plural = v.non_empty_at(&["plural"]).map(str::to_string).unwrap_or_else(|| kplane_core::plural_of(&kind));
        Some(Self { kind, plural })
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct XrdVersion {
    pub name: String,
    pub served: bool,
    pub referenceable: bool,
}

/// The fields of an XRD that resolution depends on, plus the raw object for pass-through.
#[derive(Debug, Clone)]
pub struct Xrd {
    pub name: String,
    pub group: String,
    pub composite: XrdNames,
    pub claim: Option<XrdNames>,
    pub versions: Vec<XrdVersion>,
    pub raw: Value,
}

impl Xrd {
    /// Missing fields degrade to empty strings; an XRD without composite names still parses so a
    /// listing never drops it.
    pub fn from_value(raw: Value) -> Self {
        let composite = XrdNames::from_value(raw.at(&["spec", "names"]))
            .unwrap_or(XrdNames { kind: String::new(), plural: String::new() });
        let claim = XrdNames::from_value(raw.at(&["spec", "claimNames"]));
        let versions = raw
            .array_at(&["spec", "versions"])
            .iter()
            .filter_map(|v| {
                Some(XrdVersion {
                    name: v.non_empty_at(&["name"])?.to_string(),
                    served: v.bool_at(&["served"]).unwrap_or(false),
                    referenceable: v.bool_at(&["referenceable"]).unwrap_or(false),
                })
            })
            .collect();
        Self {
            name: raw.name().unwrap_or("").to_string(),
            group: raw.str_at(&["spec", "group"]).unwrap_or("").to_string(),
            composite,
            claim,
            versions,
            raw,
        }
    }

    pub fn served_version(&self) -> Option<String> {
        pick_served_version(self.versions.iter().map(|v| (v.name.as_str(), v.served)))
    }

    /// An empty version matches anything.
    pub fn declares_version(&self, version: &str) -> bool {
        version.is_empty() || self.versions.iter().any(|v| v.name == version)
    }

    /// Resource type of the composite at its served version.
    pub fn composite_type(&self) -> Option<ResourceType> {
        let version = self.served_version()?;
        Some(ResourceType::new(&self.group, &version, &self.composite.kind, &self.composite.plural))
    }

    /// Resource type of the claim at its served version; `None` for XRDs that offer no claim.
    pub fn claim_type(&self) -> Option<ResourceType> {
        let claim = self.claim.as_ref()?;
        let version = self.served_version()?;
        Some(ResourceType::new(&self.group, &version, &claim.kind, &claim.plural))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_names_and_versions() {
        let x = Xrd::from_value(json!({
            "metadata": { "name": "xnets.net.example.org" },
            "spec": {
                "group": "net.example.org",
                "names": { "kind": "XNetwork", "plural": "xnetworks" },
                "versions": [
                    { "name": "v1alpha1", "served": false },
                    { "name": "v1", "served": true, "referenceable": true }
                ]
            }
        }));
        assert_eq!(x.name, "xnets.net.example.org");
        assert_eq!(x.claim, None);
        assert_eq!(x.served_version().as_deref(), Some("v1"));
        assert_eq!(x.composite_type().unwrap().plural, "xnetworks");
        assert!(x.claim_type().is_none());
        assert!(x.declares_version("v1alpha1"));
        assert!(!x.declares_version("v2"));
    }

    #[test]
    fn nothing_served_means_no_types() {
        let x = Xrd::from_value(json!({
            "spec": { "group": "g", "names": { "kind": "XThing" }, "claimNames": { "kind": "Thing" },
                      "versions": [{ "name": "v1", "served": false }] }
        }));
        assert_eq!(x.composite.plural, "xthings");
        assert!(x.composite_type().is_none());
        assert!(x.claim_type().is_none());
    }

    #[test]
    fn malformed_xrd_still_parses() {
        let x = Xrd::from_value(json!({ "metadata": { "name": "broken" } }));
        assert_eq!(x.name, "broken");
        assert!(x.composite.kind.is_empty());
        assert!(x.versions.is_empty());
    }
}
