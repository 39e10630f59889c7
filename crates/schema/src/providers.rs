//! Index of managed resource CRDs by the Provider that installed them.
//!
//! Ownership comes from the CRD's owner references when present. Otherwise the API group is
//! matched against a table of well-known provider families and the result is fuzzily matched
//! against the installed Provider names. CRDs that qualify as managed but match no installed
//! Provider go to a synthesized bucket; they are never dropped.

use std::collections::BTreeMap;

use kplane_core::{ValueExt, PROVIDER_CONFIG_KIND, PROVIDER_CONFIG_USAGE_KIND};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tracing::debug;

use crate::crd::Crd;

/// Maps an API group pattern to the canonical name of the Provider family serving it.
#[derive(Debug, Clone)]
pub struct ProviderRule {
    pub pattern: Regex,
    pub provider: &'static str,
}

impl ProviderRule {
    fn new(pattern: &str, provider: &'static str) -> Option<Self> {
        Regex::new(pattern).ok().map(|pattern| Self { pattern, provider })
    }
}

pub static DEFAULT_RULES: Lazy<Vec<ProviderRule>> = Lazy::new(|| {
    [
        (r"(^|\.)aws\.upbound\.io$", "upbound-provider-aws"),
        (r"(^|\.)gcp\.upbound\.io$", "upbound-provider-gcp"),
        (r"(^|\.)azure\.upbound\.io$", "upbound-provider-azure"),
        (r"(^|\.)aws\.crossplane\.io$", "provider-aws"),
        (r"(^|\.)gcp\.crossplane\.io$", "provider-gcp"),
        (r"(^|\.)azure\.crossplane\.io$", "provider-azure"),
        (r"(^|\.)alibaba\.crossplane\.io$", "provider-alibaba"),
        (r"(^|\.)digitalocean\.crossplane\.io$", "provider-digitalocean"),
    ]
    .into_iter()
    .filter_map(|(p, n)| ProviderRule::new(p, n))
    .collect()
});

/// Cloud keywords that make two provider names refer to the same family.
const FAMILY_KEYWORDS: [&str; 5] = ["aws", "gcp", "azure", "alibaba", "digitalocean"];

/// Canonical provider name for a CRD, or `None` if it does not look like a managed resource.
///
/// A labelled managed CRD whose group matches no rule is named after its group's second-level
/// segment (`db.example.io` -> `provider-example`).
pub fn provider_name_for(crd: &Crd, rules: &[ProviderRule]) -> Option<String> {
    if let Some(rule) = rules.iter().find(|r| r.pattern.is_match(&crd.group)) {
        return Some(rule.provider.to_string());
    }
    if crd.is_labelled_managed() {
        let segments: Vec<&str> = crd.group.split('.').collect();
        let family = if segments.len() >= 2 { segments[segments.len() - 2] } else { segments[0] };
        return Some(format!("provider-{}", family));
    }
    None
}

fn normalized(name: &str) -> String {
    name.to_lowercase().replace(['-', '_'], "")
}

/// Whether an installed Provider name refers to the same family as a canonical name: equal
/// ignoring case, or sharing a cloud keyword.
pub fn matches_provider(installed: &str, canonical: &str) -> bool {
    if installed.eq_ignore_ascii_case(canonical) {
        return true;
    }
    let (a, b) = (normalized(installed), normalized(canonical));
    FAMILY_KEYWORDS.iter().any(|k| a.contains(k) && b.contains(k))
}

/// First group segment when it names a service rather than the family itself
/// (`s3` in `s3.aws.upbound.io`, nothing for `aws.upbound.io`).
fn service_segment(group: &str) -> Option<&str> {
    let first = group.split('.').next()?;
    (!FAMILY_KEYWORDS.contains(&first) && group.contains('.')).then_some(first)
}

fn best_installed<'a>(installed: &'a [String], canonical: &str, service: Option<&str>) -> Option<&'a str> {
    if let Some(exact) = installed.iter().find(|p| p.eq_ignore_ascii_case(canonical)) {
        if service.is_none() {
            return Some(exact.as_str());
        }
    }
    let candidates: Vec<&'a String> = installed.iter().filter(|p| matches_provider(p, canonical)).collect();
    let preferred = match service {
        Some(service) => {
            let suffix = format!("-{}", service);
            candidates.iter().find(|p| p.to_lowercase().ends_with(&suffix))
        }
        // family-level groups (configs) belong to the family provider
        None => candidates.iter().find(|p| p.to_lowercase().contains("family")),
    };
    preferred.or(candidates.first()).map(|p| p.as_str())
}

/// Managed resource CRDs grouped by provider name. Ordered for stable output.
#[derive(Debug, Clone, Default)]
pub struct ProviderIndex {
    buckets: BTreeMap<String, Vec<Crd>>,
}

impl ProviderIndex {
    /// `providers` are the installed Provider objects, `crds` every CRD in the cluster.
    pub fn build(providers: &[Value], crds: Vec<Crd>, rules: &[ProviderRule]) -> Self {
        let mut installed: Vec<String> = providers.iter().filter_map(|p| p.name()).map(str::to_string).collect();
        installed.sort();
        let mut buckets: BTreeMap<String, Vec<Crd>> = BTreeMap::new();
        for name in &installed {
            buckets.entry(name.clone()).or_default();
        }

        for crd in crds {
            let provider = if let Some(owner) = crd.owning_provider(&installed) {
                owner.to_string()
            } else if let Some(owner) = crd.provider_owners().next() {
                debug!(crd = %crd.name, provider = owner, "providers: owner not installed; synthesized bucket");
                owner.to_string()
            } else if let Some(canonical) = provider_name_for(&crd, rules) {
                match best_installed(&installed, &canonical, service_segment(&crd.group)) {
                    Some(p) => p.to_string(),
                    None => {
                        debug!(crd = %crd.name, provider = %canonical, "providers: no installed match; synthesized bucket");
                        canonical
                    }
                }
            } else {
                continue;
            };
            buckets.entry(provider).or_default().push(crd);
        }
        Self { buckets }
    }

    pub fn providers(&self) -> impl Iterator<Item = &str> {
        self.buckets.keys().map(String::as_str)
    }

    /// Every CRD indexed under `provider`, configs included.
    pub fn crds_of(&self, provider: &str) -> &[Crd] {
        self.buckets.get(provider).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn provider_of(&self, group: &str, kind: &str) -> Option<&str> {
        self.buckets
            .iter()
            .find(|(_, crds)| crds.iter().any(|c| c.group == group && c.kind == kind))
            .map(|(p, _)| p.as_str())
    }

    /// Managed resource definitions across all providers; config kinds are not managed resources.
    pub fn managed_definitions(&self) -> impl Iterator<Item = &Crd> {
        self.buckets
            .values()
            .flatten()
            .filter(|c| !c.has_kind(PROVIDER_CONFIG_KIND) && !c.has_kind(PROVIDER_CONFIG_USAGE_KIND))
    }

    pub fn config_definitions(&self, provider: &str) -> impl Iterator<Item = &Crd> {
        self.crds_of(provider).iter().filter(|c| c.has_kind(PROVIDER_CONFIG_KIND))
    }

    /// Config CRD of kind `config_kind` serving managed resources in `group`: first from the
    /// provider owning `group`/`kind`, then from any provider whose config group is a parent of
    /// `group` (family providers own the config for all their service groups).
    pub fn config_for(&self, group: &str, kind: &str, config_kind: &str) -> Option<&Crd> {
        if let Some(own) = self.provider_of(group, kind).and_then(|p| self.crds_of(p).iter().find(|c| c.has_kind(config_kind))) {
            return Some(own);
        }
        self.buckets
            .values()
            .flatten()
            .filter(|c| c.has_kind(config_kind))
            .filter(|c| group == c.group || group.ends_with(&format!(".{}", c.group)))
            .max_by_key(|c| c.group.len())
    }

    pub fn len(&self) -> usize {
        self.buckets.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn crd(name: &str, group: &str, kind: &str, labels: Value, owners: Value) -> Crd {
        Crd::from_value(json!({
            "metadata": { "name": name, "labels": labels, "ownerReferences": owners },
            "spec": { "group": group, "names": { "kind": kind }, "versions": [{ "name": "v1beta1", "served": true }] }
        }))
    }

    fn provider(name: &str) -> Value {
        json!({ "apiVersion": "pkg.crossplane.io/v1", "kind": "Provider", "metadata": { "name": name } })
    }

    #[test]
    fn group_patterns_name_the_family() {
        let cases = [
            ("s3.aws.upbound.io", Some("upbound-provider-aws")),
            ("compute.gcp.upbound.io", Some("upbound-provider-gcp")),
            ("network.azure.upbound.io", Some("upbound-provider-azure")),
            ("s3.aws.crossplane.io", Some("provider-aws")),
            ("some.random.io", None),
        ];
        for (group, expected) in cases {
            let c = crd(&format!("test.{}", group), group, "Thing", json!({}), json!([]));
            assert_eq!(provider_name_for(&c, &DEFAULT_RULES).as_deref(), expected, "group {}", group);
        }
        let labelled = crd("dbs.sql.example.io", "sql.example.io", "Db", json!({ "crossplane.io/scope": "managed" }), json!([]));
        assert_eq!(provider_name_for(&labelled, &DEFAULT_RULES).as_deref(), Some("provider-example"));
        let plain = crd("deployments.apps", "apps", "Deployment", json!({}), json!([]));
        assert_eq!(provider_name_for(&plain, &DEFAULT_RULES), None);
    }

    #[test]
    fn fuzzy_provider_matching() {
        assert!(matches_provider("upbound-provider-aws", "upbound-provider-aws"));
        assert!(matches_provider("provider-aws-s3", "upbound-provider-aws"));
        assert!(!matches_provider("provider-gcp", "upbound-provider-aws"));
    }

    #[test]
    fn owner_reference_wins_over_patterns() {
        let providers = [provider("crossplane-contrib-provider-aws"), provider("upbound-provider-aws-s3")];
        let owned = crd(
            "buckets.s3.aws.upbound.io",
            "s3.aws.upbound.io",
            "Bucket",
            json!({}),
            json!([{ "apiVersion": "pkg.crossplane.io/v1", "kind": "Provider", "name": "crossplane-contrib-provider-aws" }]),
        );
        let idx = ProviderIndex::build(&providers, vec![owned], &DEFAULT_RULES);
        assert_eq!(idx.provider_of("s3.aws.upbound.io", "Bucket"), Some("crossplane-contrib-provider-aws"));
    }

    #[test]
    fn service_specific_provider_is_preferred() {
        let providers = [provider("provider-family-aws"), provider("provider-aws-s3"), provider("provider-aws-ec2")];
        let crds = vec![
            crd("buckets.s3.aws.upbound.io", "s3.aws.upbound.io", "Bucket", json!({}), json!([])),
            crd("vpcs.ec2.aws.upbound.io", "ec2.aws.upbound.io", "VPC", json!({}), json!([])),
            crd("providerconfigs.aws.upbound.io", "aws.upbound.io", "ProviderConfig", json!({}), json!([])),
        ];
        let idx = ProviderIndex::build(&providers, crds, &DEFAULT_RULES);
        assert_eq!(idx.provider_of("s3.aws.upbound.io", "Bucket"), Some("provider-aws-s3"));
        assert_eq!(idx.provider_of("ec2.aws.upbound.io", "VPC"), Some("provider-aws-ec2"));
        assert_eq!(idx.provider_of("aws.upbound.io", "ProviderConfig"), Some("provider-family-aws"));
        assert_eq!(idx.managed_definitions().count(), 2);
        assert_eq!(idx.config_definitions("provider-family-aws").count(), 1);
        let config = idx.config_for("s3.aws.upbound.io", "Bucket", "ProviderConfig").unwrap();
        assert_eq!(config.group, "aws.upbound.io");
        assert!(idx.config_for("s3.aws.upbound.io", "Bucket", "ClusterProviderConfig").is_none());
    }

    #[test]
    fn unmatched_managed_crds_are_never_dropped() {
        let crds = vec![
            crd("buckets.s3.aws.upbound.io", "s3.aws.upbound.io", "Bucket", json!({}), json!([])),
            crd("deployments.apps", "apps", "Deployment", json!({}), json!([])),
        ];
        let idx = ProviderIndex::build(&[], crds, &DEFAULT_RULES);
        assert_eq!(idx.len(), 1);
        let provider = idx.provider_of("s3.aws.upbound.io", "Bucket").unwrap();
        assert!(provider.contains("aws"));
        assert_eq!(provider, "upbound-provider-aws");
    }

    #[test]
    fn owner_reference_indexes_groups_no_rule_knows() {
        let owner = json!([{ "apiVersion": "pkg.crossplane.io/v1", "kind": "Provider", "name": "aws" }]);
        let widget = crd("widgets.example.org", "example.org", "Widget", json!({}), owner);
        let idx = ProviderIndex::build(&[provider("aws")], vec![widget], &DEFAULT_RULES);
        assert_eq!(idx.provider_of("example.org", "Widget"), Some("aws"));
        assert_eq!(idx.managed_definitions().count(), 1);
    }

    #[test]
    fn crds_of_uninstalled_owner_keep_their_bucket() {
        let owner = json!([{ "apiVersion": "pkg.crossplane.io/v1", "kind": "Provider", "name": "provider-helm" }]);
        let release = crd("releases.helm.crossplane.io", "helm.crossplane.io", "Release", json!({}), owner);
        let idx = ProviderIndex::build(&[], vec![release], &DEFAULT_RULES);
        assert_eq!(idx.len(), 1);
        assert_eq!(idx.providers().collect::<Vec<_>>(), vec!["provider-helm"]);
        assert_eq!(idx.provider_of("helm.crossplane.io", "Release"), Some("provider-helm"));
    }

    #[test]
    fn installed_providers_without_crds_still_appear() {
        let idx = ProviderIndex::build(&[provider("provider-helm")], vec![], &DEFAULT_RULES);
        assert_eq!(idx.providers().collect::<Vec<_>>(), vec!["provider-helm"]);
        assert!(idx.is_empty());
        assert!(idx.crds_of("provider-helm").is_empty());
    }
}
