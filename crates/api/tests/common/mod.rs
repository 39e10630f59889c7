#![allow(dead_code)]

use std::sync::Arc;

use kplane_api::{GraphResolver, ResolverConfig};
use kplane_core::ResourceType;
use kplane_kubehub::MemoryCluster;
use serde_json::{json, Value};

pub fn xrd_type() -> ResourceType {
    ResourceType::xrds("v1")
}

pub fn xdatabases() -> ResourceType {
    ResourceType::new("db.example.org", "v1", "XDatabase", "xdatabases")
}

pub fn databases() -> ResourceType {
    ResourceType::new("db.example.org", "v1", "Database", "databases")
}

pub fn buckets() -> ResourceType {
    ResourceType::new("s3.aws.upbound.io", "v1beta1", "Bucket", "buckets")
}

pub fn aws_configs() -> ResourceType {
    ResourceType::new("aws.upbound.io", "v1beta1", "ProviderConfig", "providerconfigs")
}

pub fn crd(group: &str, kind: &str, plural: &str, version: &str, scope: &str) -> Value {
    json!({
        "metadata": { "name": format!("{}.{}", plural, group) },
        "spec": {
            "group": group,
            "scope": scope,
            "names": { "kind": kind, "plural": plural },
            "versions": [{ "name": version, "served": true }]
        }
    })
}

pub fn named(name: &str, namespace: Option<&str>, spec: Value) -> Value {
    let mut obj = json!({ "metadata": { "name": name }, "spec": spec });
    if let Some(ns) = namespace {
        obj["metadata"]["namespace"] = json!(ns);
    }
    obj
}

/// A cluster with one XRD (`XDatabase`, claimed as `Database`), one AWS provider and a small graph:
/// claim `team-a/db1` → composite `xdb1` → bucket `b1`, nested composite `xdb-child` and a
/// dangling nested claim.
pub fn cluster() -> MemoryCluster {
    let c = MemoryCluster::new();
    c.set_group_versions(Some(vec!["apiextensions.crossplane.io/v1".into(), "apiextensions.k8s.io/v1".into()]));

    c.insert(
        &xrd_type(),
        json!({
            "metadata": { "name": "xdatabases.db.example.org" },
            "spec": {
                "group": "db.example.org",
                "names": { "kind": "XDatabase", "plural": "xdatabases" },
                "claimNames": { "kind": "Database", "plural": "databases" },
                "versions": [{ "name": "v1", "served": true, "referenceable": true }]
            }
        }),
    );

    c.insert(&ResourceType::providers(), named("upbound-provider-aws", None, json!({ "package": "xpkg.upbound.io/upbound/provider-aws-s3:v1" })));
    c.insert(&ResourceType::crds(), crd("s3.aws.upbound.io", "Bucket", "buckets", "v1beta1", "Cluster"));
    c.insert(&ResourceType::crds(), crd("aws.upbound.io", "ProviderConfig", "providerconfigs", "v1beta1", "Cluster"));
    c.insert(&ResourceType::crds(), crd("aws.upbound.io", "ProviderConfigUsage", "providerconfigusages", "v1beta1", "Cluster"));
    c.insert(&ResourceType::crds(), crd("pkg.crossplane.io", "Provider", "providers", "v1", "Cluster"));

    c.insert(&ResourceType::compositions(), named("xdb-aws", None, json!({ "compositeTypeRef": { "apiVersion": "db.example.org/v1", "kind": "XDatabase" } })));

    c.insert(
        &databases(),
        named(
            "db1",
            Some("team-a"),
            json!({ "resourceRef": { "apiVersion": "db.example.org/v1", "kind": "XDatabase", "name": "xdb1" } }),
        ),
    );
    c.insert(
        &xdatabases(),
        named(
            "xdb1",
            None,
            json!({
                "claimRef": { "apiVersion": "db.example.org/v1", "kind": "Database", "name": "db1", "namespace": "team-a" },
                "compositionRef": { "name": "xdb-aws" },
                "resourceRefs": [
                    { "apiVersion": "s3.aws.upbound.io/v1beta1", "kind": "Bucket", "name": "b1" },
                    { "apiVersion": "db.example.org/v1", "kind": "XDatabase", "name": "xdb-child" },
                    { "apiVersion": "db.example.org/v1", "kind": "Database", "name": "nested", "namespace": "team-a" }
                ]
            }),
        ),
    );
    let mut child = named("xdb-child", None, json!({ "compositionRef": { "name": "xdb-aws" } }));
    child["metadata"]["ownerReferences"] =
        json!([{ "apiVersion": "db.example.org/v1", "kind": "XDatabase", "name": "xdb1", "controller": true }]);
    c.insert(&xdatabases(), child);

    let mut bucket = named("b1", None, json!({ "providerConfigRef": { "name": "default" } }));
    bucket["metadata"]["ownerReferences"] =
        json!([{ "apiVersion": "db.example.org/v1", "kind": "XDatabase", "name": "xdb1", "controller": true }]);
    c.insert(&buckets(), bucket);
    c.insert(&aws_configs(), named("default", None, json!({ "credentials": { "source": "IRSA" } })));
    c
}

pub fn resolver(cluster: MemoryCluster) -> (Arc<MemoryCluster>, GraphResolver) {
    let cluster = Arc::new(cluster);
    let resolver = GraphResolver::new(cluster.clone(), ResolverConfig::default());
    (cluster, resolver)
}

/// Reason of the `Found=False` marker condition, if present.
pub fn found_reason(obj: &Value) -> Option<String> {
    kplane_core::json::found_condition(obj).map(|(reason, _)| reason.to_string())
}
