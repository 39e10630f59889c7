mod common;

use common::{buckets, cluster, crd, named, resolver};
use kplane_api::{PlaneApi, PlaneError};
use kplane_core::ResourceType;
use kplane_kubehub::{EventFilter, MemoryCluster};
use serde_json::json;

fn ec2(kind: &str, plural: &str) -> ResourceType {
    ResourceType::new("ec2.aws.upbound.io", "v1beta1", kind, plural)
}

/// Five managed kinds with one instance each.
fn five_kinds() -> (MemoryCluster, Vec<ResourceType>) {
    let c = cluster();
    let kinds = vec![
        buckets(),
        ec2("Instance", "instances"),
        ec2("VPC", "vpcs"),
        ResourceType::new("rds.aws.upbound.io", "v1beta1", "Cluster", "clusters"),
        ResourceType::new("iam.aws.upbound.io", "v1beta1", "Role", "roles"),
    ];
    for rt in &kinds[1..] {
        c.insert(&ResourceType::crds(), crd(&rt.group, &rt.kind, &rt.plural, &rt.version, "Cluster"));
        c.insert(rt, named(&format!("{}-1", rt.plural), None, json!({})));
    }
    (c, kinds)
}

#[tokio::test]
async fn managed_listing_skips_failing_kinds() {
    let (c, kinds) = five_kinds();
    c.fail(&kinds[1]).fail(&kinds[3]);
    let (_, r) = resolver(c);

    let items = r.list_managed().await.unwrap();
    let mut names: Vec<&str> = items.iter().filter_map(|i| i["metadata"]["name"].as_str()).collect();
    names.sort();
    assert_eq!(names, vec!["b1", "roles-1", "vpcs-1"]);
}

#[tokio::test]
async fn managed_definitions_exclude_configs_and_are_cached() {
    let (c, _) = five_kinds();
    let (c, r) = resolver(c);

    let defs = r.list_managed_definitions().await.unwrap();
    assert_eq!(defs.len(), 5);
    assert!(defs.iter().all(|d| d["spec"]["names"]["kind"] != "ProviderConfig"));

    r.list_managed_definitions().await.unwrap();
    r.list_managed().await.unwrap();
    assert_eq!(c.calls("list:customresourcedefinitions"), 1);
    assert_eq!(c.calls("list:providers"), 1);
}

#[tokio::test]
async fn managed_instances_are_cached() {
    let (c, r) = resolver(cluster());
    assert_eq!(r.list_managed().await.unwrap().len(), 1);
    assert_eq!(r.list_managed().await.unwrap().len(), 1);
    assert_eq!(c.calls("list:buckets"), 1);
}

#[tokio::test]
async fn claims_and_composites_follow_xrds() {
    let (_, r) = resolver(cluster());
    let claims = r.list_claims().await.unwrap();
    assert_eq!(claims.len(), 1);
    assert_eq!(claims[0]["metadata"]["name"], "db1");

    let composites = r.list_composites().await.unwrap();
    assert_eq!(composites.len(), 2);
}

#[tokio::test]
async fn xrd_listing_failure_propagates() {
    let c = cluster();
    c.fail(&ResourceType::xrds("v1"));
    let (_, r) = resolver(c);
    assert!(matches!(r.list_claims().await.unwrap_err(), PlaneError::Fetch(_)));
}

#[tokio::test]
async fn provider_configs_are_listed_per_provider() {
    let (_, r) = resolver(cluster());
    let configs = r.list_provider_configs("upbound-provider-aws").await.unwrap();
    assert_eq!(configs.len(), 1);
    assert_eq!(configs[0]["metadata"]["name"], "default");

    let err = r.list_provider_configs("provider-nope").await.unwrap_err();
    assert!(matches!(err, PlaneError::NotFound(_)));
}

#[tokio::test]
async fn providers_and_compositions_pass_through() {
    let (_, r) = resolver(cluster());
    let providers = r.list_providers().await.unwrap();
    assert_eq!(providers.len(), 1);
    assert_eq!(providers[0]["spec"]["package"], "xpkg.upbound.io/upbound/provider-aws-s3:v1");
    assert_eq!(r.get_provider("upbound-provider-aws").await.unwrap()["kind"], "Provider");
    assert!(matches!(r.get_provider("ghost").await.unwrap_err(), PlaneError::NotFound(_)));

    assert_eq!(r.list_compositions().await.unwrap().len(), 1);
    assert_eq!(r.get_composition("xdb-aws").await.unwrap()["metadata"]["name"], "xdb-aws");
}

#[tokio::test]
async fn events_are_filtered_and_newest_first() {
    let c = cluster();
    for (name, ts) in [("old", "2024-01-01T00:00:00Z"), ("new", "2024-06-01T00:00:00Z"), ("mid", "2024-03-01T00:00:00Z")] {
        c.insert_event(json!({
            "metadata": { "name": name },
            "involvedObject": { "kind": "Provider", "name": "upbound-provider-aws" },
            "lastTimestamp": ts
        }));
    }
    c.insert_event(json!({ "metadata": { "name": "other" }, "involvedObject": { "kind": "Bucket", "name": "b1" } }));
    let (_, r) = resolver(c);

    let events = r.provider_events("upbound-provider-aws").await.unwrap();
    let names: Vec<&str> = events.iter().filter_map(|e| e["metadata"]["name"].as_str()).collect();
    assert_eq!(names, vec!["new", "mid", "old"]);

    let filtered = r.list_events(EventFilter::new("b1", None, Some("Bucket"))).await.unwrap();
    assert_eq!(filtered.len(), 1);
}
