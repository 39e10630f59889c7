//! Flat listings. Each one fans out over many resource types and skips the types that fail.

use std::cmp::Reverse;
use std::sync::Arc;

use futures::future::join_all;
use kplane_core::{ResourceType, ValueExt};
use kplane_kubehub::EventFilter;
use kplane_schema::Crd;
use metrics::counter;
use serde_json::Value;
use tracing::{debug, warn};

use crate::{GraphResolver, PlaneError, PlaneResult, RequestScope};

/// Event recency in milliseconds, from the most specific timestamp the event carries.
fn event_time(event: &Value) -> i64 {
    let paths: [&[&str]; 4] = [&["lastTimestamp"], &["eventTime"], &["firstTimestamp"], &["metadata", "creationTimestamp"]];
    paths
        .iter()
        .filter_map(|path| event.non_empty_at(path))
        .find_map(|ts| chrono::DateTime::parse_from_rfc3339(ts).ok())
        .map(|dt| dt.timestamp_millis())
        .unwrap_or(0)
}

impl GraphResolver {
    /// List every type, logging and skipping those that fail.
    async fn list_tolerant(&self, what: &'static str, types: &[ResourceType]) -> Vec<Value> {
        let results = join_all(types.iter().map(|rt| async move { (rt, self.cluster().list(rt).await) })).await;
        let mut out = Vec::new();
        for (rt, res) in results {
            match res {
                Ok(items) => out.extend(items),
                Err(e) => {
                    warn!(what, resource = %rt.gvk_key(), error = %e, "api: list failed for one type; skipped");
                    counter!("kplane_partial_list_failures_total", 1u64, "what" => what);
                }
            }
        }
        out
    }

    pub(crate) async fn claims(&self, scope: &RequestScope<'_>) -> PlaneResult<Vec<Value>> {
        let xrds = scope.xrds().await?;
        let types: Vec<ResourceType> = xrds
            .iter()
            .filter(|x| x.claim.is_some())
            .filter_map(|x| {
                let rt = x.claim_type();
                if rt.is_none() {
                    debug!(xrd = %x.name, "api: XRD serves no version; claims skipped");
                }
                rt
            })
            .collect();
        Ok(self.list_tolerant("claims", &types).await)
    }

    pub(crate) async fn composites(&self, scope: &RequestScope<'_>) -> PlaneResult<Vec<Value>> {
        let xrds = scope.xrds().await?;
        let types: Vec<ResourceType> = xrds
            .iter()
            .filter_map(|x| {
                let rt = x.composite_type();
                if rt.is_none() {
                    debug!(xrd = %x.name, "api: XRD serves no version; composites skipped");
                }
                rt
            })
            .collect();
        Ok(self.list_tolerant("composites", &types).await)
    }

    /// Managed resource instances, served from the instance cache.
    pub(crate) async fn managed_instances(&self) -> PlaneResult<Arc<Vec<Value>>> {
        let index = self.definitions().await?;
        self.caches()
            .instances
            .get_or_try_insert_with((), || async move {
                let types: Vec<ResourceType> = index.managed_definitions().filter_map(Crd::resource_type).collect();
                Ok::<_, PlaneError>(self.list_tolerant("managed", &types).await)
            })
            .await
    }

    pub(crate) async fn provider_configs(&self, provider: &str) -> PlaneResult<Vec<Value>> {
        let index = self.definitions().await?;
        if !index.providers().any(|p| p == provider) {
            return Err(PlaneError::NotFound(format!("provider \"{}\" not found", provider)));
        }
        let types: Vec<ResourceType> = index.config_definitions(provider).filter_map(Crd::resource_type).collect();
        Ok(self.list_tolerant("provider_configs", &types).await)
    }

    pub(crate) async fn events(&self, filter: &EventFilter) -> PlaneResult<Vec<Value>> {
        let mut items = self.cluster().list_events(filter).await?;
        items.sort_by_key(|e| Reverse(event_time(e)));
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn event_time_prefers_last_timestamp() {
        let e = json!({
            "lastTimestamp": "2024-05-01T10:00:00Z",
            "firstTimestamp": "2024-04-01T10:00:00Z",
            "metadata": { "creationTimestamp": "2024-03-01T10:00:00Z" }
        });
        let later = json!({ "eventTime": "2024-05-01T10:00:01.000000Z" });
        assert!(event_time(&later) > event_time(&e));
        assert_eq!(event_time(&json!({})), 0);
        assert_eq!(event_time(&json!({ "lastTimestamp": "" , "metadata": { "creationTimestamp": "1970-01-01T00:00:01Z" } })), 1000);
    }
}
