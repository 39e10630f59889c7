//! In-memory cluster for tests and demos.
//!
//! Objects are stored per `(group, version, plural)`, so a wrong plural guess misses just like it
//! would against a real API server. Resources can be marked failing, and every call is counted.

use std::sync::{Mutex, RwLock};

use kplane_core::{ResourceType, ValueExt};
use rustc_hash::{FxHashMap, FxHashSet};
use serde_json::Value;

use crate::{ClusterAccess, ClusterError, ClusterResult, EventFilter};

type Key = (String, String, String);

fn key(resource: &ResourceType) -> Key {
    (resource.group.clone(), resource.version.clone(), resource.plural.clone())
}

#[derive(Default)]
pub struct MemoryCluster {
    objects: RwLock<FxHashMap<Key, Vec<Value>>>,
    events: RwLock<Vec<Value>>,
    /// `None` makes discovery fail.
    group_versions: RwLock<Option<Vec<String>>>,
    failing: RwLock<FxHashSet<Key>>,
    calls: Mutex<FxHashMap<String, usize>>,
}

impl MemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `obj` under `resource`, stamping its type meta.
    pub fn insert(&self, resource: &ResourceType, mut obj: Value) -> &Self {
        if let Some(map) = obj.as_object_mut() {
            map.insert("apiVersion".into(), Value::String(resource.api_version()));
            map.insert("kind".into(), Value::String(resource.kind.clone()));
        }
        let mut objects = self.objects.write().unwrap_or_else(|e| e.into_inner());
        objects.entry(key(resource)).or_default().push(obj);
        self
    }

    /// Declare `resource` as served without adding instances; listing it yields an empty list.
    pub fn register(&self, resource: &ResourceType) -> &Self {
        self.objects.write().unwrap_or_else(|e| e.into_inner()).entry(key(resource)).or_default();
        self
    }

    pub fn insert_event(&self, event: Value) -> &Self {
        self.events.write().unwrap_or_else(|e| e.into_inner()).push(event);
        self
    }

    pub fn set_group_versions(&self, group_versions: Option<Vec<String>>) -> &Self {
        *self.group_versions.write().unwrap_or_else(|e| e.into_inner()) = group_versions;
        self
    }

    /// Make every list/get against `resource` fail with a 500.
    pub fn fail(&self, resource: &ResourceType) -> &Self {
        self.failing.write().unwrap_or_else(|e| e.into_inner()).insert(key(resource));
        self
    }

    /// Number of calls made for `op` (`list`, `get`, `events`, `discovery`, `list:<plural>`, `get:<plural>`).
    pub fn calls(&self, op: &str) -> usize {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).get(op).copied().unwrap_or(0)
    }

    fn count(&self, op: &str, resource: Option<&ResourceType>) {
        let mut calls = self.calls.lock().unwrap_or_else(|e| e.into_inner());
        *calls.entry(op.to_string()).or_default() += 1;
        if let Some(r) = resource {
            *calls.entry(format!("{}:{}", op, r.plural)).or_default() += 1;
        }
    }

    fn check_failing(&self, resource: &ResourceType) -> ClusterResult<()> {
        if self.failing.read().unwrap_or_else(|e| e.into_inner()).contains(&key(resource)) {
            return Err(ClusterError::Api { code: 500, message: format!("injected failure for {}", resource.plural) });
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl ClusterAccess for MemoryCluster {
    async fn list(&self, resource: &ResourceType) -> ClusterResult<Vec<Value>> {
        self.count("list", Some(resource));
        self.check_failing(resource)?;
        let objects = self.objects.read().unwrap_or_else(|e| e.into_inner());
        match objects.get(&key(resource)) {
            Some(items) => Ok(items.clone()),
            None => Err(ClusterError::NotFound(format!(
                "the server could not find the requested resource ({})",
                resource.plural
            ))),
        }
    }

    async fn get(&self, resource: &ResourceType, namespace: Option<&str>, name: &str) -> ClusterResult<Value> {
        self.count("get", Some(resource));
        self.check_failing(resource)?;
        let objects = self.objects.read().unwrap_or_else(|e| e.into_inner());
        objects
            .get(&key(resource))
            .and_then(|items| items.iter().find(|o| o.name() == Some(name) && o.namespace() == namespace))
            .cloned()
            .ok_or_else(|| ClusterError::NotFound(format!("{} \"{}\" not found", resource.plural, name)))
    }

    async fn list_events(&self, filter: &EventFilter) -> ClusterResult<Vec<Value>> {
        self.count("events", None);
        let events = self.events.read().unwrap_or_else(|e| e.into_inner());
        Ok(events.iter().filter(|e| filter.matches(e)).cloned().collect())
    }

    async fn server_group_versions(&self) -> ClusterResult<Vec<String>> {
        self.count("discovery", None);
        self.group_versions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or_else(|| ClusterError::Transport("discovery unavailable".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn buckets() -> ResourceType {
        ResourceType::new("s3.aws.upbound.io", "v1beta1", "Bucket", "buckets")
    }

    #[tokio::test]
    async fn get_respects_scope() {
        let c = MemoryCluster::new();
        c.insert(&buckets(), json!({ "metadata": { "name": "b1" } }));
        c.insert(&buckets(), json!({ "metadata": { "name": "b2", "namespace": "team-a" } }));

        assert!(c.get(&buckets(), None, "b1").await.is_ok());
        assert!(c.get(&buckets(), None, "b2").await.unwrap_err().is_not_found());
        assert_eq!(c.get(&buckets(), Some("team-a"), "b2").await.unwrap()["kind"], "Bucket");
        assert_eq!(c.list(&buckets()).await.unwrap().len(), 2);
        assert_eq!(c.calls("get"), 3);
        assert_eq!(c.calls("list:buckets"), 1);
    }

    #[tokio::test]
    async fn unknown_plural_and_injected_failures() {
        let c = MemoryCluster::new();
        let wrong = ResourceType::new("s3.aws.upbound.io", "v1beta1", "Bucket", "bucketz");
        assert!(c.list(&wrong).await.unwrap_err().is_not_found());
        c.register(&wrong);
        assert!(c.list(&wrong).await.unwrap().is_empty());

        c.insert(&buckets(), json!({ "metadata": { "name": "b1" } }));
        c.fail(&buckets());
        assert!(matches!(c.list(&buckets()).await, Err(ClusterError::Api { code: 500, .. })));
    }

    #[tokio::test]
    async fn discovery_fails_until_configured() {
        let c = MemoryCluster::new();
        assert!(c.server_group_versions().await.is_err());
        c.set_group_versions(Some(vec!["apiextensions.crossplane.io/v1".into()]));
        assert_eq!(c.server_group_versions().await.unwrap(), vec!["apiextensions.crossplane.io/v1".to_string()]);
    }
}
