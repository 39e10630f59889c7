//! kplane kubehub – the cluster access facade.
//!
//! Everything above this crate sees the cluster through [`ClusterAccess`]: list and get of
//! dynamically typed objects, plus a handful of typed conveniences for the Crossplane core kinds
//! whose schema is fixed. [`KubeCluster`] talks to a real API server; [`MemoryCluster`] is an
//! in-memory stand-in used by tests.

#![forbid(unsafe_code)]

use std::future::Future;
use std::time::Duration;

use k8s_openapi::api::core::v1::Event;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1 as apiextv1;
use kplane_core::{ResourceType, ValueExt};
use kube::{
    api::{Api, ListParams},
    core::{ApiResource, DynamicObject, GroupVersionKind},
    Client, Config,
};
use metrics::counter;
use serde_json::Value;
use tracing::{debug, info};

pub mod memory;

pub use memory::MemoryCluster;

/// Errors returned by the facade. They describe the upstream call, not what the caller does with it.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ClusterError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("api error {code}: {message}")]
    Api { code: u16, message: String },
    #[error("upstream call timed out after {0:?}")]
    Timeout(Duration),
    #[error("transport: {0}")]
    Transport(String),
    #[error("decode: {0}")]
    Decode(String),
}

impl ClusterError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ClusterError::NotFound(_))
    }
}

impl From<kube::Error> for ClusterError {
    fn from(e: kube::Error) -> Self {
        match e {
            kube::Error::Api(resp) if resp.code == 404 => ClusterError::NotFound(resp.message),
            kube::Error::Api(resp) => ClusterError::Api { code: resp.code, message: resp.message },
            kube::Error::SerdeError(e) => ClusterError::Decode(e.to_string()),
            other => ClusterError::Transport(other.to_string()),
        }
    }
}

pub type ClusterResult<T> = Result<T, ClusterError>;

/// Failure to build a cluster connection at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    /// Neither in-cluster config nor a kubeconfig could be loaded.
    #[error("no Kubernetes cluster connection possible: {0}")]
    NotConfigured(String),
    #[error("building kube client: {0}")]
    Client(String),
}

/// Event query keyed by the involved object.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventFilter {
    pub name: String,
    pub namespace: Option<String>,
    pub kind: Option<String>,
}

impl EventFilter {
    pub fn new(name: &str, namespace: Option<&str>, kind: Option<&str>) -> Self {
        Self {
            name: name.to_string(),
            namespace: namespace.filter(|s| !s.is_empty()).map(str::to_string),
            kind: kind.filter(|s| !s.is_empty()).map(str::to_string),
        }
    }

    /// API server field selector over `involvedObject.*`.
    pub fn field_selector(&self) -> String {
        let mut parts = vec![format!("involvedObject.name={}", self.name)];
        if let Some(ns) = &self.namespace {
            parts.push(format!("involvedObject.namespace={}", ns));
        }
        if let Some(kind) = &self.kind {
            parts.push(format!("involvedObject.kind={}", kind));
        }
        parts.join(",")
    }

    /// Client-side equivalent of [`field_selector`](Self::field_selector).
    pub fn matches(&self, event: &Value) -> bool {
        let involved = |k: &str| event.str_at(&["involvedObject", k]);
        involved("name") == Some(self.name.as_str())
            && self.namespace.as_deref().map_or(true, |ns| involved("namespace") == Some(ns))
            && self.kind.as_deref().map_or(true, |k| involved("kind") == Some(k))
    }
}

/// Read-only access to the cluster.
///
/// Typed conveniences default to the generic calls with the fixed resource types of the
/// Crossplane core kinds; implementations may override them with typed clients.
#[async_trait::async_trait]
pub trait ClusterAccess: Send + Sync {
    /// List every instance of `resource`, across all namespaces when it is namespaced.
    async fn list(&self, resource: &ResourceType) -> ClusterResult<Vec<Value>>;

    /// Fetch exactly one object. `namespace = None` addresses the cluster scope.
    async fn get(&self, resource: &ResourceType, namespace: Option<&str>, name: &str) -> ClusterResult<Value>;

    async fn list_events(&self, filter: &EventFilter) -> ClusterResult<Vec<Value>>;

    /// `group/version` strings the API server serves.
    async fn server_group_versions(&self) -> ClusterResult<Vec<String>>;

    async fn list_providers(&self) -> ClusterResult<Vec<Value>> {
        self.list(&ResourceType::providers()).await
    }

    async fn list_compositions(&self) -> ClusterResult<Vec<Value>> {
        self.list(&ResourceType::compositions()).await
    }

    async fn get_composition(&self, name: &str) -> ClusterResult<Value> {
        self.get(&ResourceType::compositions(), None, name).await
    }

    async fn list_xrd_schemas(&self, version: &str) -> ClusterResult<Vec<Value>> {
        self.list(&ResourceType::xrds(version)).await
    }

    async fn get_xrd_schema(&self, version: &str, name: &str) -> ClusterResult<Value> {
        self.get(&ResourceType::xrds(version), None, name).await
    }

    async fn list_crds(&self) -> ClusterResult<Vec<Value>> {
        self.list(&ResourceType::crds()).await
    }

    async fn get_crd(&self, name: &str) -> ClusterResult<Value> {
        self.get(&ResourceType::crds(), None, name).await
    }
}

fn strip_managed_fields(v: &mut Value) {
    if let Some(meta) = v.get_mut("metadata") {
        if let Some(obj) = meta.as_object_mut() {
            obj.remove("managedFields");
        }
    }
}

/// List items of dynamic lists do not always carry their type meta; fill it in.
fn with_type_meta(mut v: Value, resource: &ResourceType) -> Value {
    strip_managed_fields(&mut v);
    if let Some(map) = v.as_object_mut() {
        if !map.contains_key("apiVersion") {
            map.insert("apiVersion".into(), Value::String(resource.api_version()));
        }
        if !map.contains_key("kind") {
            map.insert("kind".into(), Value::String(resource.kind.clone()));
        }
    }
    v
}

fn to_value<T: serde::Serialize>(obj: &T) -> ClusterResult<Value> {
    serde_json::to_value(obj).map_err(|e| ClusterError::Decode(e.to_string()))
}

/// Facade over a live API server via kube-rs dynamic objects.
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
    timeout: Duration,
}

impl KubeCluster {
    pub fn new(client: Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    /// Infer configuration (in-cluster first, then kubeconfig) and build a client.
    pub async fn connect(timeout: Duration) -> Result<Self, ConnectError> {
        let mut config = Config::infer().await.map_err(|e| ConnectError::NotConfigured(e.to_string()))?;
        config.read_timeout = Some(timeout);
        info!(cluster_url = %config.cluster_url, "kube config inferred");
        let client = Client::try_from(config).map_err(|e| ConnectError::Client(e.to_string()))?;
        Ok(Self::new(client, timeout))
    }

    fn dynamic_api(&self, resource: &ResourceType, namespace: Option<&str>) -> Api<DynamicObject> {
        let gvk = GroupVersionKind::gvk(&resource.group, &resource.version, &resource.kind);
        let ar = ApiResource::from_gvk_with_plural(&gvk, &resource.plural);
        match namespace {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, &ar),
            None => Api::all_with(self.client.clone(), &ar),
        }
    }

    async fn bounded<T, F>(&self, op: &'static str, fut: F) -> ClusterResult<T>
    where
        F: Future<Output = Result<T, kube::Error>> + Send,
    {
        counter!("kplane_upstream_calls_total", 1u64, "op" => op);
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(res) => res.map_err(ClusterError::from),
            Err(_) => Err(ClusterError::Timeout(self.timeout)),
        }
    }
}

#[async_trait::async_trait]
impl ClusterAccess for KubeCluster {
    async fn list(&self, resource: &ResourceType) -> ClusterResult<Vec<Value>> {
        let api = self.dynamic_api(resource, None);
        let list = self.bounded("list", api.list(&ListParams::default())).await?;
        debug!(gvk = %resource.gvk_key(), plural = %resource.plural, count = list.items.len(), "kube: list");
        list.items.iter().map(|o| to_value(o).map(|v| with_type_meta(v, resource))).collect()
    }

    async fn get(&self, resource: &ResourceType, namespace: Option<&str>, name: &str) -> ClusterResult<Value> {
        let api = self.dynamic_api(resource, namespace);
        let obj = self.bounded("get", api.get(name)).await?;
        debug!(gvk = %resource.gvk_key(), ns = ?namespace, name, "kube: get");
        to_value(&obj).map(|v| with_type_meta(v, resource))
    }

    async fn list_events(&self, filter: &EventFilter) -> ClusterResult<Vec<Value>> {
        let api: Api<Event> = match &filter.namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        };
        let params = ListParams::default().fields(&filter.field_selector());
        let list = self.bounded("events", api.list(&params)).await?;
        let resource = ResourceType::new("", "v1", "Event", "events");
        list.items.iter().map(|e| to_value(e).map(|v| with_type_meta(v, &resource))).collect()
    }

    async fn server_group_versions(&self) -> ClusterResult<Vec<String>> {
        let groups = self.bounded("discovery", self.client.list_api_groups()).await?;
        Ok(groups
            .groups
            .into_iter()
            .flat_map(|g| g.versions.into_iter().map(|v| v.group_version))
            .collect())
    }

    async fn list_crds(&self) -> ClusterResult<Vec<Value>> {
        let api: Api<apiextv1::CustomResourceDefinition> = Api::all(self.client.clone());
        let list = self.bounded("crds", api.list(&ListParams::default())).await?;
        list.items.iter().map(|crd| to_value(crd).map(|v| with_type_meta(v, &ResourceType::crds()))).collect()
    }

    async fn get_crd(&self, name: &str) -> ClusterResult<Value> {
        let api: Api<apiextv1::CustomResourceDefinition> = Api::all(self.client.clone());
        let crd = self.bounded("crd", api.get(name)).await?;
        to_value(&crd).map(|v| with_type_meta(v, &ResourceType::crds()))
    }
}
