//! kplane public API façade (in-process).
//!
//! [`PlaneApi`] is the read-only surface the HTTP projection depends on. [`GraphResolver`] is the
//! in-process implementation: it resolves Crossplane object graphs against a [`ClusterAccess`]
//! facade, with TTL caches for the expensive discovery steps.

#![forbid(unsafe_code)]

use std::time::{Duration, Instant};

use kplane_core::ObjectRef;
use kplane_kubehub::{ClusterError, ConnectError, EventFilter};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

mod caches;
mod listing;
mod resolver;
mod scope;

pub use caches::Caches;
pub use kplane_kubehub::ClusterAccess;
pub use resolver::GraphResolver;
pub use scope::RequestScope;

/// Namespaces tried, in order, when a composite or managed resource is requested without one and
/// the cluster-scoped lookup fails. Objects living elsewhere are not found this way.
pub const DEFAULT_PROBE_NAMESPACES: [&str; 5] = ["default", "crossplane-system", "kube-system", "vela-system", "vela-app-dev"];

/// API errors, mapped onto HTTP statuses by the server.
#[derive(Debug, Clone, thiserror::Error, Serialize, Deserialize, PartialEq, Eq)]
pub enum PlaneError {
    #[error("not_configured: {0}")]
    NotConfigured(String),
    #[error("not_found: {0}")]
    NotFound(String),
    #[error("fetch: {0}")]
    Fetch(String),
    #[error("validation: {0}")]
    Validation(String),
    #[error("internal: {0}")]
    Internal(String),
}

impl PlaneError {
    /// The message without the category prefix.
    pub fn message(&self) -> &str {
        match self {
            PlaneError::NotConfigured(m)
            | PlaneError::NotFound(m)
            | PlaneError::Fetch(m)
            | PlaneError::Validation(m)
            | PlaneError::Internal(m) => m,
        }
    }
}

impl From<ClusterError> for PlaneError {
    fn from(e: ClusterError) -> Self {
        match e {
            ClusterError::NotFound(m) => PlaneError::NotFound(m),
            other => PlaneError::Fetch(other.to_string()),
        }
    }
}

impl From<ConnectError> for PlaneError {
    fn from(e: ConnectError) -> Self {
        match e {
            ConnectError::NotConfigured(m) => PlaneError::NotConfigured(m),
            other => PlaneError::Internal(other.to_string()),
        }
    }
}

pub type PlaneResult<T> = Result<T, PlaneError>;

/// Resolver construction parameters. Nothing in this crate reads the environment.
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    pub definition_ttl: Duration,
    pub instance_ttl: Duration,
    /// Tried first when probing namespaces.
    pub namespace_hint: Option<String>,
    pub probe_namespaces: Vec<String>,
    /// Reported by `status` as the current version.
    pub version: String,
    pub analytics: bool,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            definition_ttl: Duration::from_secs(300),
            instance_ttl: Duration::from_secs(60),
            namespace_hint: None,
            probe_namespaces: DEFAULT_PROBE_NAMESPACES.iter().map(|s| s.to_string()).collect(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            analytics: false,
        }
    }
}

impl ResolverConfig {
    /// Probe order: the hint, then the defaults, without repeats.
    pub fn probe_order(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::with_capacity(self.probe_namespaces.len() + 1);
        for ns in self.namespace_hint.iter().chain(self.probe_namespaces.iter()) {
            if !ns.is_empty() && !out.contains(&ns.as_str()) {
                out.push(ns);
            }
        }
        out
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct Status {
    pub cur_ver: String,
    pub latest_ver: String,
    pub analytics: bool,
    pub crossplane_installed: bool,
}

/// Read-only Crossplane graph API.
#[async_trait::async_trait]
pub trait PlaneApi: Send + Sync {
    async fn status(&self) -> PlaneResult<Status>;

    async fn list_providers(&self) -> PlaneResult<Vec<Value>>;
    async fn get_provider(&self, name: &str) -> PlaneResult<Value>;
    async fn provider_events(&self, name: &str) -> PlaneResult<Vec<Value>>;
    /// Instances of every ProviderConfig kind indexed under `provider`.
    async fn list_provider_configs(&self, provider: &str) -> PlaneResult<Vec<Value>>;
    async fn get_provider_config(&self, reference: ObjectRef) -> PlaneResult<Value>;

    async fn list_claims(&self) -> PlaneResult<Vec<Value>>;
    async fn get_claim(&self, reference: ObjectRef, full: bool) -> PlaneResult<Value>;

    /// Managed resource instances across all managed kinds.
    async fn list_managed(&self) -> PlaneResult<Vec<Value>>;
    async fn get_managed(&self, reference: ObjectRef, full: bool) -> PlaneResult<Value>;
    /// Managed resource definitions (CRDs), config kinds excluded.
    async fn list_managed_definitions(&self) -> PlaneResult<Vec<Value>>;

    async fn list_composites(&self) -> PlaneResult<Vec<Value>>;
    async fn get_composite(&self, reference: ObjectRef, full: bool) -> PlaneResult<Value>;

    async fn list_compositions(&self) -> PlaneResult<Vec<Value>>;
    async fn get_composition(&self, name: &str) -> PlaneResult<Value>;

    async fn list_xrds(&self) -> PlaneResult<Vec<Value>>;
    async fn get_xrd(&self, name: &str) -> PlaneResult<Value>;

    /// Events for an involved object, newest first.
    async fn list_events(&self, filter: EventFilter) -> PlaneResult<Vec<Value>>;
}

fn require_kind(reference: &ObjectRef) -> PlaneResult<()> {
    if reference.kind.is_empty() || reference.version.is_empty() {
        return Err(PlaneError::Validation(format!("incomplete reference: {}", reference)));
    }
    Ok(())
}

#[async_trait::async_trait]
impl PlaneApi for GraphResolver {
    async fn status(&self) -> PlaneResult<Status> {
        let installed = self.crossplane_installed().await;
        Ok(Status {
            cur_ver: self.config().version.clone(),
            latest_ver: self.config().version.clone(),
            analytics: self.config().analytics,
            crossplane_installed: installed,
        })
    }

    async fn list_providers(&self) -> PlaneResult<Vec<Value>> {
        let t0 = Instant::now();
        let items = self.cluster().list_providers().await?;
        info!(count = items.len(), took_ms = %t0.elapsed().as_millis(), "api: list_providers ok");
        Ok(items)
    }

    async fn get_provider(&self, name: &str) -> PlaneResult<Value> {
        Ok(self.cluster().get(&kplane_core::ResourceType::providers(), None, name).await?)
    }

    async fn provider_events(&self, name: &str) -> PlaneResult<Vec<Value>> {
        self.events(&EventFilter::new(name, None, None)).await
    }

    async fn list_provider_configs(&self, provider: &str) -> PlaneResult<Vec<Value>> {
        let t0 = Instant::now();
        let items = self.provider_configs(provider).await?;
        info!(provider, count = items.len(), took_ms = %t0.elapsed().as_millis(), "api: list_provider_configs ok");
        Ok(items)
    }

    async fn get_provider_config(&self, reference: ObjectRef) -> PlaneResult<Value> {
        require_kind(&reference)?;
        let scope = RequestScope::new(self);
        self.get_object(&scope, &reference, true).await
    }

    async fn list_claims(&self) -> PlaneResult<Vec<Value>> {
        let t0 = Instant::now();
        let items = self.claims(&RequestScope::new(self)).await?;
        info!(count = items.len(), took_ms = %t0.elapsed().as_millis(), "api: list_claims ok");
        Ok(items)
    }

    async fn get_claim(&self, reference: ObjectRef, full: bool) -> PlaneResult<Value> {
        require_kind(&reference)?;
        self.claim(&RequestScope::new(self), &reference, full).await
    }

    async fn list_managed(&self) -> PlaneResult<Vec<Value>> {
        let t0 = Instant::now();
        let items = self.managed_instances().await?;
        info!(count = items.len(), took_ms = %t0.elapsed().as_millis(), "api: list_managed ok");
        Ok(items.as_ref().clone())
    }

    async fn get_managed(&self, reference: ObjectRef, full: bool) -> PlaneResult<Value> {
        require_kind(&reference)?;
        self.managed(&RequestScope::new(self), &reference, full).await
    }

    async fn list_managed_definitions(&self) -> PlaneResult<Vec<Value>> {
        let index = self.definitions().await?;
        Ok(index.managed_definitions().map(|c| c.raw.clone()).collect())
    }

    async fn list_composites(&self) -> PlaneResult<Vec<Value>> {
        let t0 = Instant::now();
        let items = self.composites(&RequestScope::new(self)).await?;
        info!(count = items.len(), took_ms = %t0.elapsed().as_millis(), "api: list_composites ok");
        Ok(items)
    }

    async fn get_composite(&self, reference: ObjectRef, full: bool) -> PlaneResult<Value> {
        require_kind(&reference)?;
        self.composite(&RequestScope::new(self), &reference, full).await
    }

    async fn list_compositions(&self) -> PlaneResult<Vec<Value>> {
        Ok(self.cluster().list_compositions().await?)
    }

    async fn get_composition(&self, name: &str) -> PlaneResult<Value> {
        Ok(self.cluster().get_composition(name).await?)
    }

    async fn list_xrds(&self) -> PlaneResult<Vec<Value>> {
        let xrds = self.xrd_client().list().await?;
        Ok(xrds.into_iter().map(|x| x.raw).collect())
    }

    async fn get_xrd(&self, name: &str) -> PlaneResult<Value> {
        Ok(self.xrd_client().get(name).await?.raw)
    }

    async fn list_events(&self, filter: EventFilter) -> PlaneResult<Vec<Value>> {
        self.events(&filter).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cluster_errors_keep_not_found_apart() {
        assert_eq!(PlaneError::from(ClusterError::NotFound("gone".into())), PlaneError::NotFound("gone".into()));
        let e = PlaneError::from(ClusterError::Timeout(Duration::from_secs(30)));
        assert!(matches!(e, PlaneError::Fetch(_)));
        assert_eq!(PlaneError::Validation("bad".into()).message(), "bad");
    }

    #[test]
    fn probe_order_puts_hint_first_without_repeats() {
        let cfg = ResolverConfig { namespace_hint: Some("crossplane-system".into()), ..Default::default() };
        assert_eq!(cfg.probe_order(), vec!["crossplane-system", "default", "kube-system", "vela-system", "vela-app-dev"]);
        assert_eq!(ResolverConfig::default().probe_order().len(), DEFAULT_PROBE_NAMESPACES.len());
    }

    #[test]
    fn status_uses_pascal_case_fields() {
        let s = Status { cur_ver: "1".into(), latest_ver: "1".into(), analytics: false, crossplane_installed: true };
        let v = serde_json::to_value(&s).unwrap();
        assert_eq!(v["CurVer"], "1");
        assert_eq!(v["CrossplaneInstalled"], true);
    }
}
