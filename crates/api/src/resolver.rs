use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use kplane_core::json::found_condition;
use kplane_core::{
    found_false, stamp_reference, FoundReason, ObjectRef, ResourceType, ValueExt, APIEXT_GROUP, COMPOSITION_KIND,
    PROVIDER_CONFIG_KIND,
};
use kplane_kubehub::ClusterAccess;
use kplane_schema::providers::DEFAULT_RULES;
use kplane_schema::{classify, claim_xrd, composite_xrd, Crd, ProviderIndex, RefClass, XrdClient};
use metrics::histogram;
use serde_json::Value;
use tracing::{debug, info};

use crate::{Caches, PlaneError, PlaneResult, RequestScope, ResolverConfig};

/// CRD whose presence means Crossplane is installed.
const PROVIDER_CRD: &str = "providers.pkg.crossplane.io";

/// In-process resolver of Crossplane object graphs.
///
/// Owns the process-wide caches; their janitor runs from construction until [`shutdown`](Self::shutdown).
pub struct GraphResolver {
    cluster: Arc<dyn ClusterAccess>,
    xrds: XrdClient,
    caches: Caches,
    config: ResolverConfig,
}

fn attach(obj: &mut Value, key: &str, value: Value) {
    if let Some(map) = obj.as_object_mut() {
        map.insert(key.to_string(), value);
    }
}

fn unnamed_marker(reference: &ObjectRef) -> Option<Value> {
    reference.is_unnamed().then(|| found_false(reference, FoundReason::NameIsEmpty, "name is empty"))
}

/// A reference without a name, or an empty reference list.
fn is_unset(v: &Value) -> bool {
    match v {
        Value::Null => true,
        Value::Array(items) => items.is_empty(),
        Value::Object(_) => v.non_empty_at(&["name"]).is_none(),
        _ => false,
    }
}

/// Reference field read from the v1 location (`spec.<field>`), then the v2 one
/// (`spec.crossplane.<field>`) when the v1 value is absent or unset.
fn spec_field<'v>(obj: &'v Value, field: &str) -> Option<&'v Value> {
    let v1 = obj.at(&["spec", field]);
    let v2 = obj.at(&["spec", "crossplane", field]);
    match (v1, v2) {
        (Some(a), Some(b)) if is_unset(a) && !is_unset(b) => Some(b),
        (Some(a), _) => Some(a),
        (None, b) => b,
    }
}

impl GraphResolver {
    /// Must be called inside a tokio runtime.
    pub fn new(cluster: Arc<dyn ClusterAccess>, config: ResolverConfig) -> Self {
        let caches = Caches::start(&config);
        let xrds = XrdClient::new(cluster.clone());
        Self { cluster, xrds, caches, config }
    }

    pub fn cluster(&self) -> &dyn ClusterAccess { self.cluster.as_ref() }

    pub fn config(&self) -> &ResolverConfig { &self.config }

    pub fn xrd_client(&self) -> &XrdClient { &self.xrds }

    pub fn caches(&self) -> &Caches { &self.caches }

    /// Stop background work. Requests still in flight complete normally.
    pub fn shutdown(&self) {
        self.caches.shutdown();
    }

    /// Fetch one object by reference.
    ///
    /// An unnamed reference yields a `NameIsEmpty` marker without any upstream call. A failed
    /// fetch yields a `FailedToGet` marker unless `primary`, in which case the error propagates.
    pub async fn get_object(&self, scope: &RequestScope<'_>, reference: &ObjectRef, primary: bool) -> PlaneResult<Value> {
        if let Some(marker) = unnamed_marker(reference) {
            return Ok(marker);
        }
        let resource = scope.resource_type(reference).await;
        self.fetch(&resource, reference, primary).await
    }

    async fn fetch(&self, resource: &ResourceType, reference: &ObjectRef, primary: bool) -> PlaneResult<Value> {
        if let Some(marker) = unnamed_marker(reference) {
            return Ok(marker);
        }
        match self.cluster.get(resource, reference.namespace.as_deref(), &reference.name).await {
            Ok(mut obj) => {
                stamp_reference(&mut obj, reference);
                Ok(obj)
            }
            Err(e) if primary => Err(e.into()),
            Err(e) => {
                debug!(reference = %reference, error = %e, "resolve: link unavailable");
                Ok(found_false(reference, FoundReason::FailedToGet, &e.to_string()))
            }
        }
    }

    async fn link(&self, scope: &RequestScope<'_>, reference: &ObjectRef) -> Value {
        match self.get_object(scope, reference, false).await {
            Ok(v) => v,
            Err(e) => found_false(reference, FoundReason::FailedToGet, e.message()),
        }
    }

    async fn link_typed(&self, resource: &ResourceType, reference: &ObjectRef) -> Value {
        match self.fetch(resource, reference, false).await {
            Ok(v) => v,
            Err(e) => found_false(reference, FoundReason::FailedToGet, e.message()),
        }
    }

    /// Primary fetch for kinds whose scope is not known up front: cluster scope first, then each
    /// probe namespace in order. When every attempt fails the first error is returned.
    async fn get_probing(&self, scope: &RequestScope<'_>, reference: &ObjectRef) -> PlaneResult<Value> {
        if let Some(marker) = unnamed_marker(reference) {
            return Ok(marker);
        }
        let resource = scope.resource_type(reference).await;
        let first = self.fetch(&resource, reference, true).await;
        if reference.namespace.is_some() {
            return first;
        }
        let err = match first {
            Ok(v) => return Ok(v),
            Err(e) => e,
        };
        for ns in self.config.probe_order() {
            let probe = reference.clone().with_namespace(Some(ns));
            if let Ok(v) = self.fetch(&resource, &probe, true).await {
                debug!(reference = %reference, namespace = ns, "resolve: found by namespace probe");
                return Ok(v);
            }
        }
        Err(err)
    }

    /// Provider→CRD index, served from the definition cache.
    pub async fn definitions(&self) -> PlaneResult<Arc<ProviderIndex>> {
        self.caches
            .definitions
            .get_or_try_insert_with((), || async {
                let t0 = Instant::now();
                let (providers, crds) = tokio::join!(self.cluster.list_providers(), self.cluster.list_crds());
                let (providers, crds) = (providers?, crds?);
                let index = ProviderIndex::build(&providers, crds.into_iter().map(Crd::from_value).collect(), &DEFAULT_RULES);
                info!(providers = providers.len(), crds = index.len(), took_ms = %t0.elapsed().as_millis(), "api: provider index built");
                Ok::<_, PlaneError>(index)
            })
            .await
    }

    pub async fn crossplane_installed(&self) -> bool {
        match self.cluster.get_crd(PROVIDER_CRD).await {
            Ok(_) => true,
            Err(e) => {
                debug!(error = %e, "status: provider CRD not readable");
                false
            }
        }
    }

    pub(crate) async fn claim(&self, scope: &RequestScope<'_>, reference: &ObjectRef, full: bool) -> PlaneResult<Value> {
        let t0 = Instant::now();
        let mut claim = self.get_object(scope, reference, true).await?;
        if !full {
            return Ok(claim);
        }
        let xrds = scope.xrds_or_empty().await;
        let xr_ref = match spec_field(&claim, "resourceRef") {
            Some(r) => ObjectRef::from_value(r),
            // unset: a placeholder of the composite kind when the XRD is known
            None => match claim_xrd(&xrds, reference) {
                Some(x) => ObjectRef::new(&x.group, &x.served_version().unwrap_or_default(), &x.composite.kind, None, ""),
                None => ObjectRef::new(&reference.group, &reference.version, "", None, ""),
            },
        };
        let mut xr = self.link(scope, &xr_ref).await;
        if found_condition(&xr).is_none() {
            self.expand_composite(scope, &mut xr, false).await;
        }
        attach(&mut claim, "compositeResource", xr);
        let ms = t0.elapsed().as_secs_f64() * 1000.0;
        histogram!("kplane_resolve_full_ms", ms);
        info!(reference = %reference, took_ms = ms as u64, "api: claim resolved");
        Ok(claim)
    }

    pub(crate) async fn composite(&self, scope: &RequestScope<'_>, reference: &ObjectRef, full: bool) -> PlaneResult<Value> {
        let t0 = Instant::now();
        let mut xr = self.get_probing(scope, reference).await?;
        if full && found_condition(&xr).is_none() {
            self.expand_composite(scope, &mut xr, true).await;
            let ms = t0.elapsed().as_secs_f64() * 1000.0;
            histogram!("kplane_resolve_full_ms", ms);
            info!(reference = %reference, took_ms = ms as u64, "api: composite resolved");
        }
        Ok(xr)
    }

    /// Attach `claim` (when asked and declared), `parentXR`, `composition` and the composed
    /// resources split into `managedResources`, `managedResourcesXRs` and `managedResourcesClaims`.
    async fn expand_composite(&self, scope: &RequestScope<'_>, xr: &mut Value, with_claim: bool) {
        let xrds = scope.xrds_or_empty().await;
        let xrds = xrds.as_slice();
        let ns = xr.namespace().map(str::to_string);

        let claim_ref = if with_claim { spec_field(xr, "claimRef").map(ObjectRef::from_value) } else { None };
        let parent_ref = xr
            .owner_references()
            .iter()
            .map(ObjectRef::from_value)
            .find(|r| classify(xrds, r) != RefClass::Managed)
            .map(|r| r.with_namespace(ns.as_deref()));
        let composition_name = spec_field(xr, "compositionRef").and_then(|r| r.non_empty_at(&["name"])).unwrap_or("");
        let composition_ref = ObjectRef::new(APIEXT_GROUP, "v1", COMPOSITION_KIND, None, composition_name);
        let resource_refs: Vec<ObjectRef> = spec_field(xr, "resourceRefs")
            .and_then(Value::as_array)
            .map(|refs| refs.as_slice())
            .unwrap_or(&[])
            .iter()
            .map(ObjectRef::from_value)
            .map(|r| if r.namespace.is_none() { r.with_namespace(ns.as_deref()) } else { r })
            .collect();

        let claim_fut = async {
            match &claim_ref {
                Some(r) => Some(self.link(scope, r).await),
                None => None,
            }
        };
        let parent_fut = async {
            match &parent_ref {
                Some(r) => Some(self.link(scope, r).await),
                None => None,
            }
        };
        let compositions = ResourceType::compositions();
        let composition_fut = self.link_typed(&compositions, &composition_ref);
        let resources_fut = join_all(resource_refs.iter().map(|r| async move { (classify(xrds, r), self.link(scope, r).await) }));
        let (claim, parent, composition, resources) = tokio::join!(claim_fut, parent_fut, composition_fut, resources_fut);

        if let Some(claim) = claim {
            attach(xr, "claim", claim);
        }
        if let Some(parent) = parent {
            attach(xr, "parentXR", parent);
        }
        attach(xr, "composition", composition);
        let (mut managed, mut composites, mut claims) = (Vec::new(), Vec::new(), Vec::new());
        for (class, obj) in resources {
            match class {
                RefClass::Managed => managed.push(obj),
                RefClass::Composite => composites.push(obj),
                RefClass::Claim => claims.push(obj),
            }
        }
        attach(xr, "managedResources", Value::Array(managed));
        attach(xr, "managedResourcesXRs", Value::Array(composites));
        attach(xr, "managedResourcesClaims", Value::Array(claims));
    }

    pub(crate) async fn managed(&self, scope: &RequestScope<'_>, reference: &ObjectRef, full: bool) -> PlaneResult<Value> {
        let t0 = Instant::now();
        let mut mr = self.get_probing(scope, reference).await?;
        if !full || found_condition(&mr).is_some() {
            return Ok(mr);
        }
        let xrds = scope.xrds_or_empty().await;
        let ns = mr.namespace().map(str::to_string);
        let owners = mr.owner_references();
        let composite_ref = owners
            .iter()
            .find(|o| composite_xrd(&xrds, &ObjectRef::from_value(o)).is_some())
            .or_else(|| owners.iter().find(|o| o.bool_at(&["controller"]) == Some(true)))
            .map(|o| ObjectRef::from_value(o).with_namespace(ns.as_deref()));

        let composite_fut = async {
            match &composite_ref {
                Some(r) => Some(self.link(scope, r).await),
                None => None,
            }
        };
        let (composite, config) = tokio::join!(composite_fut, self.provider_config_link(&mr));
        if let Some(composite) = composite {
            attach(&mut mr, "composite", composite);
        }
        attach(&mut mr, "provConfig", config);
        let ms = t0.elapsed().as_secs_f64() * 1000.0;
        histogram!("kplane_resolve_full_ms", ms);
        info!(reference = %reference, took_ms = ms as u64, "api: managed resolved");
        Ok(mr)
    }

    /// The provider config named by `spec.providerConfigRef`, typed through the definition index.
    /// Falls back to a config kind in the managed resource's own group/version.
    async fn provider_config_link(&self, mr: &Value) -> Value {
        let mr_ref = ObjectRef::of_object(mr);
        let name = mr.str_at(&["spec", "providerConfigRef", "name"]).unwrap_or("");
        let config_kind = mr.non_empty_at(&["spec", "providerConfigRef", "kind"]).unwrap_or(PROVIDER_CONFIG_KIND);

        let typed = match self.definitions().await {
            Ok(index) => index
                .config_for(&mr_ref.group, &mr_ref.kind, config_kind)
                .and_then(|crd| crd.resource_type().map(|rt| (rt, crd.namespaced))),
            Err(e) => {
                debug!(error = %e, "resolve: provider index unavailable for config lookup");
                None
            }
        };
        let (resource, namespace) = match typed {
            Some((rt, namespaced)) => (rt, if namespaced { mr_ref.namespace.clone() } else { None }),
            None => (ResourceType::guessed(&mr_ref.group, &mr_ref.version, config_kind), None),
        };
        let reference = ObjectRef::new(&resource.group, &resource.version, &resource.kind, namespace.as_deref(), name);
        self.link_typed(&resource, &reference).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unset_v1_reference_falls_back_to_v2_location() {
        let xr = json!({ "spec": {
            "compositionRef": {},
            "resourceRefs": [],
            "claimRef": { "name": "db1" },
            "crossplane": {
                "compositionRef": { "name": "xdb-aws" },
                "resourceRefs": [{ "kind": "Bucket", "name": "b1" }],
                "claimRef": { "name": "other" }
            }
        }});
        assert_eq!(spec_field(&xr, "compositionRef").and_then(|r| r.str_at(&["name"])), Some("xdb-aws"));
        assert_eq!(spec_field(&xr, "resourceRefs").and_then(Value::as_array).map(Vec::len), Some(1));
        assert_eq!(spec_field(&xr, "claimRef").and_then(|r| r.str_at(&["name"])), Some("db1"));

        let v1_only = json!({ "spec": { "compositionRef": {} } });
        assert_eq!(spec_field(&v1_only, "compositionRef"), Some(&json!({})));
        assert_eq!(spec_field(&v1_only, "resourceRefs"), None);
    }
}
