//! XRD access across schema versions.
//!
//! Clusters serve XRDs at `apiextensions.crossplane.io/v2`, `/v1` or both. The preference order is
//! discovered once per process; each call then walks it and falls back to the older version when
//! the newer one errors. Returned objects are annotated with the version they were read at.

use std::sync::Arc;

use kplane_core::{join_api_version, ValueExt, APIEXT_GROUP};
use kplane_kubehub::{ClusterAccess, ClusterError, ClusterResult};
use serde_json::{Map, Value};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::{version_cmp, Xrd};

pub const RETRIEVED_VERSION_ANNOTATION: &str = "kplane.io/retrieved-api-version";
pub const ORIGINAL_VERSION_ANNOTATION: &str = "kplane.io/original-api-version";
pub const V2_SCOPE_ANNOTATION: &str = "kplane.io/v2-scope";

/// Version every Crossplane release serves.
pub const BASELINE_VERSION: &str = "v1";

/// Order the XRD versions advertised by discovery, newest first by [`version_cmp`]. Falls back to
/// the baseline when the group is not advertised at all.
pub fn version_preference(group_versions: &[String]) -> Vec<String> {
    let mut advertised: Vec<String> = group_versions
        .iter()
        .filter_map(|gv| gv.strip_prefix(APIEXT_GROUP).and_then(|rest| rest.strip_prefix('/')))
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .collect();
    advertised.sort_by(|a, b| version_cmp(b, a));
    advertised.dedup();
    if advertised.is_empty() { vec![BASELINE_VERSION.to_string()] } else { advertised }
}

fn annotate(mut obj: Value, version: &str) -> Value {
    let original = obj.str_at(&["apiVersion"]).unwrap_or("").to_string();
    let scope = obj.str_at(&["spec", "scope"]).map(str::to_string);
    let Some(map) = obj.as_object_mut() else { return obj };
    let meta = map.entry("metadata").or_insert_with(|| Value::Object(Map::new()));
    let Some(meta) = meta.as_object_mut() else { return obj };
    let annotations = meta.entry("annotations").or_insert_with(|| Value::Object(Map::new()));
    if let Some(annotations) = annotations.as_object_mut() {
        annotations.insert(RETRIEVED_VERSION_ANNOTATION.into(), Value::String(join_api_version(APIEXT_GROUP, version)));
        if version == "v2" {
            annotations.insert(ORIGINAL_VERSION_ANNOTATION.into(), Value::String(original));
            if let Some(scope) = scope {
                annotations.insert(V2_SCOPE_ANNOTATION.into(), Value::String(scope));
            }
        }
    }
    obj
}

pub struct XrdClient {
    cluster: Arc<dyn ClusterAccess>,
    preference: OnceCell<Vec<String>>,
}

impl XrdClient {
    pub fn new(cluster: Arc<dyn ClusterAccess>) -> Self {
        Self { cluster, preference: OnceCell::new() }
    }

    /// Discovered version order. A failed discovery is not retried; the baseline is used for the
    /// rest of the process.
    pub async fn preference(&self) -> &[String] {
        self.preference
            .get_or_init(|| async {
                match self.cluster.server_group_versions().await {
                    Ok(gvs) => {
                        let pref = version_preference(&gvs);
                        info!(versions = ?pref, "xrd: schema versions discovered");
                        pref
                    }
                    Err(e) => {
                        warn!(error = %e, "xrd: discovery failed; using {}", BASELINE_VERSION);
                        vec![BASELINE_VERSION.to_string()]
                    }
                }
            })
            .await
    }

    pub async fn list(&self) -> ClusterResult<Vec<Xrd>> {
        let mut last = None;
        for version in self.preference().await {
            match self.cluster.list_xrd_schemas(version).await {
                Ok(items) => return Ok(items.into_iter().map(|o| Xrd::from_value(annotate(o, version))).collect()),
                Err(e) => {
                    debug!(version = %version, error = %e, "xrd: list failed; trying next version");
                    last = Some(e);
                }
            }
        }
        Err(last.unwrap_or_else(|| ClusterError::NotFound("no XRD schema version available".into())))
    }

    /// A missing XRD is missing at every version, so not-found ends the walk.
    pub async fn get(&self, name: &str) -> ClusterResult<Xrd> {
        let mut last = None;
        for version in self.preference().await {
            match self.cluster.get_xrd_schema(version, name).await {
                Ok(obj) => return Ok(Xrd::from_value(annotate(obj, version))),
                Err(e) if e.is_not_found() => return Err(e),
                Err(e) => {
                    debug!(version = %version, name, error = %e, "xrd: get failed; trying next version");
                    last = Some(e);
                }
            }
        }
        Err(last.unwrap_or_else(|| ClusterError::NotFound(format!("compositeresourcedefinitions \"{}\" not found", name))))
    }
}
