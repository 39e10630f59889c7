use axum::extract::{Path, Query, State};
use kplane_api::Status;
use kplane_core::ObjectRef;
use kplane_kubehub::EventFilter;
use serde::Deserialize;
use serde_json::Value;

use crate::{items, AppState, HttpResult, Pretty};

#[derive(Debug, Default, Deserialize)]
pub struct Depth {
    full: Option<String>,
}

impl Depth {
    /// `?full`, `?full=true` and `?full=1` ask for the denormalized view.
    fn is_full(&self) -> bool {
        self.full.as_deref().is_some_and(|v| v != "false" && v != "0")
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct EventQuery {
    kind: Option<String>,
}

type ClusterPath = Path<(String, String, String, String)>;
type NamespacedPath = Path<(String, String, String, String, String)>;

fn cluster_ref((group, version, kind, name): (String, String, String, String)) -> ObjectRef {
    ObjectRef::new(&group, &version, &kind, None, &name)
}

fn namespaced_ref((group, version, kind, namespace, name): (String, String, String, String, String)) -> ObjectRef {
    ObjectRef::new(&group, &version, &kind, Some(&namespace), &name)
}

pub async fn status(State(api): State<AppState>) -> HttpResult<Pretty<Status>> {
    Ok(Pretty(api.status().await?))
}

pub async fn list_providers(State(api): State<AppState>) -> HttpResult<Pretty<Value>> {
    Ok(items(api.list_providers().await?))
}

pub async fn get_provider(State(api): State<AppState>, Path(name): Path<String>) -> HttpResult<Pretty<Value>> {
    Ok(Pretty(api.get_provider(&name).await?))
}

pub async fn provider_events(State(api): State<AppState>, Path(name): Path<String>) -> HttpResult<Pretty<Value>> {
    Ok(items(api.provider_events(&name).await?))
}

pub async fn provider_configs(State(api): State<AppState>, Path(name): Path<String>) -> HttpResult<Pretty<Value>> {
    Ok(items(api.list_provider_configs(&name).await?))
}

pub async fn get_provider_config(State(api): State<AppState>, Path(path): ClusterPath) -> HttpResult<Pretty<Value>> {
    Ok(Pretty(api.get_provider_config(cluster_ref(path)).await?))
}

pub async fn list_claims(State(api): State<AppState>) -> HttpResult<Pretty<Value>> {
    Ok(items(api.list_claims().await?))
}

pub async fn get_claim(
    State(api): State<AppState>,
    Path(path): NamespacedPath,
    Query(depth): Query<Depth>,
) -> HttpResult<Pretty<Value>> {
    Ok(Pretty(api.get_claim(namespaced_ref(path), depth.is_full()).await?))
}

pub async fn list_managed(State(api): State<AppState>) -> HttpResult<Pretty<Value>> {
    Ok(items(api.list_managed().await?))
}

pub async fn get_managed(
    State(api): State<AppState>,
    Path(path): ClusterPath,
    Query(depth): Query<Depth>,
) -> HttpResult<Pretty<Value>> {
    Ok(Pretty(api.get_managed(cluster_ref(path), depth.is_full()).await?))
}

pub async fn get_managed_namespaced(
    State(api): State<AppState>,
    Path(path): NamespacedPath,
    Query(depth): Query<Depth>,
) -> HttpResult<Pretty<Value>> {
    Ok(Pretty(api.get_managed(namespaced_ref(path), depth.is_full()).await?))
}

pub async fn list_managed_definitions(State(api): State<AppState>) -> HttpResult<Pretty<Value>> {
    Ok(items(api.list_managed_definitions().await?))
}

pub async fn list_composites(State(api): State<AppState>) -> HttpResult<Pretty<Value>> {
    Ok(items(api.list_composites().await?))
}

pub async fn get_composite(
    State(api): State<AppState>,
    Path(path): ClusterPath,
    Query(depth): Query<Depth>,
) -> HttpResult<Pretty<Value>> {
    Ok(Pretty(api.get_composite(cluster_ref(path), depth.is_full()).await?))
}

pub async fn get_composite_namespaced(
    State(api): State<AppState>,
    Path(path): NamespacedPath,
    Query(depth): Query<Depth>,
) -> HttpResult<Pretty<Value>> {
    Ok(Pretty(api.get_composite(namespaced_ref(path), depth.is_full()).await?))
}

pub async fn list_compositions(State(api): State<AppState>) -> HttpResult<Pretty<Value>> {
    Ok(items(api.list_compositions().await?))
}

pub async fn get_composition(State(api): State<AppState>, Path(name): Path<String>) -> HttpResult<Pretty<Value>> {
    Ok(Pretty(api.get_composition(&name).await?))
}

pub async fn list_xrds(State(api): State<AppState>) -> HttpResult<Pretty<Value>> {
    Ok(items(api.list_xrds().await?))
}

pub async fn get_xrd(State(api): State<AppState>, Path(name): Path<String>) -> HttpResult<Pretty<Value>> {
    Ok(Pretty(api.get_xrd(&name).await?))
}

pub async fn events(
    State(api): State<AppState>,
    Path(name): Path<String>,
    Query(q): Query<EventQuery>,
) -> HttpResult<Pretty<Value>> {
    Ok(items(api.list_events(EventFilter::new(&name, None, q.kind.as_deref())).await?))
}

pub async fn events_namespaced(
    State(api): State<AppState>,
    Path((namespace, name)): Path<(String, String)>,
    Query(q): Query<EventQuery>,
) -> HttpResult<Pretty<Value>> {
    Ok(items(api.list_events(EventFilter::new(&name, Some(&namespace), q.kind.as_deref())).await?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_flag_accepts_bare_key() {
        assert!(Depth { full: Some(String::new()) }.is_full());
        assert!(Depth { full: Some("true".into()) }.is_full());
        assert!(!Depth { full: Some("false".into()) }.is_full());
        assert!(!Depth::default().is_full());
    }
}
