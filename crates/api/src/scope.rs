use std::sync::Arc;

use kplane_core::{ObjectRef, ResourceType};
use kplane_kubehub::ClusterError;
use kplane_schema::{plural_for, Xrd, XrdClient};
use tokio::sync::OnceCell;
use tracing::warn;

use crate::GraphResolver;

/// State that lives for one API call: the XRD list, fetched at most once however many plural
/// lookups and reference classifications the call needs.
pub struct RequestScope<'a> {
    client: &'a XrdClient,
    xrds: OnceCell<Result<Arc<Vec<Xrd>>, ClusterError>>,
}

impl<'a> RequestScope<'a> {
    pub fn new(resolver: &'a GraphResolver) -> Self {
        Self { client: resolver.xrd_client(), xrds: OnceCell::new() }
    }

    /// The memoized XRD list; a failure is memoized too.
    pub async fn xrds(&self) -> Result<Arc<Vec<Xrd>>, ClusterError> {
        self.xrds
            .get_or_init(|| async {
                let res = self.client.list().await.map(Arc::new);
                if let Err(e) = &res {
                    warn!(error = %e, "scope: XRD list unavailable");
                }
                res
            })
            .await
            .clone()
    }

    /// XRD list for link resolution, where an unavailable list only weakens plural lookup and
    /// classification.
    pub async fn xrds_or_empty(&self) -> Arc<Vec<Xrd>> {
        self.xrds().await.unwrap_or_default()
    }

    pub async fn resource_type(&self, reference: &ObjectRef) -> ResourceType {
        let xrds = self.xrds_or_empty().await;
        let plural = plural_for(&xrds, &reference.kind, &reference.group);
        ResourceType::new(&reference.group, &reference.version, &reference.kind, &plural)
    }
}
