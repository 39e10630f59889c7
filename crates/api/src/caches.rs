use std::sync::Arc;
use std::time::Duration;

use kplane_schema::ProviderIndex;
use kplane_store::{spawn_janitor, Sweep, TtlCache};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::ResolverConfig;

/// The two process-wide caches and the janitor that evicts them.
///
/// Both are keyed by `()`: there is one cluster, so an entry is either fresh or absent. The janitor
/// starts with the caches and stops on [`shutdown`](Self::shutdown) or drop.
pub struct Caches {
    /// Provider→CRD index, from which managed resource definitions are derived.
    pub definitions: Arc<TtlCache<(), ProviderIndex>>,
    /// Flattened managed resource instances across all managed kinds.
    pub instances: Arc<TtlCache<(), Vec<Value>>>,
    cancel: CancellationToken,
}

impl Caches {
    /// Must be called inside a tokio runtime.
    pub fn start(config: &ResolverConfig) -> Self {
        let definitions = Arc::new(TtlCache::new("definitions", config.definition_ttl));
        let instances = Arc::new(TtlCache::new("instances", config.instance_ttl));
        let cancel = CancellationToken::new();
        let period = config.instance_ttl.min(config.definition_ttl).max(Duration::from_secs(1));
        spawn_janitor(
            vec![definitions.clone() as Arc<dyn Sweep>, instances.clone() as Arc<dyn Sweep>],
            period,
            cancel.clone(),
        );
        info!(period_secs = period.as_secs(), "caches: janitor started");
        Self { definitions, instances, cancel }
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

impl Drop for Caches {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
