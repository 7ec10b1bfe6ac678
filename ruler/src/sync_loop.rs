//! Sync Loop: the periodic tick that drives everything else. Fetches
//! rule groups from the store, shard-filters them through the ring, and
//! reconciles the evaluator registry.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use ruler_api::{RuleGroupList, ShardKey, TenantId};
use tokio_util::sync::CancellationToken;

use crate::metrics;
use crate::registry::EvaluatorRegistry;
use crate::ring::{owned, Ring};
use crate::rule_store::RuleStore;

pub struct SyncLoop {
    store: Arc<dyn RuleStore>,
    ring: Option<Arc<dyn Ring>>,
    registry: Arc<EvaluatorRegistry>,
    poll_interval: Duration,
}

impl SyncLoop {
    pub fn new(
        store: Arc<dyn RuleStore>,
        ring: Option<Arc<dyn Ring>>,
        registry: Arc<EvaluatorRegistry>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            store,
            ring,
            registry,
            poll_interval,
        }
    }

    /// Runs the startup tick immediately, then one tick per `poll_interval`
    /// until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) {
        self.tick().await;
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.tick().await; // consume the immediate first tick
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => self.tick().await,
            }
        }
    }

    /// One sync-loop iteration.
    ///
    /// Step 1: fetch. On failure, log and leave the registry untouched.
    /// Step 2: per tenant, shard-filter (aborting the whole tick on any
    /// ring error) and reconcile via `EnsureUpdated` (per-tenant errors are
    /// logged, not fatal to the tick).
    /// Step 3: drop tenants absent from this poll.
    #[tracing::instrument(skip_all)]
    pub async fn tick(&self) {
        let started = std::time::Instant::now();

        let configs = match self.store.list_all_rule_groups().await {
            Ok(configs) => configs,
            Err(e) => {
                tracing::warn!(error = %e, "rule store fetch failed, skipping tick");
                metrics::SYNC_LOOP_DURATION_SECONDS
                    .with_label_values(&["store_error"])
                    .observe(started.elapsed().as_secs_f64());
                return;
            }
        };

        let mut seen = HashSet::with_capacity(configs.len());
        for (tenant, groups) in &configs {
            seen.insert(tenant.clone());

            let filtered = match self.shard_filter(tenant, groups).await {
                Ok(filtered) => filtered,
                Err(()) => {
                    // Ring error: abort the entire tick.
                    metrics::SYNC_LOOP_DURATION_SECONDS
                        .with_label_values(&["ring_error"])
                        .observe(started.elapsed().as_secs_f64());
                    return;
                }
            };

            if let Err(e) = self.registry.ensure_updated(tenant, &filtered).await {
                tracing::warn!(
                    tenant = %tenant.as_str(),
                    error = %e,
                    "failed to reconcile tenant this tick"
                );
            }
        }

        self.registry.reconcile(&seen).await;

        metrics::SYNC_LOOP_DURATION_SECONDS
            .with_label_values(&["ok"])
            .observe(started.elapsed().as_secs_f64());
    }

    /// Retains only the groups this replica owns. With no ring configured
    /// (sharding disabled), every group is retained.
    ///
    /// Returns `Err(())` on a ring failure: the caller must abort the
    /// whole tick rather than act on a partial ownership view.
    async fn shard_filter(
        &self,
        tenant: &TenantId,
        groups: &RuleGroupList,
    ) -> Result<RuleGroupList, ()> {
        let Some(ring) = &self.ring else {
            return Ok(groups.clone());
        };

        let mut filtered = Vec::with_capacity(groups.len());
        for group in groups {
            let key = ShardKey::compute(tenant, &group.namespace, &group.name);
            match owned(ring.as_ref(), key).await {
                Ok(true) => filtered.push(group.clone()),
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(
                        tenant = %tenant.as_str(),
                        shard_key = %key,
                        error = %e,
                        "ring ownership check failed, aborting tick"
                    );
                    metrics::record_ring_check_error();
                    return Err(());
                }
            }
        }
        Ok(filtered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluator::test_double::{NullQueryable, RecordingPusher, ScriptedEngine};
    use crate::mapper::FileMapper;
    use crate::notifier::NotifierPool;
    use crate::ring::test_double::InMemoryRing;
    use crate::rule_store::test_double::InMemoryRuleStore;
    use ruler_api::{NotifierConfig, Rule, RuleGroup};
    use std::collections::HashMap;

    fn group(tenant: &str, namespace: &str, name: &str) -> RuleGroup {
        RuleGroup {
            tenant: TenantId::new(tenant),
            namespace: namespace.to_string(),
            name: name.to_string(),
            interval: None,
            rules: vec![Rule::Recording {
                record: "job:up".to_string(),
                expr: "up".to_string(),
                labels: HashMap::new(),
            }],
        }
    }

    fn registry(root: &camino::Utf8Path) -> Arc<EvaluatorRegistry> {
        let mapper = Arc::new(FileMapper::new(root.to_path_buf()));
        let notifiers = Arc::new(
            NotifierPool::new(NotifierConfig {
                alertmanager_url: vec!["http://alertmanager:9093".to_string()],
                ..Default::default()
            })
            .unwrap(),
        );
        Arc::new(EvaluatorRegistry::new(
            mapper,
            notifiers,
            Arc::new(ScriptedEngine::new()),
            Arc::new(NullQueryable),
            Arc::new(RecordingPusher::new()),
            Duration::from_secs(60),
        ))
    }

    #[tokio::test]
    async fn sharding_on_single_replica_owns_everything() {
        let dir = camino_tempfile::tempdir().unwrap();
        let store = Arc::new(InMemoryRuleStore::new());
        store.set(HashMap::from([
            (TenantId::new("a"), vec![group("a", "ns", "g1")]),
            (TenantId::new("b"), vec![group("b", "ns", "g1")]),
        ]));
        let ring: Arc<dyn Ring> = Arc::new(InMemoryRing::single("self:9090"));
        let registry = registry(dir.path());

        let sync = SyncLoop::new(store, Some(ring), registry.clone(), Duration::from_secs(60));
        sync.tick().await;

        let mut tenants = registry.tenants().await;
        tenants.sort();
        assert_eq!(tenants, vec![TenantId::new("a"), TenantId::new("b")]);
    }

    #[tokio::test]
    async fn sharding_on_group_not_owned_is_excluded() {
        let dir = camino_tempfile::tempdir().unwrap();
        let store = Arc::new(InMemoryRuleStore::new());
        store.set(HashMap::from([(
            TenantId::new("a"),
            vec![group("a", "ns", "g1")],
        )]));
        let ring_impl = InMemoryRing::new(
            "self:9090",
            vec!["self:9090".into(), "p2:9090".into()],
        );
        let key = ShardKey::compute(&TenantId::new("a"), "ns", "g1");
        ring_impl.assign(key, "p2:9090");
        let ring: Arc<dyn Ring> = Arc::new(ring_impl);
        let registry = registry(dir.path());

        let sync = SyncLoop::new(store, Some(ring), registry.clone(), Duration::from_secs(60));
        sync.tick().await;

        assert!(registry.tenants().await.is_empty());
    }

    #[tokio::test]
    async fn tenant_absent_from_poll_is_dropped() {
        let dir = camino_tempfile::tempdir().unwrap();
        let store = Arc::new(InMemoryRuleStore::new());
        store.set(HashMap::from([
            (TenantId::new("a"), vec![group("a", "ns", "g1")]),
            (TenantId::new("b"), vec![group("b", "ns", "g1")]),
        ]));
        let registry = registry(dir.path());
        let sync = SyncLoop::new(store.clone(), None, registry.clone(), Duration::from_secs(60));
        sync.tick().await;
        assert_eq!(registry.tenants().await.len(), 2);

        store.set(HashMap::from([(
            TenantId::new("a"),
            vec![group("a", "ns", "g1")],
        )]));
        sync.tick().await;
        assert_eq!(registry.tenants().await, vec![TenantId::new("a")]);
    }

    #[tokio::test]
    async fn ring_error_aborts_tick_without_partial_application() {
        let dir = camino_tempfile::tempdir().unwrap();
        let store = Arc::new(InMemoryRuleStore::new());
        store.set(HashMap::from([(
            TenantId::new("a"),
            vec![group("a", "ns", "g1")],
        )]));
        let ring_impl = InMemoryRing::single("self:9090");
        ring_impl.fail_on_call(0);
        let ring: Arc<dyn Ring> = Arc::new(ring_impl);
        let registry = registry(dir.path());

        let sync = SyncLoop::new(store, Some(ring), registry.clone(), Duration::from_secs(60));
        sync.tick().await;

        assert!(registry.tenants().await.is_empty());
    }

    #[tokio::test]
    async fn store_failure_leaves_registry_unchanged() {
        let dir = camino_tempfile::tempdir().unwrap();
        let store = Arc::new(InMemoryRuleStore::new());
        store.set(HashMap::from([(
            TenantId::new("a"),
            vec![group("a", "ns", "g1")],
        )]));
        let registry = registry(dir.path());
        let sync = SyncLoop::new(store.clone(), None, registry.clone(), Duration::from_secs(60));
        sync.tick().await;
        assert_eq!(registry.tenants().await.len(), 1);

        store.fail_next_fetch();
        sync.tick().await;
        assert_eq!(registry.tenants().await.len(), 1);
    }
}
