//! Evaluator Registry: one [`TenantEvaluator`] per active tenant,
//! created on first appearance in a poll, updated in place when the
//! mapper reports changed content, and stopped when a tenant disappears.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use camino::Utf8PathBuf;
use ruler_api::{RuleGroupDesc, RuleGroupList, TenantId};
use tokio::sync::Mutex;

use crate::error::RegistryError;
use crate::evaluator::{Engine, Pusher, Queryable, TenantEvaluator};
use crate::mapper::FileMapper;
use crate::metrics::TenantMetrics;
use crate::notifier::NotifierPool;

struct Entry {
    evaluator: Arc<TenantEvaluator>,
    rule_files: Vec<Utf8PathBuf>,
}

/// Guarded by a single mutex, held across the map-and-update sequence
/// so two concurrent polls for the same tenant cannot
/// race to overwrite files. The notifier pool's own lock, if acquired at
/// all in the course of a call here, is always acquired *after* this one
/// (lock ordering: registry → notifier-pool, never the reverse).
pub struct EvaluatorRegistry {
    mapper: Arc<FileMapper>,
    notifiers: Arc<NotifierPool>,
    engine: Arc<dyn Engine>,
    queryable: Arc<dyn Queryable>,
    pusher: Arc<dyn Pusher>,
    evaluation_interval: Duration,
    entries: Mutex<HashMap<TenantId, Entry>>,
}

impl EvaluatorRegistry {
    pub fn new(
        mapper: Arc<FileMapper>,
        notifiers: Arc<NotifierPool>,
        engine: Arc<dyn Engine>,
        queryable: Arc<dyn Queryable>,
        pusher: Arc<dyn Pusher>,
        evaluation_interval: Duration,
    ) -> Self {
        Self {
            mapper,
            notifiers,
            engine,
            queryable,
            pusher,
            evaluation_interval,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// `EnsureUpdated`: idempotent reconciliation for one tenant. Ensures an
    /// evaluator exists, maps `groups` to files, and reloads the evaluator
    /// from the new file set iff the mapper reports `changed`.
    pub async fn ensure_updated(
        &self,
        tenant: &TenantId,
        groups: &RuleGroupList,
    ) -> Result<(), RegistryError> {
        let mut entries = self.entries.lock().await;

        let (changed, filenames) =
            self.mapper
                .map_rules(tenant, groups)
                .await
                .map_err(|source| RegistryError::Mapping {
                    tenant: tenant.clone(),
                    source,
                })?;

        if !entries.contains_key(tenant) {
            let notifier = self.notifiers.notifier_for(tenant).map_err(|e| {
                RegistryError::InvalidNotifierConfig {
                    tenant: tenant.clone(),
                    reason: e.to_string(),
                }
            })?;
            let evaluator = TenantEvaluator::new(
                tenant.clone(),
                self.engine.clone(),
                self.queryable.clone(),
                self.pusher.clone(),
                notifier,
            );
            evaluator.start(self.evaluation_interval).await;
            entries.insert(
                tenant.clone(),
                Entry {
                    evaluator,
                    rule_files: Vec::new(),
                },
            );
        }

        let entry = entries.get_mut(tenant).expect("just inserted above");
        if changed {
            entry
                .evaluator
                .reload(&filenames, self.evaluation_interval)
                .await
                .map_err(|source| RegistryError::Reload {
                    tenant: tenant.clone(),
                    source,
                })?;
            TenantMetrics::new(tenant.clone()).record_config_update();
        }
        entry.rule_files = filenames;

        Ok(())
    }

    /// `DropTenant`: stop the evaluator and forget it. The tenant's
    /// notifier is deliberately left running.
    pub async fn drop_tenant(&self, tenant: &TenantId) {
        let removed = {
            let mut entries = self.entries.lock().await;
            entries.remove(tenant)
        };
        if let Some(entry) = removed {
            entry.evaluator.stop().await;
            TenantMetrics::forget(tenant);
        }
    }

    /// After a poll returning tenants `seen`, drop every registered tenant
    /// absent from it.
    pub async fn reconcile(&self, seen: &std::collections::HashSet<TenantId>) {
        let stale: Vec<TenantId> = {
            let entries = self.entries.lock().await;
            entries
                .keys()
                .filter(|t| !seen.contains(*t))
                .cloned()
                .collect()
        };
        for tenant in stale {
            self.drop_tenant(&tenant).await;
        }
    }

    /// `LocalRules`: a snapshot of one tenant's running rules, for the
    /// inspection RPC's local path. `None` if the tenant has no
    /// evaluator (never seen, or already dropped).
    pub async fn local_rules(&self, tenant: &TenantId) -> Option<Vec<RuleGroupDesc>> {
        let entries = self.entries.lock().await;
        entries.get(tenant).map(|e| e.evaluator.local_rules())
    }

    pub async fn tenants(&self) -> Vec<TenantId> {
        self.entries.lock().await.keys().cloned().collect()
    }

    #[cfg(test)]
    async fn rule_files(&self, tenant: &TenantId) -> Option<Vec<Utf8PathBuf>> {
        self.entries
            .lock()
            .await
            .get(tenant)
            .map(|e| e.rule_files.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluator::test_double::{NullQueryable, RecordingPusher, ScriptedEngine};
    use ruler_api::{NotifierConfig, Rule};

    fn registry() -> (camino_tempfile::Utf8TempDir, EvaluatorRegistry) {
        let dir = camino_tempfile::tempdir().unwrap();
        let mapper = Arc::new(FileMapper::new(dir.path().to_path_buf()));
        let notifiers = Arc::new(
            NotifierPool::new(NotifierConfig {
                alertmanager_url: vec!["http://alertmanager:9093".to_string()],
                ..Default::default()
            })
            .unwrap(),
        );
        let registry = EvaluatorRegistry::new(
            mapper,
            notifiers,
            Arc::new(ScriptedEngine::new()),
            Arc::new(NullQueryable),
            Arc::new(RecordingPusher::new()),
            Duration::from_secs(60),
        );
        (dir, registry)
    }

    fn group(tenant: &str) -> RuleGroupList {
        vec![ruler_api::RuleGroup {
            tenant: TenantId::new(tenant),
            namespace: "ns1".to_string(),
            name: "g1".to_string(),
            interval: None,
            rules: vec![Rule::Recording {
                record: "job:up".to_string(),
                expr: "up".to_string(),
                labels: HashMap::new(),
            }],
        }]
    }

    #[tokio::test]
    async fn creates_evaluator_on_first_poll() {
        let (_dir, registry) = registry();
        let tenant = TenantId::new("acme");
        registry
            .ensure_updated(&tenant, &group("acme"))
            .await
            .unwrap();
        assert_eq!(registry.tenants().await, vec![tenant.clone()]);
        assert!(registry.local_rules(&tenant).await.is_some());
    }

    #[tokio::test]
    async fn identical_poll_does_not_rewrite_files() {
        let (_dir, registry) = registry();
        let tenant = TenantId::new("acme");
        registry
            .ensure_updated(&tenant, &group("acme"))
            .await
            .unwrap();
        let first = registry.rule_files(&tenant).await.unwrap();
        registry
            .ensure_updated(&tenant, &group("acme"))
            .await
            .unwrap();
        let second = registry.rule_files(&tenant).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn drop_tenant_removes_from_registry() {
        let (_dir, registry) = registry();
        let tenant = TenantId::new("acme");
        registry
            .ensure_updated(&tenant, &group("acme"))
            .await
            .unwrap();
        registry.drop_tenant(&tenant).await;
        assert!(registry.tenants().await.is_empty());
        assert!(registry.local_rules(&tenant).await.is_none());
    }

    #[tokio::test]
    async fn reconcile_drops_tenants_absent_from_poll() {
        let (_dir, registry) = registry();
        registry
            .ensure_updated(&TenantId::new("a"), &group("a"))
            .await
            .unwrap();
        registry
            .ensure_updated(&TenantId::new("b"), &group("b"))
            .await
            .unwrap();

        let seen: std::collections::HashSet<_> = [TenantId::new("a")].into_iter().collect();
        registry.reconcile(&seen).await;

        let remaining = registry.tenants().await;
        assert_eq!(remaining, vec![TenantId::new("a")]);
    }
}
