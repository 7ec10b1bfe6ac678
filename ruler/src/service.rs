//! Top-level service wiring: owns the sync loop, the HTTP surface, and the
//! orchestrated shutdown sequence.

use std::sync::Arc;

use ruler_api::TenantId;
use tokio_util::sync::CancellationToken;

use crate::config::ServiceConfig;
use crate::evaluator::{Engine, Pusher, Queryable};
use crate::http::{self, AppState};
use crate::mapper::FileMapper;
use crate::notifier::NotifierPool;
use crate::registry::EvaluatorRegistry;
use crate::ring::{Lifecycler, Ring};
use crate::rule_store::RuleStore;
use crate::sync_loop::SyncLoop;

/// Every external collaborator the core needs, injected by the binary that
/// embeds this crate. `ring` is `None` when sharding is
/// disabled, in which case ownership is implicitly everything.
pub struct Dependencies {
    pub store: Arc<dyn RuleStore>,
    pub ring: Option<Arc<dyn Ring>>,
    pub lifecycler: Option<Arc<dyn Lifecycler>>,
    pub engine: Arc<dyn Engine>,
    pub queryable: Arc<dyn Queryable>,
    pub pusher: Arc<dyn Pusher>,
}

pub struct RulerService {
    config: ServiceConfig,
    sync_loop: Arc<SyncLoop>,
    registry: Arc<EvaluatorRegistry>,
    notifiers: Arc<NotifierPool>,
    lifecycler: Option<Arc<dyn Lifecycler>>,
    http_state: Arc<AppState>,
    cancel: CancellationToken,
}

impl RulerService {
    pub fn new(config: ServiceConfig, deps: Dependencies) -> anyhow::Result<Self> {
        let mapper = Arc::new(FileMapper::new(config.rule_path.clone()));
        let notifiers = Arc::new(NotifierPool::new(config.notifier.clone())?);
        let registry = Arc::new(EvaluatorRegistry::new(
            mapper,
            notifiers.clone(),
            deps.engine,
            deps.queryable,
            deps.pusher,
            config.evaluation_interval,
        ));
        let sync_loop = Arc::new(SyncLoop::new(
            deps.store,
            deps.ring.clone(),
            registry.clone(),
            config.poll_interval,
        ));

        let http_client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()?;
        let http_state = Arc::new(AppState {
            registry: registry.clone(),
            ring: deps.ring,
            client: http_client,
            enable_sharding: config.enable_sharding,
        });

        Ok(Self {
            config,
            sync_loop,
            registry,
            notifiers,
            lifecycler: deps.lifecycler,
            http_state,
            cancel: CancellationToken::new(),
        })
    }

    /// Runs the sync loop and the admin HTTP server until `shutdown` is
    /// called (or either task exits on its own, e.g. a bind failure).
    pub async fn run(&self) -> anyhow::Result<()> {
        let sync_loop = self.sync_loop.clone();
        let sync_cancel = self.cancel.clone();
        let sync_task = tokio::spawn(async move { sync_loop.run(sync_cancel).await });

        let http_result = http::serve(
            &self.config.http_listen_address,
            self.http_state.clone(),
            self.cancel.clone(),
        )
        .await;

        self.cancel.cancel();
        let _ = sync_task.await;
        http_result?;
        Ok(())
    }

    /// Orchestrated shutdown: cancel the root token (sync loop exits),
    /// stop every notifier in parallel, stop every evaluator in parallel,
    /// then leave the ring.
    pub async fn shutdown(&self) {
        self.cancel.cancel();

        self.notifiers.shutdown().await;

        let tenants: Vec<TenantId> = self.registry.tenants().await;
        futures::future::join_all(tenants.iter().map(|t| self.registry.drop_tenant(t))).await;

        if let Some(lifecycler) = &self.lifecycler {
            if let Err(e) = lifecycler.leave(self.config.search_pending_for).await {
                tracing::warn!(error = %e, "ring lifecycler leave failed during shutdown");
            }
        }
    }
}
