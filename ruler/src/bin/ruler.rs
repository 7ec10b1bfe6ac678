//! `ruler`: multi-tenant rule-evaluation service entry point.
//!
//! Wires the core (`ruler::service::RulerService`) to HTTP-based
//! implementations of the external collaborators it needs. A real
//! deployment would swap `adapters::Http*` for whatever concrete storage,
//! query-engine and ring client the surrounding monitoring system provides;
//! the core itself is agnostic to which.

use std::sync::Arc;

use ruler::adapters::{noop_ring, HttpEngine, HttpPusher, HttpRuleStore, RemoteQueryable};
use ruler::config::{ServiceArgs, ServiceConfig};
use ruler::service::{Dependencies, RulerService};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = ServiceArgs::load()?;
    let config = ServiceConfig::from_args(args)?;
    ruler::logging::init(config.log_format);

    if config.enable_sharding {
        anyhow::bail!(
            "enable-sharding requires a concrete Ring/Lifecycler implementation; \
             this binary only ships the no-op single-replica ring"
        );
    }

    let client = reqwest::Client::builder()
        .timeout(config.notifier.notification_timeout)
        .build()?;

    let store_url = config
        .rule_store_url
        .clone()
        .ok_or_else(|| anyhow::anyhow!("--rule-store-url is required"))?;
    let remote_write_url = config
        .remote_write_url
        .clone()
        .ok_or_else(|| anyhow::anyhow!("--remote-write-url is required"))?;
    let query_url = config
        .query_url
        .clone()
        .ok_or_else(|| anyhow::anyhow!("--query-url is required"))?;

    let ring = noop_ring(config.self_addr.clone());

    let deps = Dependencies {
        store: Arc::new(HttpRuleStore::new(client.clone(), store_url)),
        ring: Some(ring.clone()),
        lifecycler: Some(ring),
        engine: Arc::new(HttpEngine::new(client.clone(), query_url)),
        queryable: Arc::new(RemoteQueryable),
        pusher: Arc::new(HttpPusher::new(client, remote_write_url)),
    };

    let service = RulerService::new(config, deps)?;

    let shutdown = {
        let service = &service;
        async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
            service.shutdown().await;
        }
    };

    tokio::select! {
        result = service.run() => result,
        _ = shutdown => Ok(()),
    }
}
